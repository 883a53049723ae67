use axum::body::Bytes;
use axum::http::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::AppError;
use crate::validator::Validator;

/// Decode a urlencoded POST body into a form struct. A body that does not
/// decode is a plain client error; the target types are fixed at compile
/// time so there is no invalid-destination case to handle at runtime.
pub fn decode_post_form<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_urlencoded::from_bytes(body).map_err(|_| AppError::Client(StatusCode::BAD_REQUEST))
}

/// Forms hold their Validator by explicit composition; handlers run checks
/// through `form.validator` and templates read the recorded messages back.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SnippetCreateForm {
    pub title: String,
    pub content: String,
    pub expires: i64,
    #[serde(skip)]
    pub validator: Validator,
}

impl SnippetCreateForm {
    /// Blank form for the GET view, with the default one-year lifetime
    /// preselected.
    pub fn blank() -> Self {
        Self {
            expires: 365,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserSignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(skip)]
    pub validator: Validator,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserLoginForm {
    pub email: String,
    pub password: String,
    #[serde(skip)]
    pub validator: Validator,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AccountPasswordUpdateForm {
    pub current_password: String,
    pub new_password: String,
    pub new_password_confirmation: String,
    #[serde(skip)]
    pub validator: Validator,
}
