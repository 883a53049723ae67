use askama::Template;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use chrono::{Datelike, Utc};
use snippetbox_db::{Snippet, User};

use crate::error::AppError;
use crate::forms::{AccountPasswordUpdateForm, SnippetCreateForm, UserLoginForm, UserSignupForm};
use crate::middleware::CurrentUser;
use crate::session::Session;

/// Data every page template needs. Built per render; taking the flash here
/// is what makes it one-shot.
pub struct PageData {
    pub current_year: i32,
    pub flash: Option<String>,
    pub is_authenticated: bool,
    pub csrf_token: String,
}

impl PageData {
    pub fn new(session: &Session, current: &CurrentUser) -> Self {
        Self {
            current_year: Utc::now().year(),
            flash: session.take_flash(),
            is_authenticated: current.is_authenticated(),
            csrf_token: session.csrf_token(),
        }
    }
}

/// Render a template into a buffer first; the status code and body are only
/// written once rendering has fully succeeded, so a mid-render failure can
/// never produce a half-written 200 page.
pub fn render<T: Template>(status: StatusCode, template: &T) -> Result<Response, AppError> {
    let body = template
        .render()
        .map_err(|err| AppError::Server(anyhow::Error::new(err)))?;
    Ok((status, Html(body)).into_response())
}

mod filters {
    use chrono::{DateTime, Utc};

    pub fn human_date(t: &DateTime<Utc>) -> askama::Result<String> {
        Ok(t.format("%d %b %Y at %H:%M").to_string())
    }
}

#[derive(Template)]
#[template(path = "pages/home.html")]
pub struct HomePage {
    pub page: PageData,
    pub snippets: Vec<Snippet>,
}

#[derive(Template)]
#[template(path = "pages/view.html")]
pub struct ViewPage {
    pub page: PageData,
    pub snippet: Snippet,
}

#[derive(Template)]
#[template(path = "pages/create.html")]
pub struct CreatePage {
    pub page: PageData,
    pub form: SnippetCreateForm,
}

#[derive(Template)]
#[template(path = "pages/signup.html")]
pub struct SignupPage {
    pub page: PageData,
    pub form: UserSignupForm,
}

#[derive(Template)]
#[template(path = "pages/login.html")]
pub struct LoginPage {
    pub page: PageData,
    pub form: UserLoginForm,
}

#[derive(Template)]
#[template(path = "pages/account.html")]
pub struct AccountPage {
    pub page: PageData,
    pub user: User,
}

#[derive(Template)]
#[template(path = "pages/password.html")]
pub struct PasswordPage {
    pub page: PageData,
    pub form: AccountPasswordUpdateForm,
}

#[derive(Template)]
#[template(path = "pages/about.html")]
pub struct AboutPage {
    pub page: PageData,
}
