use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Duration;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const SESSION_COOKIE: &str = "session";

/// Sessions live for 12 hours from their last save (sliding window).
pub fn session_lifetime() -> Duration {
    Duration::hours(12)
}

/// The server-side data bag persisted against a session token.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticated_user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_path_after_login: Option<String>,
    #[serde(default)]
    pub csrf_token: String,
}

struct Inner {
    token: String,
    // Previous token after a renewal, so the old row can be deleted on save.
    stale_token: Option<String>,
    data: SessionData,
}

/// Handle to the per-request session, shared between the load-and-save
/// middleware and the handler through a request extension.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<Inner>>,
}

impl Session {
    /// A brand-new anonymous session with a fresh token and CSRF token.
    pub fn new() -> Self {
        let data = SessionData {
            csrf_token: random_token(),
            ..SessionData::default()
        };
        Self::build(random_token(), data)
    }

    /// Rehydrate a session loaded from the store. An empty CSRF token in a
    /// stored bag is replaced so state-changing forms always have one.
    pub fn from_store(token: String, mut data: SessionData) -> Self {
        if data.csrf_token.is_empty() {
            data.csrf_token = random_token();
        }
        Self::build(token, data)
    }

    fn build(token: String, data: SessionData) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                token,
                stale_token: None,
                data,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Nothing panics while holding the guard, but a poisoned lock still
        // holds usable session state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn token(&self) -> String {
        self.lock().token.clone()
    }

    /// Swap in a fresh token while keeping the data, so a privilege-level
    /// transition cannot be ridden on a fixated session id. The old row is
    /// deleted when the middleware saves.
    pub fn renew_token(&self) {
        let mut inner = self.lock();
        if inner.stale_token.is_none() {
            inner.stale_token = Some(inner.token.clone());
        }
        inner.token = random_token();
    }

    pub fn user_id(&self) -> Option<i64> {
        self.lock().data.authenticated_user_id
    }

    pub fn set_user_id(&self, id: Option<i64>) {
        self.lock().data.authenticated_user_id = id;
    }

    pub fn csrf_token(&self) -> String {
        self.lock().data.csrf_token.clone()
    }

    pub fn put_flash(&self, message: &str) {
        self.lock().data.flash = Some(message.to_string());
    }

    /// One-shot read: the flash is removed as it is taken.
    pub fn take_flash(&self) -> Option<String> {
        self.lock().data.flash.take()
    }

    pub fn put_redirect_path(&self, path: &str) {
        self.lock().data.redirect_path_after_login = Some(path.to_string());
    }

    pub fn take_redirect_path(&self) -> Option<String> {
        self.lock().data.redirect_path_after_login.take()
    }

    pub(crate) fn stale_token(&self) -> Option<String> {
        self.lock().stale_token.clone()
    }

    pub(crate) fn data_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.lock().data)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// 224 bits of CSPRNG output, base64url encoded.
pub fn random_token() -> String {
    let bytes: [u8; 28] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}
