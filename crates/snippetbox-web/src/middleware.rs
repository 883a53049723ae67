use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use axum::Extension;
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::Utc;
use futures_util::FutureExt;
use http_body_util::Full;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{error, info};

use crate::AppState;
use crate::error::AppError;
use crate::session::{SESSION_COOKIE, Session, SessionData, session_lifetime};

/// Upper bound on a buffered form body during CSRF checking.
const MAX_FORM_BYTES: usize = 1024 * 1024;

/// Authentication state for the current request, established by the
/// `authenticate` middleware. `None` means anonymous.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Option<i64>);

impl CurrentUser {
    pub fn is_authenticated(&self) -> bool {
        self.0.is_some()
    }
}

/// Panic handler for the outermost recovery layer. Converts an unwound
/// panic into a generic 500 with `Connection: close`, logging the payload
/// and a backtrace. Nothing propagates past this layer.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> axum::http::Response<Full<Bytes>> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic payload".to_string()
    };
    let trace = std::backtrace::Backtrace::force_capture();
    error!("panic while serving request: {detail}\n{trace}");

    let mut res = axum::http::Response::new(Full::from("Internal Server Error"));
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res.headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    res
}

/// Log remote address, protocol, method and URI for every request.
pub async fn log_request(req: Request, next: Next) -> Response {
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".to_string());

    info!(
        "{} - {:?} {} {}",
        remote,
        req.version(),
        req.method(),
        req.uri()
    );

    next.run(req).await
}

/// Fixed security headers, set on every response.
pub async fn secure_headers(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; style-src 'self' fonts.googleapis.com; font-src fonts.gstatic.com",
        ),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("origin-when-cross-origin"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("deny"));
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("0"));

    res
}

/// Load the session keyed by the request's cookie (or create a fresh one),
/// expose it as a request extension, and persist it after the handler runs.
/// The save happens even when the handler panics; the panic then resumes to
/// the recovery layer.
pub async fn load_and_save_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let cookie_token = jar.get(SESSION_COOKIE).map(|c| c.value().to_string());

    let session = match &cookie_token {
        Some(token) => match state.db.load_session(token)? {
            Some(json) => match serde_json::from_str::<SessionData>(&json) {
                Ok(data) => Session::from_store(token.clone(), data),
                // A row we cannot decode is treated as no session at all.
                Err(_) => Session::new(),
            },
            None => Session::new(),
        },
        None => Session::new(),
    };

    req.extensions_mut().insert(session.clone());

    let outcome = AssertUnwindSafe(next.run(req)).catch_unwind().await;

    let token = session.token();
    let token_is_new = cookie_token.as_deref() != Some(token.as_str());

    // A panicking handler yields a bare 500 with no Set-Cookie, so a newly
    // issued token would never reach the client. Skip the save (and keep any
    // pre-renewal row) rather than orphan a row nobody can present.
    if outcome.is_ok() || !token_is_new {
        let data = session.data_json().map_err(anyhow::Error::new)?;
        let expiry = Utc::now() + session_lifetime();
        state.db.save_session(&token, &data, expiry)?;
        if let Some(old) = session.stale_token() {
            state.db.delete_session(&old)?;
        }
    }

    let mut res = match outcome {
        Ok(res) => res,
        Err(panic) => std::panic::resume_unwind(panic),
    };

    if token_is_new {
        let cookie = Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .build();
        let value =
            HeaderValue::from_str(&cookie.to_string()).map_err(anyhow::Error::new)?;
        res.headers_mut().append(header::SET_COOKIE, value);
    }

    Ok(res)
}

#[derive(Deserialize)]
struct CsrfField {
    csrf_token: Option<String>,
}

/// For state-changing methods, require the session's CSRF token as either a
/// `csrf_token` form field or an `X-CSRF-Token` header. The body is buffered
/// and replayed for the handler.
pub async fn csrf_protect(
    Extension(session): Extension<Session>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if matches!(
        *req.method(),
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    ) {
        return Ok(next.run(req).await);
    }

    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| AppError::Client(StatusCode::BAD_REQUEST))?;

    let submitted = parts
        .headers
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| {
            serde_urlencoded::from_bytes::<CsrfField>(&bytes)
                .ok()
                .and_then(|form| form.csrf_token)
        });

    if !csrf_tokens_match(submitted.as_deref(), &session.csrf_token()) {
        return Err(AppError::Client(StatusCode::BAD_REQUEST));
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}

/// Constant-time token comparison, so response timing leaks nothing about
/// how much of a guessed token was right. An absent token never matches.
fn csrf_tokens_match(submitted: Option<&str>, expected: &str) -> bool {
    match submitted {
        Some(submitted) => submitted.as_bytes().ct_eq(expected.as_bytes()).into(),
        None => false,
    }
}

/// Resolve the session's user id against the store and record the result as
/// an explicit `CurrentUser` extension. A session naming a user that no
/// longer exists stays anonymous; store failures propagate.
pub async fn authenticate(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let current = match session.user_id() {
        Some(id) => {
            if state.db.user_exists(id)? {
                CurrentUser(Some(id))
            } else {
                CurrentUser(None)
            }
        }
        None => CurrentUser(None),
    };

    req.extensions_mut().insert(current);
    Ok(next.run(req).await)
}

/// Gate for protected routes. Anonymous requests are remembered and sent to
/// the login page; authenticated responses are marked uncacheable.
pub async fn require_authentication(
    Extension(current): Extension<CurrentUser>,
    Extension(session): Extension<Session>,
    req: Request,
    next: Next,
) -> Response {
    if !current.is_authenticated() {
        session.put_redirect_path(req.uri().path());
        return Redirect::to("/user/login").into_response();
    }

    let mut res = next.run(req).await;
    res.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    res
}
