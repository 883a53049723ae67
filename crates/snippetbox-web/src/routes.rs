use std::path::Path;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;

use crate::AppState;
use crate::handlers;
use crate::middleware;

/// Build the application router.
///
/// Three middleware chains, mirroring the route table: the "standard" chain
/// (panic recovery, request logging, security headers) wraps everything
/// including the 404 fallback; "dynamic" routes additionally get session
/// load-and-save, CSRF protection and authentication-context injection;
/// "protected" routes add the authentication gate on top of that.
pub fn router(state: AppState, static_dir: &Path) -> Router {
    let protected = Router::new()
        .route(
            "/snippet/create",
            get(handlers::snippet_create).post(handlers::snippet_create_post),
        )
        .route("/user/logout", post(handlers::user_logout_post))
        .route("/account/view", get(handlers::account_view))
        .route(
            "/account/password/update",
            get(handlers::account_password_update).post(handlers::account_password_update_post),
        )
        .route_layer(from_fn(middleware::require_authentication));

    let dynamic = Router::new()
        .route("/", get(handlers::home))
        .route("/about", get(handlers::about))
        .route("/snippet/view/{id}", get(handlers::snippet_view))
        .route(
            "/user/signup",
            get(handlers::user_signup).post(handlers::user_signup_post),
        )
        .route(
            "/user/login",
            get(handlers::user_login).post(handlers::user_login_post),
        )
        .merge(protected)
        // Innermost first: session is loaded before CSRF and authentication
        // run, and saved after the handler finishes.
        .layer(from_fn_with_state(state.clone(), middleware::authenticate))
        .layer(from_fn(middleware::csrf_protect))
        .layer(from_fn_with_state(
            state.clone(),
            middleware::load_and_save_session,
        ));

    Router::new()
        .route("/ping", get(handlers::ping))
        .nest_service("/static", ServeDir::new(static_dir))
        .merge(dynamic)
        .fallback(handlers::not_found)
        .layer(from_fn(middleware::secure_headers))
        .layer(from_fn(middleware::log_request))
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .with_state(state)
}
