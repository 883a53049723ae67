pub mod error;
pub mod forms;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod session;
pub mod templates;
pub mod validator;

use std::sync::Arc;

use snippetbox_db::Database;

pub use error::AppError;
pub use routes::router;

/// Application-wide dependencies, passed to every handler via axum state.
pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
}
