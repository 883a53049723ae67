use std::backtrace::Backtrace;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use snippetbox_db::ModelError;
use thiserror::Error;
use tracing::error;

/// Request-level error taxonomy. Client and not-found errors render short
/// plain-text responses; server errors are logged with a full trace and a
/// generic message goes to the client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    #[error("client error: {0}")]
    Client(StatusCode),

    #[error(transparent)]
    Server(#[from] anyhow::Error),
}

impl From<ModelError> for AppError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NoRecord => AppError::NotFound,
            other => AppError::Server(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not Found").into_response(),
            AppError::Client(status) => {
                let reason = status.canonical_reason().unwrap_or("Client Error");
                (status, reason).into_response()
            }
            AppError::Server(err) => {
                let trace = Backtrace::force_capture();
                error!("server error: {err:#}\n{trace}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}
