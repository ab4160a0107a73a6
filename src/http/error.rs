use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::core::traits::gateway::GatewayError;
use crate::http::mappers::ConversionError;

/// Errors that escape a handler. Interpreter outcomes never end up here;
/// they are returned as 200 responses by the handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Gateway(err) => {
                tracing::error!(error = %err, "Gateway error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Server Error: {}", err),
                )
                    .into_response()
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
        }
    }
}
