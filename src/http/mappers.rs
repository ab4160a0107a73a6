use axum::http::{HeaderMap, header};

use crate::core::domain::ExecutionRequest;
use crate::http::models::EvalPayload;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Invalid JSON payload: {msg}")]
    InvalidPayload { msg: String },
}

pub fn execution_request(headers: &HeaderMap, body: String) -> Result<ExecutionRequest, ConversionError> {
    if !is_json(headers, header::CONTENT_TYPE) {
        return Ok(ExecutionRequest::new(body, Vec::new()));
    }

    let payload: EvalPayload =
        serde_json::from_str(&body).map_err(|e| ConversionError::InvalidPayload {
            msg: e.to_string(),
        })?;

    Ok(payload.into())
}

pub fn accepts_json(headers: &HeaderMap) -> bool {
    is_json(headers, header::ACCEPT)
}

fn is_json(headers: &HeaderMap, name: header::HeaderName) -> bool {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("application/json"))
}

impl From<EvalPayload> for ExecutionRequest {
    fn from(payload: EvalPayload) -> Self {
        Self {
            source_code: payload.code,
            inputs: payload.inputs,
        }
    }
}
