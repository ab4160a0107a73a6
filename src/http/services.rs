use axum::{
    Json,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};

use crate::http::{AppState, error::AppError, mappers, models::EvalResponse};

/// `GET /api/eval`: reports the interpreter version.
#[tracing::instrument(skip(state))]
pub async fn version(State(state): State<AppState>) -> Result<String, AppError> {
    Ok(state.gateway.version(state.deadline).await?)
}

/// `POST /api/eval`: runs the submitted source.
///
/// Every interpreter outcome (timeout and process errors included) is a
/// 200. Only provisioning and filesystem failures become a 500.
#[tracing::instrument(skip(state, headers, body), fields(body_len = body.len()))]
pub async fn eval(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Response, AppError> {
    let request = mappers::execution_request(&headers, body)?;
    let result = state.gateway.run(&request, state.deadline).await?;

    if mappers::accepts_json(&headers) {
        Ok(Json(EvalResponse::from(result)).into_response())
    } else {
        Ok(result.combined_output.into_response())
    }
}
