use std::sync::Arc;
use std::time::Duration;

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tower_http::trace::TraceLayer;

use crate::core::traits::gateway::Gateway;

pub mod error;
pub mod mappers;
pub mod models;
pub mod services;

/// Shared state for the handlers; cheap to clone.
#[derive(Clone, Debug)]
pub struct AppState {
    pub gateway: Arc<dyn Gateway>,
    pub deadline: Duration,
}

pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/api/eval", get(services::version).post(services::eval))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
