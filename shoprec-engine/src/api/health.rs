//! Health check endpoint
//!
//! Reports liveness together with a snapshot of live service state.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::service::ServiceStatus;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundState {
    Running,
    Stopped,
    NotStarted,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    pub background_tasks: BackgroundState,
    #[serde(flatten)]
    pub service: ServiceStatus,
}

/// GET /health
///
/// Degraded once the maintenance loops have been cancelled.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let background_tasks = match &state.background {
        None => BackgroundState::NotStarted,
        Some(token) if token.is_cancelled() => BackgroundState::Stopped,
        Some(_) => BackgroundState::Running,
    };
    let status = if background_tasks == BackgroundState::Stopped {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        module: "shoprec-engine",
        version: env!("CARGO_PKG_VERSION"),
        background_tasks,
        service: state.service.status().await,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
