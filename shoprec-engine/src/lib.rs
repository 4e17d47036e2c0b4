//! shoprec-engine library
//!
//! Real-time recommendation engine: event ingestion, session windows,
//! trending scores, experiment assignment and analysis, and the weighted
//! ensemble cache, composed by [`RecommendationService`] and served over HTTP.

use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod catalog;
pub mod ensemble;
pub mod experiments;
pub mod ingest;
pub mod metrics;
pub mod service;
pub mod session;
pub mod sources;
pub mod tasks;
pub mod trending;

pub use service::{RecommendationService, ServiceBuilder};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RecommendationService>,
    /// Cancellation token of the maintenance loops, when they were spawned
    pub background: Option<CancellationToken>,
}

impl AppState {
    pub fn new(service: Arc<RecommendationService>) -> Self {
        Self {
            service,
            background: None,
        }
    }

    pub fn with_background_tasks(mut self, token: CancellationToken) -> Self {
        self.background = Some(token);
        self
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let experiments = Router::new()
        .route(
            "/api/experiments",
            get(api::list_experiments).post(api::create_experiment),
        )
        .route("/api/experiments/:id", get(api::get_experiment))
        .route("/api/experiments/:id/start", post(api::start_experiment))
        .route("/api/experiments/:id/pause", post(api::pause_experiment))
        .route("/api/experiments/:id/complete", post(api::complete_experiment))
        .route("/api/experiments/:id/stop", post(api::stop_experiment))
        .route("/api/experiments/:id/assignment", get(api::get_assignment))
        .route("/api/experiments/:id/analysis", get(api::get_analysis))
        .route("/api/metric-events", post(api::record_metric_event));

    let recommendations = Router::new()
        .route("/api/events", post(api::ingest_event))
        .route("/api/recommendations", get(api::get_recommendations))
        .route("/api/trending", get(api::get_trending))
        .route("/api/metrics", get(api::get_metrics));

    Router::new()
        .merge(experiments)
        .merge(recommendations)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
