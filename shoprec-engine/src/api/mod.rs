//! HTTP API handlers for shoprec-engine

pub mod error;
pub mod events;
pub mod experiments;
pub mod health;

pub use error::{ApiError, ApiResult};
pub use events::{get_metrics, get_recommendations, get_trending, ingest_event};
pub use experiments::{
    complete_experiment, create_experiment, get_analysis, get_assignment, get_experiment,
    list_experiments, pause_experiment, record_metric_event, start_experiment, stop_experiment,
};
pub use health::health_routes;
