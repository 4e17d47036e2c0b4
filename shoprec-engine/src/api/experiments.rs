//! Experiment management and metric endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use shoprec_common::Error;

use super::ApiResult;
use crate::experiments::{
    ExperimentAnalysis, ExperimentAssignment, ExperimentConfig, MetricSample, NewExperiment,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AssignmentQuery {
    pub user_id: String,
}

fn default_metric_value() -> f64 {
    1.0
}

/// Body of POST /api/metric-events
#[derive(Debug, Deserialize)]
pub struct MetricEventRequest {
    pub user_id: String,
    pub experiment_id: String,
    #[serde(alias = "event_type")]
    pub metric_name: String,
    #[serde(default = "default_metric_value")]
    pub value: f64,
}

/// POST /api/experiments
pub async fn create_experiment(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<ExperimentConfig>)> {
    let new: NewExperiment =
        serde_json::from_value(body).map_err(|e| Error::Validation(vec![e.to_string()]))?;
    let config = state.service.create_experiment(new).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

/// GET /api/experiments
pub async fn list_experiments(State(state): State<AppState>) -> Json<Vec<ExperimentConfig>> {
    Json(state.service.list_experiments().await)
}

/// GET /api/experiments/:id
pub async fn get_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExperimentConfig>> {
    Ok(Json(state.service.experiment(&id).await?))
}

/// POST /api/experiments/:id/start
pub async fn start_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExperimentConfig>> {
    Ok(Json(state.service.start_experiment(&id).await?))
}

/// POST /api/experiments/:id/pause
pub async fn pause_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExperimentConfig>> {
    Ok(Json(state.service.pause_experiment(&id).await?))
}

/// POST /api/experiments/:id/complete
///
/// Returns the final analysis.
pub async fn complete_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExperimentAnalysis>> {
    Ok(Json(state.service.complete_experiment(&id).await?))
}

/// POST /api/experiments/:id/stop
///
/// Returns the final analysis.
pub async fn stop_experiment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExperimentAnalysis>> {
    Ok(Json(state.service.stop_experiment(&id).await?))
}

/// GET /api/experiments/:id/assignment?user_id=..
pub async fn get_assignment(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AssignmentQuery>,
) -> ApiResult<Json<ExperimentAssignment>> {
    Ok(Json(state.service.assign(&query.user_id, &id).await?))
}

/// GET /api/experiments/:id/analysis
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ExperimentAnalysis>> {
    Ok(Json(state.service.analyze(&id).await?))
}

/// POST /api/metric-events
pub async fn record_metric_event(
    State(state): State<AppState>,
    Json(request): Json<MetricEventRequest>,
) -> ApiResult<(StatusCode, Json<MetricSample>)> {
    let sample = state
        .service
        .record_metric(
            &request.user_id,
            &request.experiment_id,
            &request.metric_name,
            request.value,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(sample)))
}
