//! Event ingestion, recommendation and trending endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use shoprec_common::{Error, UserEvent};

use super::ApiResult;
use crate::ensemble::RecommendationList;
use crate::metrics::MetricsSnapshot;
use crate::trending::TrendingItem;
use crate::AppState;

fn default_count() -> usize {
    10
}

/// Query parameters for recommendations
#[derive(Debug, Deserialize)]
pub struct RecommendationQuery {
    pub user_id: String,
    #[serde(default = "default_count")]
    pub count: usize,
    pub experiment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    #[serde(default = "default_count")]
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct TrendingResponse {
    pub items: Vec<TrendingItem>,
}

/// POST /api/events
///
/// Body is decoded here so that unknown event types and missing fields
/// surface as invalid events rather than generic extractor rejections.
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<RecommendationList>> {
    let event: UserEvent =
        serde_json::from_value(body).map_err(|e| Error::InvalidEvent(e.to_string()))?;
    let list = state.service.ingest(event).await?;
    Ok(Json(list))
}

/// GET /api/recommendations?user_id=..&count=..&experiment_id=..
pub async fn get_recommendations(
    State(state): State<AppState>,
    Query(query): Query<RecommendationQuery>,
) -> ApiResult<Json<RecommendationList>> {
    let list = state
        .service
        .recommendations(&query.user_id, query.count, query.experiment_id.as_deref())
        .await?;
    Ok(Json(list))
}

/// GET /api/trending?count=..
pub async fn get_trending(
    State(state): State<AppState>,
    Query(query): Query<TrendingQuery>,
) -> Json<TrendingResponse> {
    Json(TrendingResponse {
        items: state.service.trending(query.count).await,
    })
}

/// GET /api/metrics
pub async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.service.metrics())
}
