use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::models::{DailyStats, SkillCandidate};
use crate::discovery::ObservationOutcome;
use crate::errors::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ObserveRequest {
    pub raw_text: String,
    /// Document type/category the token was found in, e.g. a résumé section
    /// label or job-field tag.
    pub context: String,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// POST /api/v1/discovery/observe
pub async fn handle_observe(
    State(state): State<AppState>,
    Json(req): Json<ObserveRequest>,
) -> Result<Json<ObservationOutcome>, AppError> {
    let document_type = req.document_type.as_deref().unwrap_or(&req.context);
    let snippet = req.snippet.as_deref().unwrap_or(&req.raw_text);
    let outcome = state
        .discovery
        .observe(&req.raw_text, &req.context, document_type, snippet)
        .await?;
    Ok(Json(outcome))
}

/// GET /api/v1/discovery/candidates/:normalized
pub async fn handle_get_candidate(
    State(state): State<AppState>,
    Path(normalized): Path<String>,
) -> Result<Json<SkillCandidate>, AppError> {
    state
        .store
        .get_by_normalized_text(&normalized)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no candidate '{normalized}'")))
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub candidates: Vec<SkillCandidate>,
}

/// GET /api/v1/discovery/pending — candidates awaiting more evidence.
pub async fn handle_list_pending(
    State(state): State<AppState>,
    Query(params): Query<PendingQuery>,
) -> Result<Json<PendingResponse>, AppError> {
    let candidates = state.store.list_pending(params.limit.clamp(1, 500)).await?;
    Ok(Json(PendingResponse { candidates }))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    /// Calendar day, YYYY-MM-DD. Defaults to today (UTC).
    pub day: Option<NaiveDate>,
}

/// GET /api/v1/discovery/stats?day=YYYY-MM-DD
pub async fn handle_get_stats(
    State(state): State<AppState>,
    Query(params): Query<StatsQuery>,
) -> Result<Json<DailyStats>, AppError> {
    let day = params.day.unwrap_or_else(|| Utc::now().date_naive());
    let stats = state
        .audit
        .stats_for_day(day)
        .await
        .map_err(AppError::Internal)?
        .unwrap_or(DailyStats {
            day,
            discovered_count: 0,
            taxonomy_validated_count: 0,
            auto_approved_count: 0,
            high_frequency_count: 0,
        });
    Ok(Json(stats))
}
