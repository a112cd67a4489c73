//! Epoch progress summaries.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use pathrank_core::{DerivativeGraphKey, ProgressState};
use pathrank_store::models::ProgressRow;
use serde::Serialize;
use time::OffsetDateTime;

/// One epoch as reported to operators.
#[derive(Debug, Serialize)]
pub struct ProgressSummary {
    pub graph_key: String,
    pub state: ProgressState,
    #[serde(with = "time::serde::rfc3339")]
    pub mappers_started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub mapper_completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub seed_mapper_completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reducer_started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reducer_completed_at: Option<OffsetDateTime>,
    pub paths: PhaseCounts,
    pub references: PhaseCounts,
    pub counts: PhaseCounts,
}

/// Processed versus total records of one phase.
#[derive(Debug, Serialize)]
pub struct PhaseCounts {
    pub processed: i64,
    pub total: i64,
}

impl From<ProgressRow> for ProgressSummary {
    fn from(row: ProgressRow) -> Self {
        Self {
            state: row.state(),
            graph_key: row.graph_key,
            mappers_started_at: row.mappers_started_at,
            mapper_completed_at: row.mapper_completed_at,
            seed_mapper_completed_at: row.seed_mapper_completed_at,
            reducer_started_at: row.reducer_started_at,
            reducer_completed_at: row.reducer_completed_at,
            paths: PhaseCounts {
                processed: row.num_path_records_processed,
                total: row.num_path_records_total,
            },
            references: PhaseCounts {
                processed: row.num_reference_records_processed,
                total: row.num_reference_records_total,
            },
            counts: PhaseCounts {
                processed: row.num_count_records_processed,
                total: row.num_count_records_total,
            },
        }
    }
}

/// GET /v1/progress - Every epoch, newest first.
pub async fn list_progress(State(state): State<AppState>) -> ApiResult<Json<Vec<ProgressSummary>>> {
    let rows = state.store.summaries().await?;
    Ok(Json(rows.into_iter().map(ProgressSummary::from).collect()))
}

/// DELETE /v1/progress/{graph_key} - Forget an epoch so the coordinator starts it over.
pub async fn delete_progress(
    State(state): State<AppState>,
    Path(graph_key): Path<String>,
) -> ApiResult<StatusCode> {
    let key = DerivativeGraphKey::parse(&graph_key).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if state.store.delete_ranking_progress(&key).await? == 0 {
        return Err(ApiError::NotFound(format!("progress of {key}")));
    }
    tracing::info!(graph_key = %key, "Deleted ranking progress");
    Ok(StatusCode::NO_CONTENT)
}
