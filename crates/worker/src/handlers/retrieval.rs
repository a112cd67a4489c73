//! Read endpoints for ranking consumers.
//!
//! Repository names contain slashes; clients percent-encode them into a single path segment
//! (`/v1/repos/github.com%2Facme%2Fwidgets/star-rank`).

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Upper bound on repository ids per last-updated request.
const MAX_LAST_UPDATED_IDS: usize = 10_000;

/// Document ranks of one repository.
#[derive(Debug, Serialize)]
pub struct DocumentRanksResponse {
    pub repository: String,
    pub ranks: BTreeMap<String, f64>,
}

/// GET /v1/repos/{name}/document-ranks
pub async fn get_document_ranks(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<DocumentRanksResponse>> {
    let ranks = state
        .store
        .get_document_ranks(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no document ranks for {name}")))?;

    Ok(Json(DocumentRanksResponse {
        repository: name,
        ranks: ranks.into_iter().collect(),
    }))
}

/// Star rank of one repository.
#[derive(Debug, Serialize)]
pub struct StarRankResponse {
    pub repository: String,
    pub rank: f64,
}

/// GET /v1/repos/{name}/star-rank
///
/// Unknown repositories rank 0 rather than 404.
pub async fn get_star_rank(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<StarRankResponse>> {
    let rank = state.store.get_star_rank(&name).await?;
    Ok(Json(StarRankResponse {
        repository: name,
        rank,
    }))
}

/// Reference count statistics across every payload.
#[derive(Debug, Serialize)]
pub struct ReferenceCountStatisticsResponse {
    /// Mean of `ln(count + 1)` over every payload entry.
    pub mean_log_count: f64,
}

/// GET /v1/statistics/reference-counts
pub async fn get_reference_count_statistics(
    State(state): State<AppState>,
) -> ApiResult<Json<ReferenceCountStatisticsResponse>> {
    let mean_log_count = state.store.get_reference_count_statistics().await?;
    Ok(Json(ReferenceCountStatisticsResponse { mean_log_count }))
}

/// Request body for last-updated lookups.
#[derive(Debug, Deserialize)]
pub struct LastUpdatedRequest {
    pub repository_ids: Vec<i64>,
}

/// When each repository's payload was last written. Repositories without a payload are
/// absent from the map.
#[derive(Debug, Serialize)]
pub struct LastUpdatedResponse {
    #[serde(serialize_with = "serialize_timestamps")]
    pub last_updated: BTreeMap<i64, OffsetDateTime>,
}

fn serialize_timestamps<S>(
    map: &BTreeMap<i64, OffsetDateTime>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::{Error, SerializeMap};
    use time::format_description::well_known::Rfc3339;

    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (id, at) in map {
        let formatted = at.format(&Rfc3339).map_err(S::Error::custom)?;
        out.serialize_entry(id, &formatted)?;
    }
    out.end()
}

/// POST /v1/last-updated
pub async fn get_last_updated(
    State(state): State<AppState>,
    Json(req): Json<LastUpdatedRequest>,
) -> ApiResult<Json<LastUpdatedResponse>> {
    if req.repository_ids.len() > MAX_LAST_UPDATED_IDS {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_LAST_UPDATED_IDS} repository ids per request"
        )));
    }

    let last_updated = state.store.last_updated_at(&req.repository_ids).await?;
    Ok(Json(LastUpdatedResponse {
        last_updated: last_updated.into_iter().collect(),
    }))
}
