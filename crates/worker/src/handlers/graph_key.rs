//! Derivative graph key generations and epoch coverage.

use crate::error::ApiResult;
use crate::jobs::current_derivative_key;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use pathrank_core::new_graph_key;
use pathrank_store::models::CoverageCounts;
use serde::Serialize;
use time::OffsetDateTime;

/// The derivative key the jobs currently work under.
#[derive(Debug, Serialize)]
pub struct DerivativeGraphKeyResponse {
    pub graph_key: String,
    pub derivative_graph_key: String,
    /// Latest bumped generation, absent until the first bump.
    pub generation: Option<i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub bumped_at: Option<OffsetDateTime>,
}

/// GET /v1/derivative-graph-key - Current derivative key.
pub async fn get_derivative_graph_key(
    State(state): State<AppState>,
) -> ApiResult<Json<DerivativeGraphKeyResponse>> {
    let root_key = new_graph_key(&state.config.ranking.graph_key);
    let generation = state.store.derivative_graph_key_generation(&root_key).await?;
    let key = current_derivative_key(state.store.as_ref(), &state.config, state.clock.now()).await?;

    Ok(Json(DerivativeGraphKeyResponse {
        graph_key: root_key.as_str().to_string(),
        derivative_graph_key: key.as_str().to_string(),
        generation: generation.as_ref().map(|g| g.id),
        bumped_at: generation.map(|g| g.created_at),
    }))
}

/// POST /v1/derivative-graph-key - Start a new generation.
///
/// The next coordinator tick begins a fresh epoch under the new key; the previous epoch's
/// payloads stay readable until it completes.
pub async fn bump_derivative_graph_key(
    State(state): State<AppState>,
) -> ApiResult<Json<DerivativeGraphKeyResponse>> {
    let root_key = new_graph_key(&state.config.ranking.graph_key);
    let now = state.clock.now();
    let generation = state.store.bump_derivative_graph_key(&root_key, now).await?;
    let key = current_derivative_key(state.store.as_ref(), &state.config, now).await?;

    Ok(Json(DerivativeGraphKeyResponse {
        graph_key: root_key.as_str().to_string(),
        derivative_graph_key: key.as_str().to_string(),
        generation: Some(generation.id),
        bumped_at: Some(generation.created_at),
    }))
}

/// Coverage of the current epoch.
#[derive(Debug, Serialize)]
pub struct CoverageResponse {
    pub derivative_graph_key: String,
    pub num_target_indexes: u64,
    pub num_exported_indexes: u64,
    pub num_repositories_with_current_ranks: u64,
}

/// GET /v1/coverage - How much of the eligible upload set the current epoch covers.
pub async fn get_coverage(State(state): State<AppState>) -> ApiResult<Json<CoverageResponse>> {
    let key = current_derivative_key(state.store.as_ref(), &state.config, state.clock.now()).await?;
    let CoverageCounts {
        num_target_indexes,
        num_exported_indexes,
        num_repositories_with_current_ranks,
    } = state.store.coverage_counts(&key).await?;

    Ok(Json(CoverageResponse {
        derivative_graph_key: key.as_str().to_string(),
        num_target_indexes,
        num_exported_indexes,
        num_repositories_with_current_ranks,
    }))
}
