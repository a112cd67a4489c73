//! Epoch progress coordination.

use crate::error::StoreResult;
use crate::models::{CoverageCounts, GraphKeyGenerationRow, ProgressRow};
use async_trait::async_trait;
use pathrank_core::{DerivativeGraphKey, RootGraphKey};
use time::OffsetDateTime;

#[async_trait]
pub trait CoordinatorRepo: Send + Sync {
    /// Create the progress row of an epoch if absent, snapshotting id watermarks and
    /// visible-row totals of the root key.
    ///
    /// Returns true when this call created the row.
    async fn start_mapper_phase(
        &self,
        derivative_key: &DerivativeGraphKey,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;

    /// Start the reducer once both mappers have completed.
    ///
    /// Returns true when this call performed the transition.
    async fn start_reducer_phase(
        &self,
        derivative_key: &DerivativeGraphKey,
        now: OffsetDateTime,
    ) -> StoreResult<bool>;

    /// Get the progress row of an epoch.
    async fn progress(&self, derivative_key: &DerivativeGraphKey)
    -> StoreResult<Option<ProgressRow>>;

    /// All progress rows, newest first.
    async fn summaries(&self) -> StoreResult<Vec<ProgressRow>>;

    /// Delete the progress row of an epoch so the next coordinator tick starts it over.
    async fn delete_ranking_progress(&self, derivative_key: &DerivativeGraphKey)
    -> StoreResult<u64>;

    /// Latest operator-bumped generation of the root's derivative key, if any.
    async fn derivative_graph_key_generation(
        &self,
        root_key: &RootGraphKey,
    ) -> StoreResult<Option<GraphKeyGenerationRow>>;

    /// Start a new generation so the next coordinator tick begins a fresh epoch.
    async fn bump_derivative_graph_key(
        &self,
        root_key: &RootGraphKey,
        now: OffsetDateTime,
    ) -> StoreResult<GraphKeyGenerationRow>;

    /// How much of the eligible upload set an epoch covers.
    async fn coverage_counts(&self, derivative_key: &DerivativeGraphKey)
    -> StoreResult<CoverageCounts>;
}
