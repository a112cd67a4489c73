//! Reducer: path-count inputs into per-repository payloads.

use crate::error::StoreResult;
use crate::models::PathRanksRow;
use async_trait::async_trait;
use pathrank_core::{BatchCounts, DerivativeGraphKey};
use time::OffsetDateTime;

#[async_trait]
pub trait ReducerRepo: Send + Sync {
    /// Merge one batch of unprocessed inputs into `path_ranks`.
    ///
    /// `scanned` is the number of inputs consumed and `altered` the number of
    /// `(repository, path)` entries written. Sets `reducer_completed_at` on drain.
    async fn insert_path_ranks(
        &self,
        derivative_key: &DerivativeGraphKey,
        batch_size: u32,
        now: OffsetDateTime,
    ) -> StoreResult<BatchCounts>;

    /// Get the payload row of a repository.
    async fn get_path_ranks(&self, repository_id: i64) -> StoreResult<Option<PathRanksRow>>;
}
