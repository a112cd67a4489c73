//! Mapper: references and seed paths into path-count inputs.

use crate::error::StoreResult;
use crate::models::PathCountInputRow;
use async_trait::async_trait;
use pathrank_core::{BatchCounts, DerivativeGraphKey};
use time::OffsetDateTime;

#[async_trait]
pub trait MapperRepo: Send + Sync {
    /// Reduce one batch of unprocessed references into path-count inputs.
    ///
    /// `scanned` is the number of references this call processed and `altered` the number of
    /// inputs inserted. Sets `mapper_completed_at` once nothing is left to claim.
    async fn insert_path_count_inputs(
        &self,
        derivative_key: &DerivativeGraphKey,
        batch_size: u32,
        now: OffsetDateTime,
    ) -> StoreResult<BatchCounts>;

    /// Reduce one batch of seed paths into zero-count inputs.
    ///
    /// Sets `seed_mapper_completed_at` once nothing is left to claim.
    async fn insert_initial_path_counts(
        &self,
        derivative_key: &DerivativeGraphKey,
        batch_size: u32,
        now: OffsetDateTime,
    ) -> StoreResult<BatchCounts>;

    /// All path-count inputs of an epoch, by id.
    async fn list_path_count_inputs(
        &self,
        derivative_key: &DerivativeGraphKey,
    ) -> StoreResult<Vec<PathCountInputRow>>;
}
