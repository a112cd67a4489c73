//! Read API used by the downstream ranking consumer.

use crate::error::StoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;

#[async_trait]
pub trait RetrievalRepo: Send + Sync {
    /// Percent rank of the repository's star count among live repositories.
    ///
    /// Unknown repositories rank 0.
    async fn get_star_rank(&self, repo_name: &str) -> StoreResult<f64>;

    /// Path to count of the repository's payload, or `None` when it has none.
    async fn get_document_ranks(&self, repo_name: &str)
    -> StoreResult<Option<HashMap<String, f64>>>;

    /// Mean of `ln(count + 1)` over every payload entry of every repository.
    async fn get_reference_count_statistics(&self) -> StoreResult<f64>;

    /// When each of the given repositories last had its payload written.
    async fn last_updated_at(&self, repository_ids: &[i64])
    -> StoreResult<HashMap<i64, OffsetDateTime>>;
}
