//! Source tables owned by the indexing pipeline.
//!
//! The ranking pipeline only reads these. The writes exist so tests and local deployments
//! can stand in for the producer.

use crate::error::StoreResult;
use crate::models::{RepoRow, UploadRow};
use async_trait::async_trait;
use time::OffsetDateTime;

#[async_trait]
pub trait SourceRepo: Send + Sync {
    /// Insert or update a repository.
    async fn upsert_repo(&self, id: i64, name: &str, stars: i64) -> StoreResult<()>;

    /// Get a repository by name.
    async fn get_repo_by_name(&self, name: &str) -> StoreResult<Option<RepoRow>>;

    /// Mark a repository deleted.
    async fn soft_delete_repo(&self, id: i64, now: OffsetDateTime) -> StoreResult<()>;

    /// Block or unblock a repository.
    async fn set_repo_blocked(&self, id: i64, blocked: bool) -> StoreResult<()>;

    /// Insert an upload.
    async fn insert_upload(&self, upload: &UploadRow) -> StoreResult<()>;

    /// Replace the set of uploads visible at the default-branch tip of a repository.
    async fn set_visible_uploads(&self, repository_id: i64, upload_ids: &[i64])
    -> StoreResult<()>;
}
