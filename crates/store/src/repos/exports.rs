//! Export registry.

use crate::error::StoreResult;
use crate::models::ExportedUploadRow;
use async_trait::async_trait;
use pathrank_core::RootGraphKey;
use time::OffsetDateTime;

#[async_trait]
pub trait ExportRepo: Send + Sync {
    /// Snapshot up to `batch_size` uploads into the export set of `root_key`.
    ///
    /// Candidates are visible at the default-branch tip, belong to a live repository and have
    /// no export row for `root_key` yet. Only rows inserted by this call are returned, so
    /// concurrent callers never receive the same upload. New rows are claimed at `now`.
    async fn select_uploads_for_export(
        &self,
        root_key: &RootGraphKey,
        object_prefix: &str,
        batch_size: u32,
        now: OffsetDateTime,
    ) -> StoreResult<Vec<ExportedUploadRow>>;

    /// Claim again up to `batch_size` live exports whose symbols were never ingested and whose
    /// last claim happened before `claimed_before`.
    async fn reclaim_pending_exports(
        &self,
        root_key: &RootGraphKey,
        batch_size: u32,
        claimed_before: OffsetDateTime,
        now: OffsetDateTime,
    ) -> StoreResult<Vec<ExportedUploadRow>>;

    /// Get an exported upload by id.
    async fn get_exported_upload(&self, id: i64) -> StoreResult<Option<ExportedUploadRow>>;
}
