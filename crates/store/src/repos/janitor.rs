//! Janitor: soft deletion and hard vacuums.

use crate::error::StoreResult;
use crate::models::EpochRowCounts;
use async_trait::async_trait;
use pathrank_core::{BatchCounts, DerivativeGraphKey, RootGraphKey};
use time::{Duration, OffsetDateTime};

/// Root-keyed tables subject to soft deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankingTable {
    Definitions,
    References,
    InitialPaths,
    ExportedUploads,
}

impl RankingTable {
    pub const ALL: [RankingTable; 4] = [
        Self::Definitions,
        Self::References,
        Self::InitialPaths,
        Self::ExportedUploads,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Definitions => "ranking_definitions",
            Self::References => "ranking_references",
            Self::InitialPaths => "ranking_initial_path_ranks",
            Self::ExportedUploads => "ranking_exported_uploads",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Definitions => "definitions",
            Self::References => "references",
            Self::InitialPaths => "initial_paths",
            Self::ExportedUploads => "exported_uploads",
        }
    }
}

#[async_trait]
pub trait JanitorRepo: Send + Sync {
    /// Rescan live rows not scanned within `threshold` and soft-delete those whose upload is no
    /// longer visible at the default-branch tip.
    async fn soft_delete_stale(
        &self,
        table: RankingTable,
        root_key: &RootGraphKey,
        batch_size: u32,
        threshold: Duration,
        now: OffsetDateTime,
    ) -> StoreResult<BatchCounts>;

    /// Hard-delete soft-deleted rows that no incomplete epoch of the root can still see.
    ///
    /// Exported uploads are only removed once nothing points at them.
    async fn vacuum_deleted(
        &self,
        table: RankingTable,
        root_key: &RootGraphKey,
        batch_size: u32,
    ) -> StoreResult<BatchCounts>;

    /// Hard-delete rows keyed by any other root, and progress rows outside this root.
    async fn vacuum_abandoned(
        &self,
        root_key: &RootGraphKey,
        batch_size: u32,
    ) -> StoreResult<BatchCounts>;

    /// Hard-delete inputs and processed markers of other epochs whose mapping has completed.
    ///
    /// Progress rows of superseded epochs whose mapping never completed are dropped first, since
    /// no job will ever finish them; their intermediates then go with the rest.
    async fn vacuum_stale_graphs(
        &self,
        derivative_key: &DerivativeGraphKey,
        batch_size: u32,
    ) -> StoreResult<BatchCounts>;

    /// Delete payloads that are neither current nor from the most recent prior epoch.
    async fn vacuum_stale_ranks(
        &self,
        derivative_key: &DerivativeGraphKey,
        batch_size: u32,
    ) -> StoreResult<BatchCounts>;

    /// Number of rows of `table` keyed by `root_key`, as `(live, soft_deleted)`.
    async fn count_rows(
        &self,
        table: RankingTable,
        root_key: &RootGraphKey,
    ) -> StoreResult<(u64, u64)>;

    /// Row counts of the intermediate tables of an epoch.
    async fn count_epoch_rows(
        &self,
        derivative_key: &DerivativeGraphKey,
    ) -> StoreResult<EpochRowCounts>;
}

/// Pick the payload key to keep besides the current one: the highest-bucket key of the same
/// root that the current epoch supersedes. A bumped generation sharing the current bucket
/// counts as prior.
pub fn previous_epoch_key<'a, I>(current: &DerivativeGraphKey, keys: I) -> Option<DerivativeGraphKey>
where
    I: IntoIterator<Item = &'a str>,
{
    prior_siblings(current, keys)
        .max_by(|(a, ka), (b, kb)| {
            // Within a bucket, a longer key carries a larger generation number.
            a.cmp(b)
                .then_with(|| ka.as_str().len().cmp(&kb.as_str().len()))
                .then_with(|| ka.cmp(kb))
        })
        .map(|(_, k)| k)
}

/// Keys of the same root that the current epoch supersedes.
pub fn superseded_epoch_keys<'a, I>(current: &DerivativeGraphKey, keys: I) -> Vec<DerivativeGraphKey>
where
    I: IntoIterator<Item = &'a str>,
{
    prior_siblings(current, keys).map(|(_, k)| k).collect()
}

fn prior_siblings<'a, I>(
    current: &DerivativeGraphKey,
    keys: I,
) -> impl Iterator<Item = (i64, DerivativeGraphKey)>
where
    I: IntoIterator<Item = &'a str>,
{
    let root = current.root().ok();
    let current_bucket = current.bucket();
    let current = current.clone();
    keys.into_iter()
        .map(DerivativeGraphKey::from_stored)
        .filter(move |k| *k != current && root.as_ref().is_some_and(|r| r.owns(k)))
        .filter_map(|k| k.bucket().map(|b| (b, k)))
        .filter(move |(b, _)| current_bucket.is_none_or(|c| *b <= c))
}
