//! Database models mapping to the ranking schema.

use pathrank_core::mapper::{ClaimedReference, ResolvedDefinition};
use pathrank_core::{DerivativeGraphKey, PathPayload, ProgressState};
use sqlx::FromRow;
use sqlx::types::Json;
use time::OffsetDateTime;

// =============================================================================
// Source tables
// =============================================================================

/// Repository record.
#[derive(Debug, Clone, FromRow)]
pub struct RepoRow {
    pub id: i64,
    pub name: String,
    pub stars: i64,
    pub deleted_at: Option<OffsetDateTime>,
    pub blocked: bool,
}

/// Upload record as produced by the indexing pipeline.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub id: i64,
    pub repository_id: i64,
    pub root: String,
    pub indexer: String,
    pub state: String,
    pub finished_at: Option<OffsetDateTime>,
}

impl UploadRow {
    /// A completed upload with empty root and indexer.
    pub fn completed(id: i64, repository_id: i64) -> Self {
        Self {
            id,
            repository_id,
            root: String::new(),
            indexer: String::new(),
            state: "completed".to_string(),
            finished_at: None,
        }
    }
}

// =============================================================================
// Export registry and ingest
// =============================================================================

/// Upload snapshotted into the export set of a root graph key.
#[derive(Debug, Clone, FromRow)]
pub struct ExportedUploadRow {
    pub id: i64,
    pub upload_id: i64,
    pub repository_id: i64,
    pub root: String,
    pub indexer: String,
    pub object_prefix: String,
    pub graph_key: String,
    pub deleted_at: Option<OffsetDateTime>,
    pub last_scanned_at: Option<OffsetDateTime>,
    /// Last time an exporter took this row; a pending row is retried once this grows old.
    pub claimed_at: Option<OffsetDateTime>,
    /// Set in the transaction that inserted the upload's symbols.
    pub ingested_at: Option<OffsetDateTime>,
}

// =============================================================================
// Progress
// =============================================================================

/// Per-epoch progress record.
#[derive(Debug, Clone, FromRow)]
pub struct ProgressRow {
    pub id: i64,
    pub graph_key: String,
    pub max_definition_id: i64,
    pub max_reference_id: i64,
    pub max_path_id: i64,
    pub mappers_started_at: OffsetDateTime,
    pub mapper_completed_at: Option<OffsetDateTime>,
    pub seed_mapper_completed_at: Option<OffsetDateTime>,
    pub reducer_started_at: Option<OffsetDateTime>,
    pub reducer_completed_at: Option<OffsetDateTime>,
    pub num_path_records_total: i64,
    pub num_reference_records_total: i64,
    pub num_count_records_total: i64,
    pub num_path_records_processed: i64,
    pub num_reference_records_processed: i64,
    pub num_count_records_processed: i64,
}

/// Operator-bumped generation of the derivative key of a root.
#[derive(Debug, Clone, FromRow)]
pub struct GraphKeyGenerationRow {
    pub id: i64,
    pub graph_key: String,
    pub created_at: OffsetDateTime,
}

/// How much of the eligible upload set the current epoch covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoverageCounts {
    /// Uploads visible at a default-branch tip of a live repository.
    pub num_target_indexes: u64,
    /// Of those, uploads exported and ingested under the root key.
    pub num_exported_indexes: u64,
    /// Repositories whose payload was written by the epoch asked about.
    pub num_repositories_with_current_ranks: u64,
}

impl ProgressRow {
    pub fn state(&self) -> ProgressState {
        ProgressState::from_timestamps(
            self.mapper_completed_at,
            self.seed_mapper_completed_at,
            self.reducer_started_at,
            self.reducer_completed_at,
        )
    }
}

// =============================================================================
// Mapper and reducer
// =============================================================================

/// Reference row claimed by the mapper, joined with its upload.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ClaimedReferenceRow {
    pub id: i64,
    pub upload_id: i64,
    pub repository_id: i64,
    pub root: String,
    pub indexer: String,
    pub finished_at: Option<OffsetDateTime>,
    pub symbol_names: Json<Vec<String>>,
}

impl From<ClaimedReferenceRow> for ClaimedReference {
    fn from(row: ClaimedReferenceRow) -> Self {
        ClaimedReference {
            id: row.id,
            upload_id: row.upload_id,
            repository_id: row.repository_id,
            root: row.root,
            indexer: row.indexer,
            finished_at: row.finished_at,
            symbol_names: row.symbol_names.0,
        }
    }
}

/// Definition row matching a referenced symbol.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ResolvedDefinitionRow {
    pub upload_id: i64,
    pub repository_id: i64,
    pub root: String,
    pub indexer: String,
    pub symbol_name: String,
    pub document_path: String,
}

impl From<ResolvedDefinitionRow> for ResolvedDefinition {
    fn from(row: ResolvedDefinitionRow) -> Self {
        ResolvedDefinition {
            upload_id: row.upload_id,
            repository_id: row.repository_id,
            root: row.root,
            indexer: row.indexer,
            symbol_name: row.symbol_name,
            document_path: row.document_path,
        }
    }
}

/// Seed-path row claimed by the seed mapper.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ClaimedInitialPathsRow {
    pub id: i64,
    pub repository_id: i64,
    pub document_paths: Json<Vec<String>>,
}

/// Intermediate `(repository, path, count)` record.
#[derive(Debug, Clone, FromRow)]
pub struct PathCountInputRow {
    pub id: i64,
    pub repository_id: i64,
    pub document_path: String,
    pub count: i64,
    pub graph_key: String,
    pub processed: bool,
}

/// Final per-repository rank payload.
#[derive(Debug, Clone, FromRow)]
pub struct PathRanksRow {
    pub repository_id: i64,
    pub graph_key: String,
    pub payload: Json<PathPayload>,
    pub updated_at: OffsetDateTime,
}

impl PathRanksRow {
    pub fn derivative_key(&self) -> DerivativeGraphKey {
        DerivativeGraphKey::from_stored(self.graph_key.clone())
    }
}

/// Row counts of the intermediate tables of one epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochRowCounts {
    pub path_count_inputs: u64,
    pub references_processed: u64,
    pub initial_paths_processed: u64,
}
