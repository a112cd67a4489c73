//! Bulk ingest of definitions, references and seed paths.

use crate::error::StoreResult;
use async_trait::async_trait;
use pathrank_core::RootGraphKey;
use time::OffsetDateTime;

/// Single-pass stream of `(symbol_name, document_path)` pairs.
pub type DefinitionStream<'a> = &'a mut (dyn Iterator<Item = (String, String)> + Send);

/// Single-pass stream of strings (symbol names or document paths).
pub type NameStream<'a> = &'a mut (dyn Iterator<Item = String> + Send);

/// Every symbol stream of one exported upload.
pub struct ExportSymbols<'a> {
    pub definitions: DefinitionStream<'a>,
    pub references: NameStream<'a>,
    pub paths: NameStream<'a>,
}

#[async_trait]
pub trait IngestRepo: Send + Sync {
    /// Insert definitions of an exported upload, `batch_size` rows per statement group.
    ///
    /// Returns the number of rows inserted. Fails with `NotFound` for an unknown export.
    async fn insert_definitions_for_ranking(
        &self,
        root_key: &RootGraphKey,
        batch_size: usize,
        exported_upload_id: i64,
        definitions: DefinitionStream<'_>,
    ) -> StoreResult<u64>;

    /// Insert referenced symbol names, one de-duplicated row per group of `batch_size` names.
    ///
    /// Returns the number of reference rows inserted.
    async fn insert_references_for_ranking(
        &self,
        root_key: &RootGraphKey,
        batch_size: usize,
        exported_upload_id: i64,
        symbol_names: NameStream<'_>,
    ) -> StoreResult<u64>;

    /// Insert seed document paths, one row per group of `batch_size` paths.
    ///
    /// Returns the number of rows inserted.
    async fn insert_initial_path_ranks(
        &self,
        root_key: &RootGraphKey,
        batch_size: usize,
        exported_upload_id: i64,
        document_paths: NameStream<'_>,
    ) -> StoreResult<u64>;

    /// Insert all symbols of an export and mark it ingested, in one transaction.
    ///
    /// Returns the number of rows inserted, or `None` without inserting anything when the
    /// export was already ingested. Fails with `NotFound` for an unknown export.
    async fn ingest_export(
        &self,
        root_key: &RootGraphKey,
        batch_size: usize,
        exported_upload_id: i64,
        symbols: ExportSymbols<'_>,
        now: OffsetDateTime,
    ) -> StoreResult<Option<u64>>;
}
