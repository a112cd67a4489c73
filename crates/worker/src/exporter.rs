//! Symbol sources feeding the exporter.
//!
//! The exporter claims uploads through the export registry and then asks a [`SymbolSource`]
//! for the definitions, references and seed paths of each claimed upload. The shipped
//! implementation reads one JSON document per upload from a directory:
//!
//! ```json
//! {
//!   "definitions": [{"symbol": "foo", "path": "foo.go"}],
//!   "references": ["foo", "bar"],
//!   "paths": ["foo.go", "README.md"]
//! }
//! ```

use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use pathrank_core::RootGraphKey;
use pathrank_store::RankingStore;
use pathrank_store::models::ExportedUploadRow;
use pathrank_store::repos::ingest::ExportSymbols;
use serde::Deserialize;
use std::path::PathBuf;
use time::OffsetDateTime;

/// Rows per ingest statement group, and symbol names per reference row.
pub const INGEST_BATCH_SIZE: usize = 1000;

/// A symbol defined in a document.
#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionRecord {
    pub symbol: String,
    pub path: String,
}

/// Everything ingested for one upload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadSymbols {
    #[serde(default)]
    pub definitions: Vec<DefinitionRecord>,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Producer of per-upload symbol data.
#[async_trait]
pub trait SymbolSource: Send + Sync {
    /// Load the symbols of an exported upload, or `None` when the source has nothing for it.
    async fn load(&self, export: &ExportedUploadRow) -> JobResult<Option<UploadSymbols>>;
}

/// Reads `<dir>/<upload_id>.json`.
pub struct JsonDirSource {
    dir: PathBuf,
}

impl JsonDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SymbolSource for JsonDirSource {
    async fn load(&self, export: &ExportedUploadRow) -> JobResult<Option<UploadSymbols>> {
        let path = self.dir.join(format!("{}.json", export.upload_id));
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(upload_id = export.upload_id, path = %path.display(), "No symbol file");
                return Ok(None);
            }
            Err(e) => {
                return Err(JobError::Source {
                    upload_id: export.upload_id,
                    message: format!("failed to read {}: {e}", path.display()),
                });
            }
        };

        let symbols = serde_json::from_slice(&data).map_err(|e| JobError::Source {
            upload_id: export.upload_id,
            message: format!("failed to parse {}: {e}", path.display()),
        })?;
        Ok(Some(symbols))
    }
}

/// Insert the symbols of one export under `root_key` and mark the export ingested, all in one
/// transaction.
///
/// Returns the number of rows inserted, or `None` when the export was already ingested.
pub async fn ingest_upload(
    store: &dyn RankingStore,
    root_key: &RootGraphKey,
    export: &ExportedUploadRow,
    symbols: UploadSymbols,
    now: OffsetDateTime,
) -> JobResult<Option<u64>> {
    let mut definitions = symbols
        .definitions
        .into_iter()
        .map(|d| (d.symbol, d.path));
    let mut references = symbols.references.into_iter();
    let mut paths = symbols.paths.into_iter();

    let inserted = store
        .ingest_export(
            root_key,
            INGEST_BATCH_SIZE,
            export.id,
            ExportSymbols {
                definitions: &mut definitions,
                references: &mut references,
                paths: &mut paths,
            },
            now,
        )
        .await?;

    match inserted {
        Some(rows) => tracing::debug!(
            upload_id = export.upload_id,
            exported_upload_id = export.id,
            rows = rows,
            "Ingested upload symbols"
        ),
        None => tracing::debug!(
            upload_id = export.upload_id,
            exported_upload_id = export.id,
            "Upload symbols already ingested"
        ),
    }
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export_row(upload_id: i64) -> ExportedUploadRow {
        ExportedUploadRow {
            id: 1,
            upload_id,
            repository_id: 1,
            root: String::new(),
            indexer: "test".to_string(),
            object_prefix: "ranking".to_string(),
            graph_key: "dev".to_string(),
            deleted_at: None,
            last_scanned_at: None,
            claimed_at: None,
            ingested_at: None,
        }
    }

    #[tokio::test]
    async fn test_json_dir_source_reads_upload_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("42.json"),
            r#"{"definitions":[{"symbol":"foo","path":"foo.go"}],"references":["foo"]}"#,
        )
        .unwrap();

        let source = JsonDirSource::new(dir.path());
        let symbols = source.load(&export_row(42)).await.unwrap().unwrap();
        assert_eq!(symbols.definitions.len(), 1);
        assert_eq!(symbols.definitions[0].path, "foo.go");
        assert_eq!(symbols.references, vec!["foo"]);
        assert!(symbols.paths.is_empty());
    }

    #[tokio::test]
    async fn test_json_dir_source_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let source = JsonDirSource::new(dir.path());
        assert!(source.load(&export_row(7)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_json_dir_source_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("7.json"), b"{not json").unwrap();
        let source = JsonDirSource::new(dir.path());
        let err = source.load(&export_row(7)).await.unwrap_err();
        assert!(matches!(err, JobError::Source { upload_id: 7, .. }));
    }
}
