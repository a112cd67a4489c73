//! Ranking store trait and the SQLite implementation.

use crate::error::StoreResult;
use crate::repos::{
    CoordinatorRepo, ExportRepo, IngestRepo, JanitorRepo, MapperRepo, ReducerRepo, RetrievalRepo,
    SourceRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined ranking store trait.
#[async_trait]
pub trait RankingStore:
    SourceRepo
    + ExportRepo
    + IngestRepo
    + CoordinatorRepo
    + MapperRepo
    + ReducerRepo
    + JanitorRepo
    + RetrievalRepo
    + Send
    + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> StoreResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> StoreResult<()>;
}

/// SQLite-based ranking store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>, query_timeout_secs: Option<u64>) -> StoreResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // A single connection serializes every transaction, which is what makes the
            // mapper and reducer claims exclusive on SQLite.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            query_timeout_secs = query_timeout_secs,
            "SQLite query timeout is advisory only and all workers share one writer. \
             Use PostgreSQL when several worker processes run against the same store."
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl RankingStore for SqliteStore {
    async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Implement all the repository traits for SqliteStore
mod sqlite_impl {
    use super::*;
    use crate::error::StoreError;
    use crate::models::*;
    use crate::repos::RankingTable;
    use crate::repos::ingest::{DefinitionStream, ExportSymbols, NameStream};
    use crate::repos::janitor::{previous_epoch_key, superseded_epoch_keys};
    use pathrank_core::mapper::{
        ClaimedReference, PathCount, count_paths, rank_definitions, referenced_symbols,
        seed_counts, surviving_references,
    };
    use pathrank_core::payload::merge_into;
    use pathrank_core::retrieval::{mean_log_count, percent_rank_from_counts};
    use pathrank_core::{
        BatchCounts, BatchesExt, DerivativeGraphKey, PathPayload, RootGraphKey,
    };
    use sqlx::types::Json;
    use sqlx::{QueryBuilder, SqliteConnection};
    use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
    use time::OffsetDateTime;

    /// Rows per multi-row INSERT, well below SQLite's bound-parameter limit.
    const INSERT_CHUNK_ROWS: usize = 500;

    async fn load_progress(
        conn: &mut SqliteConnection,
        graph_key: &str,
    ) -> StoreResult<Option<ProgressRow>> {
        let row = sqlx::query_as::<_, ProgressRow>(
            "SELECT * FROM ranking_progress WHERE graph_key = ?",
        )
        .bind(graph_key)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row)
    }

    async fn upload_id_for_export(
        conn: &mut SqliteConnection,
        exported_upload_id: i64,
    ) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT upload_id FROM ranking_exported_uploads WHERE id = ?")
            .bind(exported_upload_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("exported upload {exported_upload_id}")))
    }

    async fn insert_inputs(
        conn: &mut SqliteConnection,
        graph_key: &str,
        counts: &[PathCount],
    ) -> StoreResult<()> {
        for chunk in counts.chunks(INSERT_CHUNK_ROWS) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO ranking_path_count_inputs (repository_id, document_path, count, graph_key) ",
            );
            builder.push_values(chunk, |mut b, input| {
                b.push_bind(input.repository_id)
                    .push_bind(&input.document_path)
                    .push_bind(input.count)
                    .push_bind(graph_key);
            });
            builder.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    #[async_trait]
    impl SourceRepo for SqliteStore {
        async fn upsert_repo(&self, id: i64, name: &str, stars: i64) -> StoreResult<()> {
            sqlx::query(
                r#"
                INSERT INTO repos (id, name, stars) VALUES (?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET name = excluded.name, stars = excluded.stars
                "#,
            )
            .bind(id)
            .bind(name)
            .bind(stars)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_repo_by_name(&self, name: &str) -> StoreResult<Option<RepoRow>> {
            let row = sqlx::query_as::<_, RepoRow>(
                "SELECT id, name, stars, deleted_at, blocked FROM repos WHERE name = ?",
            )
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn soft_delete_repo(&self, id: i64, now: OffsetDateTime) -> StoreResult<()> {
            sqlx::query("UPDATE repos SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL")
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn set_repo_blocked(&self, id: i64, blocked: bool) -> StoreResult<()> {
            sqlx::query("UPDATE repos SET blocked = ? WHERE id = ?")
                .bind(blocked)
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn insert_upload(&self, upload: &UploadRow) -> StoreResult<()> {
            sqlx::query(
                r#"
                INSERT INTO uploads (id, repository_id, root, indexer, state, finished_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(upload.id)
            .bind(upload.repository_id)
            .bind(&upload.root)
            .bind(&upload.indexer)
            .bind(&upload.state)
            .bind(upload.finished_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn set_visible_uploads(
            &self,
            repository_id: i64,
            upload_ids: &[i64],
        ) -> StoreResult<()> {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM uploads_visible_at_tip WHERE repository_id = ?")
                .bind(repository_id)
                .execute(&mut *tx)
                .await?;
            for upload_id in upload_ids {
                sqlx::query(
                    "INSERT INTO uploads_visible_at_tip (repository_id, upload_id, is_default_branch) VALUES (?, ?, TRUE)",
                )
                .bind(repository_id)
                .bind(upload_id)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        }
    }

    #[async_trait]
    impl ExportRepo for SqliteStore {
        async fn select_uploads_for_export(
            &self,
            root_key: &RootGraphKey,
            object_prefix: &str,
            batch_size: u32,
            now: OffsetDateTime,
        ) -> StoreResult<Vec<ExportedUploadRow>> {
            let mut tx = self.pool.begin().await?;

            let candidates: Vec<(i64, i64, String, String)> = sqlx::query_as(
                r#"
                SELECT u.id, u.repository_id, u.root, u.indexer
                FROM uploads u
                JOIN repos r ON r.id = u.repository_id
                WHERE r.deleted_at IS NULL
                  AND EXISTS (
                    SELECT 1 FROM uploads_visible_at_tip v
                    WHERE v.upload_id = u.id AND v.is_default_branch
                  )
                  AND NOT EXISTS (
                    SELECT 1 FROM ranking_exported_uploads e
                    WHERE e.upload_id = u.id AND e.graph_key = ?
                  )
                ORDER BY u.id
                LIMIT ?
                "#,
            )
            .bind(root_key.as_str())
            .bind(i64::from(batch_size))
            .fetch_all(&mut *tx)
            .await?;

            let mut exported = Vec::with_capacity(candidates.len());
            for (upload_id, repository_id, root, indexer) in candidates {
                let row = sqlx::query_as::<_, ExportedUploadRow>(
                    r#"
                    INSERT INTO ranking_exported_uploads
                        (upload_id, repository_id, root, indexer, object_prefix, graph_key, claimed_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT (upload_id, graph_key) DO NOTHING
                    RETURNING *
                    "#,
                )
                .bind(upload_id)
                .bind(repository_id)
                .bind(&root)
                .bind(&indexer)
                .bind(object_prefix)
                .bind(root_key.as_str())
                .bind(now)
                .fetch_optional(&mut *tx)
                .await?;
                exported.extend(row);
            }

            tx.commit().await?;
            Ok(exported)
        }

        async fn reclaim_pending_exports(
            &self,
            root_key: &RootGraphKey,
            batch_size: u32,
            claimed_before: OffsetDateTime,
            now: OffsetDateTime,
        ) -> StoreResult<Vec<ExportedUploadRow>> {
            let rows = sqlx::query_as::<_, ExportedUploadRow>(
                r#"
                UPDATE ranking_exported_uploads
                SET claimed_at = ?
                WHERE id IN (
                    SELECT id FROM ranking_exported_uploads
                    WHERE graph_key = ?
                      AND deleted_at IS NULL
                      AND ingested_at IS NULL
                      AND (claimed_at IS NULL OR claimed_at < ?)
                    ORDER BY id
                    LIMIT ?
                )
                RETURNING *
                "#,
            )
            .bind(now)
            .bind(root_key.as_str())
            .bind(claimed_before)
            .bind(i64::from(batch_size))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_exported_upload(&self, id: i64) -> StoreResult<Option<ExportedUploadRow>> {
            let row = sqlx::query_as::<_, ExportedUploadRow>(
                "SELECT * FROM ranking_exported_uploads WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }
    }

    async fn insert_definition_rows(
        conn: &mut SqliteConnection,
        root_key: &RootGraphKey,
        batch_size: usize,
        exported_upload_id: i64,
        upload_id: i64,
        definitions: DefinitionStream<'_>,
    ) -> StoreResult<u64> {
        let mut inserted = 0u64;
        for batch in definitions.batches(batch_size.min(INSERT_CHUNK_ROWS)) {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO ranking_definitions (exported_upload_id, upload_id, symbol_name, document_path, graph_key) ",
            );
            builder.push_values(&batch, |mut b, (symbol_name, document_path)| {
                b.push_bind(exported_upload_id)
                    .push_bind(upload_id)
                    .push_bind(symbol_name)
                    .push_bind(document_path)
                    .push_bind(root_key.as_str());
            });
            inserted += builder.build().execute(&mut *conn).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_reference_rows(
        conn: &mut SqliteConnection,
        root_key: &RootGraphKey,
        batch_size: usize,
        exported_upload_id: i64,
        upload_id: i64,
        symbol_names: NameStream<'_>,
    ) -> StoreResult<u64> {
        let mut inserted = 0u64;
        for batch in symbol_names.batches(batch_size) {
            let names: Vec<String> = batch.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
            sqlx::query(
                r#"
                INSERT INTO ranking_references (exported_upload_id, upload_id, symbol_names, graph_key)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(exported_upload_id)
            .bind(upload_id)
            .bind(Json(&names))
            .bind(root_key.as_str())
            .execute(&mut *conn)
            .await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_initial_path_rows(
        conn: &mut SqliteConnection,
        root_key: &RootGraphKey,
        batch_size: usize,
        exported_upload_id: i64,
        upload_id: i64,
        document_paths: NameStream<'_>,
    ) -> StoreResult<u64> {
        let mut inserted = 0u64;
        for paths in document_paths.batches(batch_size) {
            sqlx::query(
                r#"
                INSERT INTO ranking_initial_path_ranks (exported_upload_id, upload_id, document_paths, graph_key)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(exported_upload_id)
            .bind(upload_id)
            .bind(Json(&paths))
            .bind(root_key.as_str())
            .execute(&mut *conn)
            .await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    #[async_trait]
    impl IngestRepo for SqliteStore {
        async fn insert_definitions_for_ranking(
            &self,
            root_key: &RootGraphKey,
            batch_size: usize,
            exported_upload_id: i64,
            definitions: DefinitionStream<'_>,
        ) -> StoreResult<u64> {
            let mut tx = self.pool.begin().await?;
            let upload_id = upload_id_for_export(&mut tx, exported_upload_id).await?;
            let inserted = insert_definition_rows(
                &mut tx,
                root_key,
                batch_size,
                exported_upload_id,
                upload_id,
                definitions,
            )
            .await?;
            tx.commit().await?;
            Ok(inserted)
        }

        async fn insert_references_for_ranking(
            &self,
            root_key: &RootGraphKey,
            batch_size: usize,
            exported_upload_id: i64,
            symbol_names: NameStream<'_>,
        ) -> StoreResult<u64> {
            let mut tx = self.pool.begin().await?;
            let upload_id = upload_id_for_export(&mut tx, exported_upload_id).await?;
            let inserted = insert_reference_rows(
                &mut tx,
                root_key,
                batch_size,
                exported_upload_id,
                upload_id,
                symbol_names,
            )
            .await?;
            tx.commit().await?;
            Ok(inserted)
        }

        async fn insert_initial_path_ranks(
            &self,
            root_key: &RootGraphKey,
            batch_size: usize,
            exported_upload_id: i64,
            document_paths: NameStream<'_>,
        ) -> StoreResult<u64> {
            let mut tx = self.pool.begin().await?;
            let upload_id = upload_id_for_export(&mut tx, exported_upload_id).await?;
            let inserted = insert_initial_path_rows(
                &mut tx,
                root_key,
                batch_size,
                exported_upload_id,
                upload_id,
                document_paths,
            )
            .await?;
            tx.commit().await?;
            Ok(inserted)
        }

        async fn ingest_export(
            &self,
            root_key: &RootGraphKey,
            batch_size: usize,
            exported_upload_id: i64,
            symbols: ExportSymbols<'_>,
            now: OffsetDateTime,
        ) -> StoreResult<Option<u64>> {
            let mut tx = self.pool.begin().await?;
            let upload_id = upload_id_for_export(&mut tx, exported_upload_id).await?;

            let marked = sqlx::query(
                "UPDATE ranking_exported_uploads SET ingested_at = ? WHERE id = ? AND ingested_at IS NULL",
            )
            .bind(now)
            .bind(exported_upload_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            if marked == 0 {
                return Ok(None);
            }

            let mut inserted = insert_definition_rows(
                &mut tx,
                root_key,
                batch_size,
                exported_upload_id,
                upload_id,
                symbols.definitions,
            )
            .await?;
            inserted += insert_reference_rows(
                &mut tx,
                root_key,
                batch_size,
                exported_upload_id,
                upload_id,
                symbols.references,
            )
            .await?;
            inserted += insert_initial_path_rows(
                &mut tx,
                root_key,
                batch_size,
                exported_upload_id,
                upload_id,
                symbols.paths,
            )
            .await?;

            tx.commit().await?;
            Ok(Some(inserted))
        }
    }

    #[async_trait]
    impl CoordinatorRepo for SqliteStore {
        async fn start_mapper_phase(
            &self,
            derivative_key: &DerivativeGraphKey,
            now: OffsetDateTime,
        ) -> StoreResult<bool> {
            let root = derivative_key.root()?;
            let result = sqlx::query(
                r#"
                INSERT INTO ranking_progress (
                    graph_key,
                    max_definition_id, max_reference_id, max_path_id,
                    mappers_started_at,
                    num_path_records_total, num_reference_records_total, num_count_records_total,
                    num_path_records_processed, num_reference_records_processed, num_count_records_processed
                )
                VALUES (
                    ?,
                    (SELECT COALESCE(MAX(id), 0) FROM ranking_definitions WHERE graph_key = ?),
                    (SELECT COALESCE(MAX(id), 0) FROM ranking_references WHERE graph_key = ?),
                    (SELECT COALESCE(MAX(id), 0) FROM ranking_initial_path_ranks WHERE graph_key = ?),
                    ?,
                    (SELECT COUNT(*) FROM ranking_initial_path_ranks WHERE graph_key = ? AND deleted_at IS NULL),
                    (SELECT COUNT(*) FROM ranking_references WHERE graph_key = ? AND deleted_at IS NULL),
                    0,
                    0, 0, 0
                )
                ON CONFLICT (graph_key) DO NOTHING
                "#,
            )
            .bind(derivative_key.as_str())
            .bind(root.as_str())
            .bind(root.as_str())
            .bind(root.as_str())
            .bind(now)
            .bind(root.as_str())
            .bind(root.as_str())
            .execute(&self.pool)
            .await?;

            let created = result.rows_affected() > 0;
            if created {
                tracing::info!(graph_key = %derivative_key, "Started mapper phase");
            }
            Ok(created)
        }

        async fn start_reducer_phase(
            &self,
            derivative_key: &DerivativeGraphKey,
            now: OffsetDateTime,
        ) -> StoreResult<bool> {
            derivative_key.root()?;
            let result = sqlx::query(
                r#"
                UPDATE ranking_progress
                SET reducer_started_at = ?,
                    num_count_records_total = (
                        SELECT COUNT(*) FROM ranking_path_count_inputs WHERE graph_key = ?
                    )
                WHERE graph_key = ?
                  AND mapper_completed_at IS NOT NULL
                  AND seed_mapper_completed_at IS NOT NULL
                  AND reducer_started_at IS NULL
                "#,
            )
            .bind(now)
            .bind(derivative_key.as_str())
            .bind(derivative_key.as_str())
            .execute(&self.pool)
            .await?;

            let started = result.rows_affected() > 0;
            if started {
                tracing::info!(graph_key = %derivative_key, "Started reducer phase");
            }
            Ok(started)
        }

        async fn progress(
            &self,
            derivative_key: &DerivativeGraphKey,
        ) -> StoreResult<Option<ProgressRow>> {
            let mut conn = self.pool.acquire().await?;
            load_progress(&mut conn, derivative_key.as_str()).await
        }

        async fn summaries(&self) -> StoreResult<Vec<ProgressRow>> {
            let rows = sqlx::query_as::<_, ProgressRow>(
                "SELECT * FROM ranking_progress ORDER BY mappers_started_at DESC, id DESC",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn delete_ranking_progress(
            &self,
            derivative_key: &DerivativeGraphKey,
        ) -> StoreResult<u64> {
            let result = sqlx::query("DELETE FROM ranking_progress WHERE graph_key = ?")
                .bind(derivative_key.as_str())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        }

        async fn derivative_graph_key_generation(
            &self,
            root_key: &RootGraphKey,
        ) -> StoreResult<Option<GraphKeyGenerationRow>> {
            let row = sqlx::query_as::<_, GraphKeyGenerationRow>(
                "SELECT * FROM ranking_graph_key_generations WHERE graph_key = ? ORDER BY id DESC LIMIT 1",
            )
            .bind(root_key.as_str())
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn bump_derivative_graph_key(
            &self,
            root_key: &RootGraphKey,
            now: OffsetDateTime,
        ) -> StoreResult<GraphKeyGenerationRow> {
            let row = sqlx::query_as::<_, GraphKeyGenerationRow>(
                "INSERT INTO ranking_graph_key_generations (graph_key, created_at) VALUES (?, ?) RETURNING *",
            )
            .bind(root_key.as_str())
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
            tracing::info!(graph_key = %root_key, generation = row.id, "Bumped derivative graph key");
            Ok(row)
        }

        async fn coverage_counts(
            &self,
            derivative_key: &DerivativeGraphKey,
        ) -> StoreResult<CoverageCounts> {
            let root = derivative_key.root()?;
            let (targets, exported, ranked): (i64, i64, i64) = sqlx::query_as(
                r#"
                WITH targets AS (
                    SELECT DISTINCT u.id
                    FROM uploads u
                    JOIN repos r ON r.id = u.repository_id
                    JOIN uploads_visible_at_tip v ON v.upload_id = u.id AND v.is_default_branch
                    WHERE r.deleted_at IS NULL
                )
                SELECT
                    (SELECT COUNT(*) FROM targets),
                    (SELECT COUNT(*) FROM targets t
                     WHERE EXISTS (
                        SELECT 1 FROM ranking_exported_uploads e
                        WHERE e.upload_id = t.id
                          AND e.graph_key = ?
                          AND e.deleted_at IS NULL
                          AND e.ingested_at IS NOT NULL
                     )),
                    (SELECT COUNT(*) FROM path_ranks WHERE graph_key = ?)
                "#,
            )
            .bind(root.as_str())
            .bind(derivative_key.as_str())
            .fetch_one(&self.pool)
            .await?;

            Ok(CoverageCounts {
                num_target_indexes: targets.max(0) as u64,
                num_exported_indexes: exported.max(0) as u64,
                num_repositories_with_current_ranks: ranked.max(0) as u64,
            })
        }
    }

    #[async_trait]
    impl MapperRepo for SqliteStore {
        async fn insert_path_count_inputs(
            &self,
            derivative_key: &DerivativeGraphKey,
            batch_size: u32,
            now: OffsetDateTime,
        ) -> StoreResult<BatchCounts> {
            let root = derivative_key.root()?;
            let key = derivative_key.as_str();
            let mut tx = self.pool.begin().await?;

            let Some(progress) = load_progress(&mut tx, key).await? else {
                return Ok(BatchCounts::default());
            };
            if progress.mapper_completed_at.is_some() {
                return Ok(BatchCounts::default());
            }

            let claimed = sqlx::query_as::<_, ClaimedReferenceRow>(
                r#"
                SELECT rr.id, rr.upload_id, u.repository_id, u.root, u.indexer, u.finished_at, rr.symbol_names
                FROM ranking_references rr
                JOIN uploads u ON u.id = rr.upload_id
                WHERE rr.graph_key = ?
                  AND rr.id <= ?
                  AND (rr.deleted_at IS NULL OR rr.deleted_at > ?)
                  AND NOT EXISTS (
                    SELECT 1 FROM ranking_references_processed p
                    WHERE p.graph_key = ? AND p.reference_id = rr.id
                  )
                ORDER BY rr.id
                LIMIT ?
                "#,
            )
            .bind(root.as_str())
            .bind(progress.max_reference_id)
            .bind(progress.mappers_started_at)
            .bind(key)
            .bind(i64::from(batch_size))
            .fetch_all(&mut *tx)
            .await?;

            if claimed.is_empty() {
                let remaining: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM ranking_references rr
                        JOIN uploads u ON u.id = rr.upload_id
                        WHERE rr.graph_key = ?
                          AND rr.id <= ?
                          AND (rr.deleted_at IS NULL OR rr.deleted_at > ?)
                          AND NOT EXISTS (
                            SELECT 1 FROM ranking_references_processed p
                            WHERE p.graph_key = ? AND p.reference_id = rr.id
                          )
                    )
                    "#,
                )
                .bind(root.as_str())
                .bind(progress.max_reference_id)
                .bind(progress.mappers_started_at)
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;

                if !remaining {
                    sqlx::query(
                        "UPDATE ranking_progress SET mapper_completed_at = ? WHERE graph_key = ? AND mapper_completed_at IS NULL",
                    )
                    .bind(now)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                    tracing::info!(graph_key = %derivative_key, "Reference mapper completed");
                }
                tx.commit().await?;
                return Ok(BatchCounts::default());
            }

            let claimed_ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
            let marked: HashSet<i64> = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO ranking_references_processed (graph_key, reference_id)
                SELECT ?, value FROM json_each(?) WHERE true
                ON CONFLICT DO NOTHING
                RETURNING reference_id
                "#,
            )
            .bind(key)
            .bind(Json(&claimed_ids))
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();

            let references: Vec<ClaimedReference> = claimed
                .into_iter()
                .filter(|r| marked.contains(&r.id))
                .map(Into::into)
                .collect();

            let batch_uploads: Vec<i64> = references
                .iter()
                .map(|r| r.upload_id)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let batch_references: Vec<i64> = references.iter().map(|r| r.id).collect();
            let shadowed: HashSet<i64> = sqlx::query_scalar::<_, i64>(
                r#"
                SELECT u.id FROM uploads u
                WHERE u.id IN (SELECT value FROM json_each(?))
                  AND EXISTS (
                    SELECT 1 FROM ranking_references rr
                    JOIN ranking_references_processed p
                      ON p.reference_id = rr.id AND p.graph_key = ? AND p.contributed = 1
                    JOIN ranking_exported_uploads reu
                      ON reu.id = rr.exported_upload_id AND reu.deleted_at IS NULL
                    JOIN uploads u2 ON u2.id = rr.upload_id
                    WHERE rr.graph_key = ?
                      AND u2.id != u.id
                      AND u2.repository_id = u.repository_id
                      AND u2.root = u.root
                      AND u2.indexer = u.indexer
                      AND rr.id NOT IN (SELECT value FROM json_each(?))
                  )
                "#,
            )
            .bind(Json(&batch_uploads))
            .bind(key)
            .bind(root.as_str())
            .bind(Json(&batch_references))
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();

            let survivors = surviving_references(&references, &shadowed);
            let contributing: Vec<i64> = survivors.iter().map(|r| r.id).collect();
            if !contributing.is_empty() {
                sqlx::query(
                    r#"
                    UPDATE ranking_references_processed SET contributed = 1
                    WHERE graph_key = ? AND reference_id IN (SELECT value FROM json_each(?))
                    "#,
                )
                .bind(key)
                .bind(Json(&contributing))
                .execute(&mut *tx)
                .await?;
            }
            let symbols = referenced_symbols(&survivors);

            let mut counts = Vec::new();
            if !symbols.is_empty() {
                let definitions = sqlx::query_as::<_, ResolvedDefinitionRow>(
                    r#"
                    SELECT rd.upload_id, u.repository_id, u.root, u.indexer, rd.symbol_name, rd.document_path
                    FROM ranking_definitions rd
                    JOIN uploads u ON u.id = rd.upload_id
                    WHERE rd.graph_key = ?
                      AND rd.id <= ?
                      AND (rd.deleted_at IS NULL OR rd.deleted_at > ?)
                      AND rd.symbol_name IN (SELECT value FROM json_each(?))
                    "#,
                )
                .bind(root.as_str())
                .bind(progress.max_definition_id)
                .bind(progress.mappers_started_at)
                .bind(Json(&symbols))
                .fetch_all(&mut *tx)
                .await?;

                let ranked = rank_definitions(definitions.into_iter().map(Into::into).collect());
                counts = count_paths(&survivors, &ranked);
                insert_inputs(&mut tx, key, &counts).await?;
            }

            sqlx::query(
                "UPDATE ranking_progress SET num_reference_records_processed = num_reference_records_processed + ? WHERE graph_key = ?",
            )
            .bind(references.len() as i64)
            .bind(key)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;

            tracing::debug!(
                graph_key = %derivative_key,
                references = references.len(),
                shadowed = references.len() - survivors.len(),
                inputs = counts.len(),
                "Mapped reference batch"
            );
            Ok(BatchCounts::new(references.len() as u64, counts.len() as u64))
        }

        async fn insert_initial_path_counts(
            &self,
            derivative_key: &DerivativeGraphKey,
            batch_size: u32,
            now: OffsetDateTime,
        ) -> StoreResult<BatchCounts> {
            let root = derivative_key.root()?;
            let key = derivative_key.as_str();
            let mut tx = self.pool.begin().await?;

            let Some(progress) = load_progress(&mut tx, key).await? else {
                return Ok(BatchCounts::default());
            };
            if progress.seed_mapper_completed_at.is_some() {
                return Ok(BatchCounts::default());
            }

            let claimed = sqlx::query_as::<_, ClaimedInitialPathsRow>(
                r#"
                SELECT pr.id, u.repository_id, pr.document_paths
                FROM ranking_initial_path_ranks pr
                JOIN uploads u ON u.id = pr.upload_id
                WHERE pr.graph_key = ?
                  AND pr.id <= ?
                  AND (pr.deleted_at IS NULL OR pr.deleted_at > ?)
                  AND NOT EXISTS (
                    SELECT 1 FROM ranking_initial_paths_processed p
                    WHERE p.graph_key = ? AND p.path_ranks_id = pr.id
                  )
                ORDER BY pr.id
                LIMIT ?
                "#,
            )
            .bind(root.as_str())
            .bind(progress.max_path_id)
            .bind(progress.mappers_started_at)
            .bind(key)
            .bind(i64::from(batch_size))
            .fetch_all(&mut *tx)
            .await?;

            if claimed.is_empty() {
                let remaining: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM ranking_initial_path_ranks pr
                        JOIN uploads u ON u.id = pr.upload_id
                        WHERE pr.graph_key = ?
                          AND pr.id <= ?
                          AND (pr.deleted_at IS NULL OR pr.deleted_at > ?)
                          AND NOT EXISTS (
                            SELECT 1 FROM ranking_initial_paths_processed p
                            WHERE p.graph_key = ? AND p.path_ranks_id = pr.id
                          )
                    )
                    "#,
                )
                .bind(root.as_str())
                .bind(progress.max_path_id)
                .bind(progress.mappers_started_at)
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;

                if !remaining {
                    sqlx::query(
                        "UPDATE ranking_progress SET seed_mapper_completed_at = ? WHERE graph_key = ? AND seed_mapper_completed_at IS NULL",
                    )
                    .bind(now)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                    tracing::info!(graph_key = %derivative_key, "Seed path mapper completed");
                }
                tx.commit().await?;
                return Ok(BatchCounts::default());
            }

            let claimed_ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
            let marked: HashSet<i64> = sqlx::query_scalar::<_, i64>(
                r#"
                INSERT INTO ranking_initial_paths_processed (graph_key, path_ranks_id)
                SELECT ?, value FROM json_each(?) WHERE true
                ON CONFLICT DO NOTHING
                RETURNING path_ranks_id
                "#,
            )
            .bind(key)
            .bind(Json(&claimed_ids))
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();

            let claimed: Vec<ClaimedInitialPathsRow> = claimed
                .into_iter()
                .filter(|r| marked.contains(&r.id))
                .collect();
            let counts = seed_counts(claimed.iter().flat_map(|row| {
                row.document_paths
                    .0
                    .iter()
                    .map(move |path| (row.repository_id, path.as_str()))
            }));
            insert_inputs(&mut tx, key, &counts).await?;

            sqlx::query(
                "UPDATE ranking_progress SET num_path_records_processed = num_path_records_processed + ? WHERE graph_key = ?",
            )
            .bind(claimed.len() as i64)
            .bind(key)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(BatchCounts::new(claimed.len() as u64, counts.len() as u64))
        }

        async fn list_path_count_inputs(
            &self,
            derivative_key: &DerivativeGraphKey,
        ) -> StoreResult<Vec<PathCountInputRow>> {
            let rows = sqlx::query_as::<_, PathCountInputRow>(
                "SELECT * FROM ranking_path_count_inputs WHERE graph_key = ? ORDER BY id",
            )
            .bind(derivative_key.as_str())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl ReducerRepo for SqliteStore {
        async fn insert_path_ranks(
            &self,
            derivative_key: &DerivativeGraphKey,
            batch_size: u32,
            now: OffsetDateTime,
        ) -> StoreResult<BatchCounts> {
            derivative_key.root()?;
            let key = derivative_key.as_str();
            let mut tx = self.pool.begin().await?;

            let Some(progress) = load_progress(&mut tx, key).await? else {
                return Ok(BatchCounts::default());
            };
            if progress.reducer_started_at.is_none() || progress.reducer_completed_at.is_some() {
                return Ok(BatchCounts::default());
            }

            let claimed = sqlx::query_as::<_, PathCountInputRow>(
                r#"
                SELECT pci.*
                FROM ranking_path_count_inputs pci
                JOIN repos r ON r.id = pci.repository_id
                WHERE pci.graph_key = ?
                  AND NOT pci.processed
                  AND r.deleted_at IS NULL
                  AND NOT r.blocked
                ORDER BY pci.id
                LIMIT ?
                "#,
            )
            .bind(key)
            .bind(i64::from(batch_size))
            .fetch_all(&mut *tx)
            .await?;

            if claimed.is_empty() {
                let remaining: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM ranking_path_count_inputs pci
                        JOIN repos r ON r.id = pci.repository_id
                        WHERE pci.graph_key = ?
                          AND NOT pci.processed
                          AND r.deleted_at IS NULL
                          AND NOT r.blocked
                    )
                    "#,
                )
                .bind(key)
                .fetch_one(&mut *tx)
                .await?;

                if !remaining {
                    sqlx::query(
                        "UPDATE ranking_progress SET reducer_completed_at = ? WHERE graph_key = ? AND reducer_completed_at IS NULL",
                    )
                    .bind(now)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                    tracing::info!(graph_key = %derivative_key, "Reducer completed");
                }
                tx.commit().await?;
                return Ok(BatchCounts::default());
            }

            let claimed_ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
            sqlx::query(
                "UPDATE ranking_path_count_inputs SET processed = TRUE WHERE id IN (SELECT value FROM json_each(?))",
            )
            .bind(Json(&claimed_ids))
            .execute(&mut *tx)
            .await?;

            let mut batches: BTreeMap<i64, PathPayload> = BTreeMap::new();
            for input in &claimed {
                batches
                    .entry(input.repository_id)
                    .or_default()
                    .add(input.document_path.clone(), input.count);
            }

            let mut merged_paths = 0u64;
            for (repository_id, batch) in &batches {
                sqlx::query(
                    r#"
                    INSERT INTO path_ranks (repository_id, graph_key, payload, updated_at)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT (repository_id) DO NOTHING
                    "#,
                )
                .bind(repository_id)
                .bind(key)
                .bind(Json(PathPayload::new()))
                .bind(now)
                .execute(&mut *tx)
                .await?;

                let existing = sqlx::query_as::<_, PathRanksRow>(
                    "SELECT * FROM path_ranks WHERE repository_id = ?",
                )
                .bind(repository_id)
                .fetch_one(&mut *tx)
                .await?;
                let existing_key = existing.derivative_key();
                let payload = merge_into(
                    Some((&existing_key, existing.payload.0)),
                    derivative_key,
                    batch,
                );

                sqlx::query(
                    "UPDATE path_ranks SET graph_key = ?, payload = ?, updated_at = ? WHERE repository_id = ?",
                )
                .bind(key)
                .bind(Json(&payload))
                .bind(now)
                .bind(repository_id)
                .execute(&mut *tx)
                .await?;
                merged_paths += batch.len() as u64;
            }

            sqlx::query(
                "UPDATE ranking_progress SET num_count_records_processed = num_count_records_processed + ? WHERE graph_key = ?",
            )
            .bind(claimed.len() as i64)
            .bind(key)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(BatchCounts::new(claimed.len() as u64, merged_paths))
        }

        async fn get_path_ranks(&self, repository_id: i64) -> StoreResult<Option<PathRanksRow>> {
            let row =
                sqlx::query_as::<_, PathRanksRow>("SELECT * FROM path_ranks WHERE repository_id = ?")
                    .bind(repository_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl JanitorRepo for SqliteStore {
        async fn soft_delete_stale(
            &self,
            table: RankingTable,
            root_key: &RootGraphKey,
            batch_size: u32,
            threshold: time::Duration,
            now: OffsetDateTime,
        ) -> StoreResult<BatchCounts> {
            let name = table.table_name();
            let cutoff = now.checked_sub(threshold).unwrap_or(OffsetDateTime::UNIX_EPOCH);
            let mut tx = self.pool.begin().await?;

            let select = format!(
                r#"
                SELECT t.id,
                       EXISTS (
                         SELECT 1 FROM uploads_visible_at_tip v
                         WHERE v.upload_id = t.upload_id AND v.is_default_branch
                       ) AS visible
                FROM {name} t
                WHERE t.graph_key = ?
                  AND t.deleted_at IS NULL
                  AND (t.last_scanned_at IS NULL OR t.last_scanned_at < ?)
                ORDER BY t.last_scanned_at NULLS FIRST, t.id
                LIMIT ?
                "#
            );
            let candidates: Vec<(i64, bool)> = sqlx::query_as(&select)
                .bind(root_key.as_str())
                .bind(cutoff)
                .bind(i64::from(batch_size))
                .fetch_all(&mut *tx)
                .await?;

            let scanned = candidates.len() as u64;
            let (fresh, stale): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|(_, v)| *v);
            let stale: Vec<i64> = stale.into_iter().map(|(id, _)| id).collect();
            let fresh: Vec<i64> = fresh.into_iter().map(|(id, _)| id).collect();

            let soft_delete = format!(
                "UPDATE {name} SET deleted_at = ?, last_scanned_at = ? WHERE id IN (SELECT value FROM json_each(?))"
            );
            let deleted = sqlx::query(&soft_delete)
                .bind(now)
                .bind(now)
                .bind(Json(&stale))
                .execute(&mut *tx)
                .await?
                .rows_affected();

            let touch = format!(
                "UPDATE {name} SET last_scanned_at = ? WHERE id IN (SELECT value FROM json_each(?))"
            );
            sqlx::query(&touch)
                .bind(now)
                .bind(Json(&fresh))
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
            Ok(BatchCounts::new(scanned, deleted))
        }

        async fn vacuum_deleted(
            &self,
            table: RankingTable,
            root_key: &RootGraphKey,
            batch_size: u32,
        ) -> StoreResult<BatchCounts> {
            let name = table.table_name();
            let (start, end) = root_key.derivative_range();
            let unreferenced = if table == RankingTable::ExportedUploads {
                r#"
                  AND NOT EXISTS (SELECT 1 FROM ranking_definitions d WHERE d.exported_upload_id = t.id)
                  AND NOT EXISTS (SELECT 1 FROM ranking_references r WHERE r.exported_upload_id = t.id)
                  AND NOT EXISTS (SELECT 1 FROM ranking_initial_path_ranks i WHERE i.exported_upload_id = t.id)
                "#
            } else {
                ""
            };
            let sql = format!(
                r#"
                DELETE FROM {name} WHERE id IN (
                    SELECT t.id FROM {name} t
                    WHERE t.graph_key = ?
                      AND t.deleted_at IS NOT NULL
                      AND NOT EXISTS (
                        SELECT 1 FROM ranking_progress p
                        WHERE p.graph_key >= ? AND p.graph_key < ?
                          AND (p.mapper_completed_at IS NULL OR p.seed_mapper_completed_at IS NULL)
                          AND t.deleted_at > p.mappers_started_at
                      )
                      {unreferenced}
                    ORDER BY t.id
                    LIMIT ?
                )
                "#
            );
            let deleted = sqlx::query(&sql)
                .bind(root_key.as_str())
                .bind(&start)
                .bind(&end)
                .bind(i64::from(batch_size))
                .execute(&self.pool)
                .await?
                .rows_affected();
            Ok(BatchCounts::new(deleted, deleted))
        }

        async fn vacuum_abandoned(
            &self,
            root_key: &RootGraphKey,
            batch_size: u32,
        ) -> StoreResult<BatchCounts> {
            let mut tx = self.pool.begin().await?;
            let mut deleted = 0u64;

            for table in RankingTable::ALL {
                let name = table.table_name();
                let sql = format!(
                    "DELETE FROM {name} WHERE id IN (SELECT id FROM {name} WHERE graph_key != ? ORDER BY id LIMIT ?)"
                );
                deleted += sqlx::query(&sql)
                    .bind(root_key.as_str())
                    .bind(i64::from(batch_size))
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
            }

            let (start, end) = root_key.derivative_range();
            deleted += sqlx::query(
                r#"
                DELETE FROM ranking_progress WHERE id IN (
                    SELECT id FROM ranking_progress
                    WHERE graph_key < ? OR graph_key >= ?
                    ORDER BY id
                    LIMIT ?
                )
                "#,
            )
            .bind(&start)
            .bind(&end)
            .bind(i64::from(batch_size))
            .execute(&mut *tx)
            .await?
            .rows_affected();

            tx.commit().await?;
            Ok(BatchCounts::new(deleted, deleted))
        }

        async fn vacuum_stale_graphs(
            &self,
            derivative_key: &DerivativeGraphKey,
            batch_size: u32,
        ) -> StoreResult<BatchCounts> {
            let key = derivative_key.as_str();
            let root = derivative_key.root()?;
            let (start, end) = root.derivative_range();
            let mut tx = self.pool.begin().await?;
            let mut deleted = 0u64;

            let incomplete: Vec<String> = sqlx::query_scalar(
                r#"
                SELECT graph_key FROM ranking_progress
                WHERE graph_key >= ? AND graph_key < ?
                  AND (mapper_completed_at IS NULL OR seed_mapper_completed_at IS NULL)
                "#,
            )
            .bind(&start)
            .bind(&end)
            .fetch_all(&mut *tx)
            .await?;
            let superseded: Vec<String> =
                superseded_epoch_keys(derivative_key, incomplete.iter().map(String::as_str))
                    .into_iter()
                    .map(|k| k.as_str().to_string())
                    .collect();
            if !superseded.is_empty() {
                sqlx::query(
                    "DELETE FROM ranking_progress WHERE graph_key IN (SELECT value FROM json_each(?))",
                )
                .bind(Json(&superseded))
                .execute(&mut *tx)
                .await?;
                tracing::info!(
                    graph_key = %derivative_key,
                    superseded = ?superseded,
                    "Dropped progress of superseded epochs"
                );
            }

            deleted += sqlx::query(
                r#"
                DELETE FROM ranking_path_count_inputs WHERE id IN (
                    SELECT t.id FROM ranking_path_count_inputs t
                    WHERE t.graph_key != ?
                      AND NOT EXISTS (
                        SELECT 1 FROM ranking_progress p
                        WHERE p.graph_key = t.graph_key
                          AND (p.mapper_completed_at IS NULL OR p.seed_mapper_completed_at IS NULL)
                      )
                    ORDER BY t.id
                    LIMIT ?
                )
                "#,
            )
            .bind(key)
            .bind(i64::from(batch_size))
            .execute(&mut *tx)
            .await?
            .rows_affected();

            deleted += sqlx::query(
                r#"
                DELETE FROM ranking_references_processed WHERE (graph_key, reference_id) IN (
                    SELECT t.graph_key, t.reference_id FROM ranking_references_processed t
                    WHERE t.graph_key != ?
                      AND NOT EXISTS (
                        SELECT 1 FROM ranking_progress p
                        WHERE p.graph_key = t.graph_key
                          AND (p.mapper_completed_at IS NULL OR p.seed_mapper_completed_at IS NULL)
                      )
                    LIMIT ?
                )
                "#,
            )
            .bind(key)
            .bind(i64::from(batch_size))
            .execute(&mut *tx)
            .await?
            .rows_affected();

            deleted += sqlx::query(
                r#"
                DELETE FROM ranking_initial_paths_processed WHERE (graph_key, path_ranks_id) IN (
                    SELECT t.graph_key, t.path_ranks_id FROM ranking_initial_paths_processed t
                    WHERE t.graph_key != ?
                      AND NOT EXISTS (
                        SELECT 1 FROM ranking_progress p
                        WHERE p.graph_key = t.graph_key
                          AND (p.mapper_completed_at IS NULL OR p.seed_mapper_completed_at IS NULL)
                      )
                    LIMIT ?
                )
                "#,
            )
            .bind(key)
            .bind(i64::from(batch_size))
            .execute(&mut *tx)
            .await?
            .rows_affected();

            tx.commit().await?;
            Ok(BatchCounts::new(deleted, deleted))
        }

        async fn vacuum_stale_ranks(
            &self,
            derivative_key: &DerivativeGraphKey,
            batch_size: u32,
        ) -> StoreResult<BatchCounts> {
            let root = derivative_key.root()?;
            let (start, end) = root.derivative_range();
            let mut tx = self.pool.begin().await?;

            let keys: Vec<String> = sqlx::query_scalar(
                "SELECT DISTINCT graph_key FROM path_ranks WHERE graph_key >= ? AND graph_key < ?",
            )
            .bind(&start)
            .bind(&end)
            .fetch_all(&mut *tx)
            .await?;
            let keep = previous_epoch_key(derivative_key, keys.iter().map(String::as_str))
                .unwrap_or_else(|| derivative_key.clone());

            let deleted = sqlx::query(
                r#"
                DELETE FROM path_ranks WHERE repository_id IN (
                    SELECT repository_id FROM path_ranks
                    WHERE graph_key != ? AND graph_key != ?
                    ORDER BY repository_id
                    LIMIT ?
                )
                "#,
            )
            .bind(derivative_key.as_str())
            .bind(keep.as_str())
            .bind(i64::from(batch_size))
            .execute(&mut *tx)
            .await?
            .rows_affected();

            tx.commit().await?;
            Ok(BatchCounts::new(deleted, deleted))
        }

        async fn count_rows(
            &self,
            table: RankingTable,
            root_key: &RootGraphKey,
        ) -> StoreResult<(u64, u64)> {
            let name = table.table_name();
            let live_sql =
                format!("SELECT COUNT(*) FROM {name} WHERE graph_key = ? AND deleted_at IS NULL");
            let deleted_sql =
                format!("SELECT COUNT(*) FROM {name} WHERE graph_key = ? AND deleted_at IS NOT NULL");
            let live: i64 = sqlx::query_scalar(&live_sql)
                .bind(root_key.as_str())
                .fetch_one(&self.pool)
                .await?;
            let deleted: i64 = sqlx::query_scalar(&deleted_sql)
                .bind(root_key.as_str())
                .fetch_one(&self.pool)
                .await?;
            Ok((live as u64, deleted as u64))
        }

        async fn count_epoch_rows(
            &self,
            derivative_key: &DerivativeGraphKey,
        ) -> StoreResult<EpochRowCounts> {
            let key = derivative_key.as_str();
            let path_count_inputs: i64 =
                sqlx::query_scalar("SELECT COUNT(*) FROM ranking_path_count_inputs WHERE graph_key = ?")
                    .bind(key)
                    .fetch_one(&self.pool)
                    .await?;
            let references_processed: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM ranking_references_processed WHERE graph_key = ?",
            )
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
            let initial_paths_processed: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM ranking_initial_paths_processed WHERE graph_key = ?",
            )
            .bind(key)
            .fetch_one(&self.pool)
            .await?;
            Ok(EpochRowCounts {
                path_count_inputs: path_count_inputs as u64,
                references_processed: references_processed as u64,
                initial_paths_processed: initial_paths_processed as u64,
            })
        }
    }

    #[async_trait]
    impl RetrievalRepo for SqliteStore {
        async fn get_star_rank(&self, repo_name: &str) -> StoreResult<f64> {
            let counts: Option<(i64, i64)> = sqlx::query_as(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM repos o WHERE o.deleted_at IS NULL AND o.stars < r.stars),
                    (SELECT COUNT(*) FROM repos o WHERE o.deleted_at IS NULL)
                FROM repos r
                WHERE r.name = ? AND r.deleted_at IS NULL
                "#,
            )
            .bind(repo_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(counts
                .map(|(fewer, total)| percent_rank_from_counts(fewer as u64, total as u64))
                .unwrap_or(0.0))
        }

        async fn get_document_ranks(
            &self,
            repo_name: &str,
        ) -> StoreResult<Option<HashMap<String, f64>>> {
            let payload: Option<Json<PathPayload>> = sqlx::query_scalar(
                r#"
                SELECT pr.payload FROM path_ranks pr
                JOIN repos r ON r.id = pr.repository_id
                WHERE r.name = ? AND r.deleted_at IS NULL
                "#,
            )
            .bind(repo_name)
            .fetch_optional(&self.pool)
            .await?;
            Ok(payload.map(|Json(payload)| {
                payload
                    .iter()
                    .map(|(path, count)| (path.to_string(), count as f64))
                    .collect()
            }))
        }

        async fn get_reference_count_statistics(&self) -> StoreResult<f64> {
            let payloads: Vec<Json<PathPayload>> = sqlx::query_scalar("SELECT payload FROM path_ranks")
                .fetch_all(&self.pool)
                .await?;
            Ok(mean_log_count(
                payloads.iter().flat_map(|Json(p)| p.iter().map(|(_, count)| count)),
            ))
        }

        async fn last_updated_at(
            &self,
            repository_ids: &[i64],
        ) -> StoreResult<HashMap<i64, OffsetDateTime>> {
            let rows: Vec<(i64, OffsetDateTime)> = sqlx::query_as(
                r#"
                SELECT repository_id, updated_at FROM path_ranks
                WHERE repository_id IN (SELECT value FROM json_each(?))
                "#,
            )
            .bind(Json(repository_ids))
            .fetch_all(&self.pool)
            .await?;
            Ok(rows.into_iter().collect())
        }
    }
}

/// SQLite schema. Every timestamp is bound from the caller in UTC, so TEXT comparison orders
/// them correctly.
const SCHEMA_SQL: &str = r#"
-- Source tables owned by the indexing pipeline
CREATE TABLE IF NOT EXISTS repos (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    stars INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    blocked INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS uploads (
    id INTEGER PRIMARY KEY,
    repository_id INTEGER NOT NULL,
    root TEXT NOT NULL DEFAULT '',
    indexer TEXT NOT NULL DEFAULT '',
    state TEXT NOT NULL DEFAULT 'completed',
    finished_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_uploads_project ON uploads(repository_id, root, indexer);

CREATE TABLE IF NOT EXISTS uploads_visible_at_tip (
    repository_id INTEGER NOT NULL,
    upload_id INTEGER NOT NULL,
    is_default_branch INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (repository_id, upload_id)
);
CREATE INDEX IF NOT EXISTS idx_uploads_visible_at_tip_upload ON uploads_visible_at_tip(upload_id);

-- Export registry
CREATE TABLE IF NOT EXISTS ranking_exported_uploads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    upload_id INTEGER NOT NULL,
    repository_id INTEGER NOT NULL,
    root TEXT NOT NULL,
    indexer TEXT NOT NULL,
    object_prefix TEXT NOT NULL,
    graph_key TEXT NOT NULL,
    deleted_at TEXT,
    last_scanned_at TEXT,
    claimed_at TEXT,
    ingested_at TEXT,
    UNIQUE (upload_id, graph_key)
);
CREATE INDEX IF NOT EXISTS idx_ranking_exported_uploads_pending ON ranking_exported_uploads(graph_key, ingested_at, claimed_at);

-- Ingested rows. AUTOINCREMENT keeps ids monotonic across vacuums so progress
-- watermarks never admit a recycled id.
CREATE TABLE IF NOT EXISTS ranking_definitions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exported_upload_id INTEGER NOT NULL,
    upload_id INTEGER NOT NULL,
    symbol_name TEXT NOT NULL,
    document_path TEXT NOT NULL,
    graph_key TEXT NOT NULL,
    deleted_at TEXT,
    last_scanned_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_ranking_definitions_symbol ON ranking_definitions(graph_key, symbol_name);
CREATE INDEX IF NOT EXISTS idx_ranking_definitions_export ON ranking_definitions(exported_upload_id);

CREATE TABLE IF NOT EXISTS ranking_references (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exported_upload_id INTEGER NOT NULL,
    upload_id INTEGER NOT NULL,
    symbol_names TEXT NOT NULL,
    graph_key TEXT NOT NULL,
    deleted_at TEXT,
    last_scanned_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_ranking_references_graph_key ON ranking_references(graph_key, id);
CREATE INDEX IF NOT EXISTS idx_ranking_references_export ON ranking_references(exported_upload_id);

CREATE TABLE IF NOT EXISTS ranking_initial_path_ranks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    exported_upload_id INTEGER NOT NULL,
    upload_id INTEGER NOT NULL,
    document_paths TEXT NOT NULL,
    graph_key TEXT NOT NULL,
    deleted_at TEXT,
    last_scanned_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_ranking_initial_path_ranks_graph_key ON ranking_initial_path_ranks(graph_key, id);
CREATE INDEX IF NOT EXISTS idx_ranking_initial_path_ranks_export ON ranking_initial_path_ranks(exported_upload_id);

-- Per-epoch processed markers
CREATE TABLE IF NOT EXISTS ranking_references_processed (
    graph_key TEXT NOT NULL,
    reference_id INTEGER NOT NULL,
    contributed INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (graph_key, reference_id)
);

CREATE TABLE IF NOT EXISTS ranking_initial_paths_processed (
    graph_key TEXT NOT NULL,
    path_ranks_id INTEGER NOT NULL,
    PRIMARY KEY (graph_key, path_ranks_id)
);

-- Mapper output
CREATE TABLE IF NOT EXISTS ranking_path_count_inputs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL,
    document_path TEXT NOT NULL,
    count INTEGER NOT NULL,
    graph_key TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_ranking_path_count_inputs_claim ON ranking_path_count_inputs(graph_key, processed, id);

-- Reducer output
CREATE TABLE IF NOT EXISTS path_ranks (
    repository_id INTEGER PRIMARY KEY,
    graph_key TEXT NOT NULL,
    payload TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_path_ranks_graph_key ON path_ranks(graph_key);

-- Epoch progress
CREATE TABLE IF NOT EXISTS ranking_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    graph_key TEXT NOT NULL UNIQUE,
    max_definition_id INTEGER NOT NULL,
    max_reference_id INTEGER NOT NULL,
    max_path_id INTEGER NOT NULL,
    mappers_started_at TEXT NOT NULL,
    mapper_completed_at TEXT,
    seed_mapper_completed_at TEXT,
    reducer_started_at TEXT,
    reducer_completed_at TEXT,
    num_path_records_total INTEGER NOT NULL DEFAULT 0,
    num_reference_records_total INTEGER NOT NULL DEFAULT 0,
    num_count_records_total INTEGER NOT NULL DEFAULT 0,
    num_path_records_processed INTEGER NOT NULL DEFAULT 0,
    num_reference_records_processed INTEGER NOT NULL DEFAULT 0,
    num_count_records_processed INTEGER NOT NULL DEFAULT 0
);

-- Operator-bumped generations of the derivative key
CREATE TABLE IF NOT EXISTS ranking_graph_key_generations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    graph_key TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ranking_graph_key_generations_root ON ranking_graph_key_generations(graph_key, id);
"#;
