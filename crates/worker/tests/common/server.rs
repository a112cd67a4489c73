//! Worker test utilities.

use pathrank_core::config::{AppConfig, MetadataConfig};
use pathrank_store::{RankingStore, SqliteStore};
use pathrank_worker::exporter::{JsonDirSource, SymbolSource};
use pathrank_worker::jobs::{
    CoordinatorJob, ExporterJob, JanitorJob, ManualClock, ReducerJob, ReferenceMapperJob,
    SeedMapperJob,
};
use pathrank_worker::{AppState, JobContext, JobStats, RankingJob, create_router};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use time::OffsetDateTime;
use time::macros::datetime;

/// First instant of epoch bucket 19723 under the default one-day epoch.
pub const START: OffsetDateTime = datetime!(2024-01-01 0:00 UTC);

/// A worker with every job, a manual clock and a router over a temporary SQLite store.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestWorker {
    pub router: axum::Router,
    pub state: AppState,
    pub clock: Arc<ManualClock>,
    pub exporter: ExporterJob,
    pub coordinator: CoordinatorJob,
    pub mapper: ReferenceMapperJob,
    pub seed_mapper: SeedMapperJob,
    pub reducer: ReducerJob,
    pub janitor: JanitorJob,
    ctx: JobContext,
    symbols_dir: PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestWorker {
    /// Create a worker with ranking enabled.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a worker with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let symbols_dir = temp_dir.path().join("symbols");
        std::fs::create_dir_all(&symbols_dir).expect("Failed to create symbols directory");

        let db_path = temp_dir.path().join("pathrank.db");
        let store: Arc<dyn RankingStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create ranking store"),
        );

        let mut config = AppConfig::for_testing();
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        config.server.exporter_source_dir = Some(symbols_dir.clone());
        modifier(&mut config);

        let clock = Arc::new(ManualClock::new(START));
        let state = AppState::new(config, store).with_clock(clock.clone());
        let ctx = JobContext::new(state.store.clone(), state.config.clone())
            .with_clock(clock.clone());
        let source: Arc<dyn SymbolSource> = Arc::new(JsonDirSource::new(&symbols_dir));

        Self {
            router: create_router(state.clone()),
            state,
            clock,
            exporter: ExporterJob::new(ctx.clone(), Some(source)),
            coordinator: CoordinatorJob::new(ctx.clone()),
            mapper: ReferenceMapperJob::new(ctx.clone()),
            seed_mapper: SeedMapperJob::new(ctx.clone()),
            reducer: ReducerJob::new(ctx.clone()),
            janitor: JanitorJob::new(ctx.clone()),
            ctx,
            symbols_dir,
            _temp_dir: temp_dir,
        }
    }

    pub fn store(&self) -> Arc<dyn RankingStore> {
        self.state.store.clone()
    }

    /// Job context sharing this worker's store, config and clock.
    pub fn context(&self) -> JobContext {
        self.ctx.clone()
    }

    pub fn symbols_dir(&self) -> &Path {
        &self.symbols_dir
    }

    /// Write the symbol file the exporter reads for `upload_id`.
    pub fn write_symbols(&self, upload_id: i64, json: serde_json::Value) {
        std::fs::write(
            self.symbols_dir.join(format!("{upload_id}.json")),
            serde_json::to_vec(&json).unwrap(),
        )
        .expect("Failed to write symbol file");
    }

    /// Run one job until it reports no further work, returning the summed stats.
    pub async fn drain(&self, job: &dyn RankingJob) -> JobStats {
        let mut total = JobStats::default();
        for _ in 0..100 {
            let stats = job.run().await.expect("job failed");
            if stats == JobStats::default() {
                return total;
            }
            total += stats;
        }
        panic!("job {} did not drain", job.name());
    }

    /// Run a full epoch at the current clock time: export, map, reduce.
    pub async fn run_epoch(&self) {
        self.exporter.run().await.expect("exporter failed");
        self.coordinator.run().await.expect("coordinator failed");
        self.drain(&self.mapper).await;
        self.drain(&self.seed_mapper).await;
        self.coordinator.run().await.expect("coordinator failed");
        self.drain(&self.reducer).await;
    }
}
