//! Periodic ranking jobs.
//!
//! Every job is one bounded unit of work against the shared store. Jobs hold no state between
//! runs, so any number of workers may trigger the same job concurrently; the store's
//! skip-locked claims partition the work between them.

use crate::error::JobResult;
use crate::exporter::{SymbolSource, UploadSymbols, ingest_upload};
use async_trait::async_trait;
use pathrank_core::config::{AppConfig, JobSchedule};
use pathrank_core::{
    BatchCounts, DerivativeGraphKey, RootGraphKey, derivative_graph_key_for_generation,
    new_graph_key,
};
use pathrank_store::{RankingStore, RankingTable};
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};

/// Rows looked at and rows changed by one run.
pub type JobStats = BatchCounts;

/// A periodically triggered ranking job.
#[async_trait]
pub trait RankingJob: Send + Sync {
    /// Stable name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Run one bounded unit of work.
    async fn run(&self) -> JobResult<JobStats>;
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(now: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: OffsetDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Dependencies shared by every job.
#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn RankingStore>,
    pub config: Arc<AppConfig>,
    pub clock: Arc<dyn Clock>,
}

impl JobContext {
    pub fn new(store: Arc<dyn RankingStore>, config: Arc<AppConfig>) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn enabled(&self) -> bool {
        self.config.ranking.enabled
    }

    pub fn root_key(&self) -> RootGraphKey {
        new_graph_key(&self.config.ranking.graph_key)
    }

    /// Derivative key of the epoch containing `now`.
    pub async fn derivative_key(&self, now: OffsetDateTime) -> JobResult<DerivativeGraphKey> {
        current_derivative_key(self.store.as_ref(), &self.config, now).await
    }
}

/// Derivative key of the epoch containing `now` under the latest bumped generation.
pub async fn current_derivative_key(
    store: &dyn RankingStore,
    config: &AppConfig,
    now: OffsetDateTime,
) -> JobResult<DerivativeGraphKey> {
    let root_key = new_graph_key(&config.ranking.graph_key);
    let generation = store
        .derivative_graph_key_generation(&root_key)
        .await?
        .map(|row| row.id);
    Ok(derivative_graph_key_for_generation(&config.ranking, generation, now))
}

/// Claims uploads for export and ingests their symbols.
pub struct ExporterJob {
    ctx: JobContext,
    source: Option<Arc<dyn SymbolSource>>,
}

impl ExporterJob {
    pub fn new(ctx: JobContext, source: Option<Arc<dyn SymbolSource>>) -> Self {
        Self { ctx, source }
    }
}

#[async_trait]
impl RankingJob for ExporterJob {
    fn name(&self) -> &'static str {
        "exporter"
    }

    async fn run(&self) -> JobResult<JobStats> {
        if !self.ctx.enabled() {
            return Ok(JobStats::default());
        }

        let store = self.ctx.store.as_ref();
        let now = self.ctx.clock.now();
        let root_key = self.ctx.root_key();
        let batch_size = self.ctx.config.jobs.exporter.batch_size;

        let mut exports = store
            .select_uploads_for_export(
                &root_key,
                &self.ctx.config.ranking.object_prefix,
                batch_size,
                now,
            )
            .await?;
        let claimed_before = now
            .checked_sub(self.ctx.config.ranking.export_retry())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let reclaimed = store
            .reclaim_pending_exports(&root_key, batch_size, claimed_before, now)
            .await?;
        if !reclaimed.is_empty() {
            tracing::info!(graph_key = %root_key, count = reclaimed.len(), "Retrying pending exports");
        }
        exports.extend(reclaimed);

        let mut stats = JobStats::new(exports.len() as u64, 0);
        let mut pending = 0u64;
        let mut failure = None;
        for export in &exports {
            let symbols = match &self.source {
                None => UploadSymbols::default(),
                Some(source) => match source.load(export).await {
                    Ok(symbols) => symbols.unwrap_or_default(),
                    Err(e) => {
                        // Stays pending until the retry window passes.
                        tracing::warn!(
                            upload_id = export.upload_id,
                            error = %e,
                            "Leaving upload with unreadable symbols pending"
                        );
                        pending += 1;
                        continue;
                    }
                },
            };
            match ingest_upload(store, &root_key, export, symbols, now).await {
                Ok(rows) => stats.altered += rows.unwrap_or(0),
                Err(e) => {
                    tracing::warn!(
                        upload_id = export.upload_id,
                        exported_upload_id = export.id,
                        error = %e,
                        "Failed to ingest upload symbols"
                    );
                    pending += 1;
                    failure = Some(e);
                }
            }
        }

        if !exports.is_empty() {
            tracing::info!(
                graph_key = %root_key,
                exported = stats.scanned,
                pending = pending,
                rows = stats.altered,
                "Exported uploads for ranking"
            );
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

/// Starts the mapper phase of the current epoch and, once both mappers are done, its reducer.
pub struct CoordinatorJob {
    ctx: JobContext,
}

impl CoordinatorJob {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RankingJob for CoordinatorJob {
    fn name(&self) -> &'static str {
        "coordinator"
    }

    async fn run(&self) -> JobResult<JobStats> {
        if !self.ctx.enabled() {
            return Ok(JobStats::default());
        }

        let now = self.ctx.clock.now();
        let key = self.ctx.derivative_key(now).await?;
        let mut stats = JobStats::new(1, 0);

        if self.ctx.store.start_mapper_phase(&key, now).await? {
            stats.altered += 1;
        }
        if self.ctx.store.start_reducer_phase(&key, now).await? {
            stats.altered += 1;
        }
        Ok(stats)
    }
}

/// Reduces references of the current epoch into path-count inputs.
pub struct ReferenceMapperJob {
    ctx: JobContext,
}

impl ReferenceMapperJob {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RankingJob for ReferenceMapperJob {
    fn name(&self) -> &'static str {
        "mapper"
    }

    async fn run(&self) -> JobResult<JobStats> {
        if !self.ctx.enabled() {
            return Ok(JobStats::default());
        }
        let now = self.ctx.clock.now();
        let key = self.ctx.derivative_key(now).await?;
        let stats = self
            .ctx
            .store
            .insert_path_count_inputs(&key, self.ctx.config.jobs.mapper.batch_size, now)
            .await?;
        Ok(stats)
    }
}

/// Turns seed paths of the current epoch into zero-count inputs.
pub struct SeedMapperJob {
    ctx: JobContext,
}

impl SeedMapperJob {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RankingJob for SeedMapperJob {
    fn name(&self) -> &'static str {
        "seed_mapper"
    }

    async fn run(&self) -> JobResult<JobStats> {
        if !self.ctx.enabled() {
            return Ok(JobStats::default());
        }
        let now = self.ctx.clock.now();
        let key = self.ctx.derivative_key(now).await?;
        let stats = self
            .ctx
            .store
            .insert_initial_path_counts(&key, self.ctx.config.jobs.seed_mapper.batch_size, now)
            .await?;
        Ok(stats)
    }
}

/// Merges path-count inputs of the current epoch into per-repository payloads.
pub struct ReducerJob {
    ctx: JobContext,
}

impl ReducerJob {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RankingJob for ReducerJob {
    fn name(&self) -> &'static str {
        "reducer"
    }

    async fn run(&self) -> JobResult<JobStats> {
        if !self.ctx.enabled() {
            return Ok(JobStats::default());
        }
        let now = self.ctx.clock.now();
        let key = self.ctx.derivative_key(now).await?;
        let stats = self
            .ctx
            .store
            .insert_path_ranks(&key, self.ctx.config.jobs.reducer.batch_size, now)
            .await?;
        Ok(stats)
    }
}

/// Runs every janitor policy once.
pub struct JanitorJob {
    ctx: JobContext,
}

impl JanitorJob {
    pub fn new(ctx: JobContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RankingJob for JanitorJob {
    fn name(&self) -> &'static str {
        "janitor"
    }

    async fn run(&self) -> JobResult<JobStats> {
        if !self.ctx.enabled() {
            return Ok(JobStats::default());
        }

        let store = &self.ctx.store;
        let janitor = &self.ctx.config.janitor;
        let now = self.ctx.clock.now();
        let root_key = self.ctx.root_key();
        let key = self.ctx.derivative_key(now).await?;
        let mut total = JobStats::default();

        for table in RankingTable::ALL {
            let counts = store
                .soft_delete_stale(table, &root_key, janitor.batch_size, janitor.scan_threshold(), now)
                .await?;
            log_policy("soft_delete", table.as_str(), counts);
            total += counts;
        }

        // Runs first: superseded epochs that never finished mapping would block vacuum_deleted.
        let counts = store.vacuum_stale_graphs(&key, janitor.batch_size).await?;
        log_policy("vacuum_stale_graphs", "all", counts);
        total += counts;

        // Exported uploads come last in ALL, so their children are vacuumed first.
        for table in RankingTable::ALL {
            let counts = store.vacuum_deleted(table, &root_key, janitor.batch_size).await?;
            log_policy("vacuum_deleted", table.as_str(), counts);
            total += counts;
        }

        let counts = store.vacuum_abandoned(&root_key, janitor.batch_size).await?;
        log_policy("vacuum_abandoned", "all", counts);
        total += counts;

        let counts = store.vacuum_stale_ranks(&key, janitor.batch_size).await?;
        log_policy("vacuum_stale_ranks", "path_ranks", counts);
        total += counts;

        Ok(total)
    }
}

fn log_policy(policy: &str, table: &str, counts: BatchCounts) {
    if counts.altered > 0 {
        tracing::info!(
            policy = policy,
            table = table,
            scanned = counts.scanned,
            altered = counts.altered,
            "Janitor policy altered rows"
        );
    } else {
        tracing::debug!(policy = policy, table = table, scanned = counts.scanned, "Janitor policy ran");
    }
}

/// Build every job with its schedule.
pub fn all_jobs(
    ctx: &JobContext,
    source: Option<Arc<dyn SymbolSource>>,
) -> Vec<(Arc<dyn RankingJob>, JobSchedule)> {
    let jobs = &ctx.config.jobs;
    vec![
        (
            Arc::new(ExporterJob::new(ctx.clone(), source)) as Arc<dyn RankingJob>,
            jobs.exporter.clone(),
        ),
        (Arc::new(CoordinatorJob::new(ctx.clone())), jobs.coordinator.clone()),
        (Arc::new(ReferenceMapperJob::new(ctx.clone())), jobs.mapper.clone()),
        (Arc::new(SeedMapperJob::new(ctx.clone())), jobs.seed_mapper.clone()),
        (Arc::new(ReducerJob::new(ctx.clone())), jobs.reducer.clone()),
        (Arc::new(JanitorJob::new(ctx.clone())), jobs.janitor.clone()),
    ]
}
