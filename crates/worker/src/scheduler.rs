//! Interval loops driving the ranking jobs.

use crate::jobs::{JobStats, RankingJob};
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run a job once, recording metrics. Failures are logged and counted, never propagated.
pub async fn run_once(job: &dyn RankingJob) -> Option<JobStats> {
    let name = job.name();
    let timer = metrics::JOB_DURATION.with_label_values(&[name]).start_timer();
    let result = job.run().await;
    timer.observe_duration();

    match result {
        Ok(stats) => {
            metrics::record_job_stats(name, stats);
            if stats.altered > 0 {
                tracing::debug!(
                    job = name,
                    scanned = stats.scanned,
                    altered = stats.altered,
                    "Job run completed"
                );
            }
            Some(stats)
        }
        Err(e) => {
            metrics::record_job_error(name, e.kind());
            tracing::error!(job = name, kind = e.kind(), error = %e, "Job run failed");
            None
        }
    }
}

/// Spawn a loop running `job` every `interval` until `cancel` fires.
///
/// Ticks missed by a run that outlasts the interval are skipped, not queued.
pub fn spawn_job(
    job: Arc<dyn RankingJob>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    run_once(job.as_ref()).await;
                }
            }
        }
        tracing::debug!(job = job.name(), "Job loop stopped");
    })
}

/// Owns the job loops.
pub struct Scheduler {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn one loop per job.
    pub fn start<I>(jobs: I) -> Self
    where
        I: IntoIterator<Item = (Arc<dyn RankingJob>, Duration)>,
    {
        let cancel = CancellationToken::new();
        let handles = jobs
            .into_iter()
            .map(|(job, interval)| {
                tracing::info!(
                    job = job.name(),
                    interval_secs = interval.as_secs(),
                    "Job loop spawned"
                );
                spawn_job(job, interval, cancel.child_token())
            })
            .collect();
        Self { cancel, handles }
    }

    /// Token that stops every loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every loop and wait for in-flight runs to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Job loop panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobError, JobResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingJob {
        runs: AtomicU64,
        fail: bool,
    }

    #[async_trait]
    impl RankingJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self) -> JobResult<JobStats> {
            let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(JobError::Source {
                    upload_id: 0,
                    message: "boom".to_string(),
                });
            }
            Ok(JobStats::new(n, 0))
        }
    }

    #[tokio::test]
    async fn test_run_once_swallows_errors() {
        let job = CountingJob {
            runs: AtomicU64::new(0),
            fail: true,
        };
        assert!(run_once(&job).await.is_none());
        assert!(run_once(&job).await.is_none());
        assert_eq!(job.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_scheduler_runs_until_shutdown() {
        let job = Arc::new(CountingJob {
            runs: AtomicU64::new(0),
            fail: false,
        });
        let scheduler = Scheduler::start([(
            job.clone() as Arc<dyn RankingJob>,
            Duration::from_millis(5),
        )]);

        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.shutdown().await;

        let runs = job.runs.load(Ordering::SeqCst);
        assert!(runs >= 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(job.runs.load(Ordering::SeqCst), runs, "no runs after shutdown");
    }
}
