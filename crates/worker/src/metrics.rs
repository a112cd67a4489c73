//! Prometheus metrics for the ranking worker.
//!
//! Every job reports its runs, failures and row counts under a `job` label. The `/metrics`
//! endpoint is unauthenticated; restrict it to the scraper at the network level.

use crate::jobs::JobStats;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static JOB_RUNS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("pathrank_job_runs_total", "Total number of job runs"),
        &["job"],
    )
    .expect("metric creation failed")
});

pub static JOB_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pathrank_job_errors_total",
            "Total number of failed job runs by error kind",
        ),
        &["job", "kind"],
    )
    .expect("metric creation failed")
});

pub static JOB_ROWS_SCANNED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pathrank_job_rows_scanned_total",
            "Total number of rows looked at by jobs",
        ),
        &["job"],
    )
    .expect("metric creation failed")
});

pub static JOB_ROWS_ALTERED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pathrank_job_rows_altered_total",
            "Total number of rows inserted, updated or deleted by jobs",
        ),
        &["job"],
    )
    .expect("metric creation failed")
});

pub static JOB_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new("pathrank_job_duration_seconds", "Time taken by one job run")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["job"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER: Once = Once::new();

/// Register all metrics with the global registry.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(JOB_RUNS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOB_ERRORS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOB_ROWS_SCANNED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOB_ROWS_ALTERED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(JOB_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a successful run.
pub fn record_job_stats(job: &str, stats: JobStats) {
    JOB_RUNS.with_label_values(&[job]).inc();
    JOB_ROWS_SCANNED.with_label_values(&[job]).inc_by(stats.scanned);
    JOB_ROWS_ALTERED.with_label_values(&[job]).inc_by(stats.altered);
}

/// Record a failed run.
pub fn record_job_error(job: &str, kind: &str) {
    JOB_RUNS.with_label_values(&[job]).inc();
    JOB_ERRORS.with_label_values(&[job, kind]).inc();
}
