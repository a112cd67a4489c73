//! Ranking worker: periodic jobs and the retrieval HTTP API.
//!
//! This crate drives the path rank computation:
//! - Jobs for the exporter, coordinator, both mappers, the reducer and the janitor
//! - Interval loops running those jobs until shutdown
//! - Read endpoints for ranking consumers, plus health, progress and metrics

pub mod error;
pub mod exporter;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod routes;
pub mod scheduler;
pub mod state;

pub use error::{ApiError, JobError, JobResult};
pub use jobs::{JobContext, JobStats, RankingJob};
pub use routes::create_router;
pub use scheduler::Scheduler;
pub use state::AppState;
