//! Application state shared across handlers.

use crate::jobs::{Clock, SystemClock};
use pathrank_core::config::AppConfig;
use pathrank_store::RankingStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Ranking store.
    pub store: Arc<dyn RankingStore>,
    /// Time source for epoch keys; shared with the jobs.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(config: AppConfig, store: Arc<dyn RankingStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
