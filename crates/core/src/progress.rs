//! Epoch progress state machine.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// State of one epoch, derived from its progress timestamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    /// Mappers are running; at least one mapper completion column is null.
    Mapping,
    /// Both mappers finished; the reducer has not started.
    ReducerPending,
    Reducing,
    Done,
}

impl ProgressState {
    /// Derive the state from the timestamps of a progress row.
    pub fn from_timestamps(
        mapper_completed_at: Option<OffsetDateTime>,
        seed_mapper_completed_at: Option<OffsetDateTime>,
        reducer_started_at: Option<OffsetDateTime>,
        reducer_completed_at: Option<OffsetDateTime>,
    ) -> Self {
        match (
            mapper_completed_at.is_some() && seed_mapper_completed_at.is_some(),
            reducer_started_at.is_some(),
            reducer_completed_at.is_some(),
        ) {
            (_, _, true) => Self::Done,
            (_, true, false) => Self::Reducing,
            (true, false, false) => Self::ReducerPending,
            (false, false, false) => Self::Mapping,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mapping => "mapping",
            Self::ReducerPending => "reducer_pending",
            Self::Reducing => "reducing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for ProgressState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
