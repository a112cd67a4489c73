//! Core domain types and shared logic for path ranking.
//!
//! This crate defines what the store and worker crates build on:
//! - Root and derivative graph keys
//! - Configuration
//! - The pure halves of the mapper and reducer (shadowing, counting, payload merge)
//! - The epoch progress state machine
//! - Retrieval statistics

pub mod batch;
pub mod config;
pub mod error;
pub mod graph_key;
pub mod mapper;
pub mod payload;
pub mod progress;
pub mod retrieval;
pub mod shadow;

pub use batch::{BatchCounts, Batches, BatchesExt};
pub use error::{Error, Result};
pub use graph_key::{
    DerivativeGraphKey, RootGraphKey, derivative_graph_key_for_generation,
    derivative_graph_key_from_time, graph_key_from_derivative, new_derivative_graph_key,
    new_graph_key,
};
pub use payload::PathPayload;
pub use progress::ProgressState;
