//! HTTP request handlers.

pub mod graph_key;
pub mod health;
pub mod progress;
pub mod retrieval;

pub use graph_key::*;
pub use health::*;
pub use progress::*;
pub use retrieval::*;
