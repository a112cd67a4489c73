//! Repository traits for ranking operations.

pub mod coordinator;
pub mod exports;
pub mod ingest;
pub mod janitor;
pub mod mapper;
pub mod reducer;
pub mod retrieval;
pub mod sources;

pub use coordinator::CoordinatorRepo;
pub use exports::ExportRepo;
pub use ingest::IngestRepo;
pub use janitor::{JanitorRepo, RankingTable};
pub use mapper::MapperRepo;
pub use reducer::ReducerRepo;
pub use retrieval::RetrievalRepo;
pub use sources::SourceRepo;
