//! Ranking store abstraction and implementations.
//!
//! This crate persists every stage of the path rank computation:
//! - Source tables (repositories, uploads, tip visibility)
//! - The export registry and ingested definitions, references and seed paths
//! - Per-epoch progress
//! - Mapper claims, path-count inputs and final payloads
//! - Janitor soft deletes and vacuums
//!
//! All claims lock with `FOR UPDATE SKIP LOCKED` on PostgreSQL. SQLite serializes every
//! write transaction on its single connection, which gives the same guarantee.

pub mod error;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use postgres::PostgresStore;
pub use repos::RankingTable;
pub use store::{RankingStore, SqliteStore};

use pathrank_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a ranking store from configuration.
///
/// The schema is created on open, so the returned store is ready for every job.
pub async fn from_config(config: &MetadataConfig) -> StoreResult<Arc<dyn RankingStore>> {
    let store: Arc<dyn RankingStore> = match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            tracing::info!(path = %path.display(), "Opening SQLite ranking store");
            Arc::new(SqliteStore::new(path, *query_timeout_secs).await?)
        }
        MetadataConfig::Postgres {
            url: Some(url),
            max_connections,
            statement_timeout_ms,
            ..
        } => {
            tracing::info!("Connecting to PostgreSQL using connection URL");
            Arc::new(PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?)
        }
        MetadataConfig::Postgres {
            url: None,
            host: Some(host),
            port,
            username,
            password,
            database: Some(database),
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => Arc::new(
            PostgresStore::from_params(
                host,
                port.unwrap_or(5432),
                username.as_deref(),
                password.as_deref(),
                database,
                *ssl_mode,
                *max_connections,
                *statement_timeout_ms,
            )
            .await?,
        ),
        MetadataConfig::Postgres { .. } => {
            return Err(StoreError::Config(
                "postgres config requires either 'url' or 'host' + 'database'".to_string(),
            ));
        }
    };
    Ok(store)
}
