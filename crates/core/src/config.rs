//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// HTTP server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8090").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Directory the exporter reads per-upload symbol files from.
    /// When unset the exporter only registers uploads and ingests nothing.
    #[serde(default)]
    pub exporter_source_dir: Option<PathBuf>,
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            exporter_source_dir: None,
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    /// Disable SSL/TLS entirely.
    Disable,
    /// Prefer SSL/TLS but allow unencrypted connections (default).
    #[default]
    Prefer,
    /// Require SSL/TLS for all connections.
    Require,
}

/// Ranking store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (tests and single-worker deployments).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Advisory only: slow queries are logged, not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over the individual fields.
        url: Option<String>,
        /// Database host.
        host: Option<String>,
        /// Database port (default: 5432).
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        /// Database username.
        username: Option<String>,
        /// Database password.
        /// WARNING: Prefer PATHRANK_METADATA__PASSWORD over storing it in the config file.
        password: Option<String>,
        /// Database name.
        database: Option<String>,
        /// SSL mode for connections.
        ssl_mode: Option<PgSslMode>,
        /// Maximum connections in the pool.
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(300000) // 5 minutes
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(600)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/pathrank.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Ranking computation configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankingConfig {
    /// Feature flag. Every job is a no-op while this is false.
    #[serde(default)]
    pub enabled: bool,
    /// Root graph key. Changing it abandons every result computed under the old key.
    #[serde(default = "default_graph_key")]
    pub graph_key: String,
    /// Prefix inserted between the root key and the epoch bucket.
    #[serde(default)]
    pub derivative_graph_key_prefix: String,
    /// Epoch length in seconds.
    #[serde(default = "default_stale_result_age_secs")]
    pub stale_result_age_secs: u64,
    /// Object prefix recorded on every exported upload.
    #[serde(default = "default_object_prefix")]
    pub object_prefix: String,
    /// Seconds before an export whose symbols were never ingested is claimed again.
    #[serde(default = "default_export_retry_secs")]
    pub export_retry_secs: u64,
}

fn default_graph_key() -> String {
    "dev".to_string()
}

fn default_stale_result_age_secs() -> u64 {
    86400 // 24 hours
}

fn default_object_prefix() -> String {
    "ranking".to_string()
}

fn default_export_retry_secs() -> u64 {
    300
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            graph_key: default_graph_key(),
            derivative_graph_key_prefix: String::new(),
            stale_result_age_secs: default_stale_result_age_secs(),
            object_prefix: default_object_prefix(),
            export_retry_secs: default_export_retry_secs(),
        }
    }
}

impl RankingConfig {
    /// Validate ranking configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.graph_key.is_empty() {
            return Err("ranking.graph_key cannot be empty".to_string());
        }
        if self.stale_result_age_secs == 0 {
            return Err("ranking.stale_result_age_secs must be at least 1".to_string());
        }
        if self.stale_result_age_secs > i64::MAX as u64 {
            return Err(format!(
                "ranking.stale_result_age_secs {} exceeds maximum value {}",
                self.stale_result_age_secs,
                i64::MAX
            ));
        }
        if self.export_retry_secs > i64::MAX as u64 {
            return Err(format!(
                "ranking.export_retry_secs {} exceeds maximum value {}",
                self.export_retry_secs,
                i64::MAX
            ));
        }
        Ok(())
    }

    /// Get the export retry delay as a time::Duration.
    pub fn export_retry(&self) -> time::Duration {
        time::Duration::seconds(i64::try_from(self.export_retry_secs).unwrap_or(i64::MAX))
    }
}

/// Schedule of a single periodic job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSchedule {
    /// Seconds between two ticks.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Rows claimed per tick.
    #[serde(default = "default_job_batch_size")]
    pub batch_size: u32,
}

fn default_interval_secs() -> u64 {
    1
}

fn default_job_batch_size() -> u32 {
    100
}

fn default_janitor_schedule() -> JobSchedule {
    JobSchedule {
        interval_secs: 60,
        batch_size: default_job_batch_size(),
    }
}

impl Default for JobSchedule {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            batch_size: default_job_batch_size(),
        }
    }
}

impl JobSchedule {
    /// Get the interval as a std::time::Duration.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }
}

/// Per-job schedules.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub exporter: JobSchedule,
    #[serde(default)]
    pub coordinator: JobSchedule,
    #[serde(default)]
    pub mapper: JobSchedule,
    #[serde(default)]
    pub seed_mapper: JobSchedule,
    #[serde(default)]
    pub reducer: JobSchedule,
    #[serde(default = "default_janitor_schedule")]
    pub janitor: JobSchedule,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            exporter: JobSchedule::default(),
            coordinator: JobSchedule::default(),
            mapper: JobSchedule::default(),
            seed_mapper: JobSchedule::default(),
            reducer: JobSchedule::default(),
            janitor: default_janitor_schedule(),
        }
    }
}

impl JobsConfig {
    /// Validate job schedules.
    pub fn validate(&self) -> Result<(), String> {
        for (name, schedule) in [
            ("exporter", &self.exporter),
            ("coordinator", &self.coordinator),
            ("mapper", &self.mapper),
            ("seed_mapper", &self.seed_mapper),
            ("reducer", &self.reducer),
            ("janitor", &self.janitor),
        ] {
            // tokio::time::interval panics on a zero period
            if schedule.interval_secs == 0 {
                return Err(format!("jobs.{name}.interval_secs cannot be 0"));
            }
            if schedule.batch_size == 0 {
                return Err(format!("jobs.{name}.batch_size cannot be 0"));
            }
        }
        Ok(())
    }
}

/// Janitor configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Rows scanned or deleted per policy per tick.
    #[serde(default = "default_janitor_batch_size")]
    pub batch_size: u32,
    /// Minimum age of `last_scanned_at` before a row is rescanned for soft deletion.
    #[serde(default = "default_scan_threshold_secs")]
    pub scan_threshold_secs: u64,
}

fn default_janitor_batch_size() -> u32 {
    1000
}

fn default_scan_threshold_secs() -> u64 {
    86400 // 24 hours
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_janitor_batch_size(),
            scan_threshold_secs: default_scan_threshold_secs(),
        }
    }
}

impl JanitorConfig {
    /// Get the scan threshold as a Duration.
    pub fn scan_threshold(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.scan_threshold_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Validate janitor configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("janitor.batch_size cannot be 0".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
}

impl AppConfig {
    /// Create a test configuration with ranking enabled.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            ranking: RankingConfig {
                enabled: true,
                ..RankingConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.metadata.validate()?;
        self.ranking.validate()?;
        self.jobs.validate()?;
        self.janitor.validate()?;
        Ok(())
    }
}
