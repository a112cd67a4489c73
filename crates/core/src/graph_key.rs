//! Root and derivative graph keys.
//!
//! A root graph key names one ranking configuration generation. Every epoch of that
//! generation gets a derivative key of the form `root.prefix-bucket`, where the bucket is
//! the wall-clock time divided by the epoch length. Both key parts are encoded so the
//! single `.` separator is unambiguous.

use crate::config::RankingConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

const SEPARATOR: char = '.';
const BUCKET_SEPARATOR: char = '-';

/// Replace characters that would break splitting a derivative key.
fn encode(s: &str) -> String {
    s.replace(SEPARATOR, "_")
}

/// Key naming one ranking configuration generation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RootGraphKey(String);

impl RootGraphKey {
    /// Get the encoded key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Half-open lexical range `[start, end)` containing every derivative key of this root.
    ///
    /// `/` is the character immediately after `.` so `root/` bounds `root.<anything>`.
    pub fn derivative_range(&self) -> (String, String) {
        (format!("{}.", self.0), format!("{}/", self.0))
    }

    /// Check whether a derivative key belongs to this root.
    pub fn owns(&self, derivative: &DerivativeGraphKey) -> bool {
        let (start, end) = self.derivative_range();
        derivative.as_str() >= start.as_str() && derivative.as_str() < end.as_str()
    }
}

impl fmt::Display for RootGraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key naming a single epoch of a root graph key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DerivativeGraphKey(String);

impl DerivativeGraphKey {
    /// Wrap a stored key without validation.
    ///
    /// Keys read back from storage were produced by [`new_derivative_graph_key`]; use
    /// [`DerivativeGraphKey::parse`] for keys from untrusted input.
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Parse and validate a derivative key.
    pub fn parse(key: &str) -> Result<Self> {
        let parsed = Self(key.to_string());
        graph_key_from_derivative(&parsed)
            .ok_or_else(|| Error::InvalidDerivativeGraphKey(key.to_string()))?;
        Ok(parsed)
    }

    /// Get the key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The root key this epoch belongs to.
    pub fn root(&self) -> Result<RootGraphKey> {
        graph_key_from_derivative(self)
            .ok_or_else(|| Error::InvalidDerivativeGraphKey(self.0.clone()))
    }

    /// The epoch bucket, if the key carries a numeric suffix.
    pub fn bucket(&self) -> Option<i64> {
        let (_, bucket) = self.0.rsplit_once(BUCKET_SEPARATOR)?;
        bucket.parse().ok()
    }
}

impl fmt::Display for DerivativeGraphKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build a root graph key from a configured name.
pub fn new_graph_key(root: &str) -> RootGraphKey {
    RootGraphKey(encode(root))
}

/// Build the derivative key for one epoch.
pub fn new_derivative_graph_key(root: &str, prefix: &str, bucket: i64) -> DerivativeGraphKey {
    DerivativeGraphKey(format!(
        "{}{SEPARATOR}{}{BUCKET_SEPARATOR}{bucket}",
        encode(root),
        encode(prefix)
    ))
}

/// Compute the epoch bucket containing `now`.
pub fn bucket_for(now: OffsetDateTime, epoch_length_secs: u64) -> i64 {
    let epoch_length = i64::try_from(epoch_length_secs.max(1)).unwrap_or(i64::MAX);
    now.unix_timestamp().div_euclid(epoch_length)
}

/// Derivative key of the epoch containing `now` under the given configuration.
pub fn derivative_graph_key_from_time(
    config: &RankingConfig,
    now: OffsetDateTime,
) -> DerivativeGraphKey {
    derivative_graph_key_for_generation(config, None, now)
}

/// Derivative key of the epoch containing `now` within an operator-bumped generation.
///
/// The generation is appended to the configured prefix, so a bump starts a fresh epoch even
/// inside the current bucket.
pub fn derivative_graph_key_for_generation(
    config: &RankingConfig,
    generation: Option<i64>,
    now: OffsetDateTime,
) -> DerivativeGraphKey {
    let prefix = match generation {
        Some(generation) => format!("{}g{generation}", config.derivative_graph_key_prefix),
        None => config.derivative_graph_key_prefix.clone(),
    };
    new_derivative_graph_key(
        &config.graph_key,
        &prefix,
        bucket_for(now, config.stale_result_age_secs),
    )
}

/// Recover the root key from a derivative key.
///
/// Returns `None` unless the key contains exactly one separator.
pub fn graph_key_from_derivative(key: &DerivativeGraphKey) -> Option<RootGraphKey> {
    let mut parts = key.0.split(SEPARATOR);
    let root = parts.next()?;
    parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some(RootGraphKey(root.to_string()))
}
