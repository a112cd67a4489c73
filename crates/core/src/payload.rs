//! Per-repository rank payloads and their epoch-aware merge.

use crate::graph_key::DerivativeGraphKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Document path to reference count.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathPayload(pub BTreeMap<String, i64>);

impl PathPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, path: &str) -> Option<i64> {
        self.0.get(path).copied()
    }

    /// Add `count` to `path`.
    pub fn add(&mut self, path: impl Into<String>, count: i64) {
        *self.0.entry(path.into()).or_default() += count;
    }

    /// Sum another payload into this one key by key.
    pub fn merge(&mut self, other: &PathPayload) {
        for (path, count) in &other.0 {
            *self.0.entry(path.clone()).or_default() += count;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for PathPayload {
    fn from_iter<T: IntoIterator<Item = (S, i64)>>(iter: T) -> Self {
        let mut payload = PathPayload::new();
        for (path, count) in iter {
            payload.add(path, count);
        }
        payload
    }
}

/// Combine a stored payload with a batch computed for `epoch`.
///
/// A payload written under another epoch is stale and is replaced wholesale. A payload of the
/// same epoch accumulates.
pub fn merge_into(
    existing: Option<(&DerivativeGraphKey, PathPayload)>,
    epoch: &DerivativeGraphKey,
    batch: &PathPayload,
) -> PathPayload {
    match existing {
        Some((key, mut payload)) if key == epoch => {
            payload.merge(batch);
            payload
        }
        _ => batch.clone(),
    }
}
