//! Batching over single-pass iterators, and per-batch bookkeeping.

use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Iterator adapter yielding owned groups of at most `size` items.
///
/// The source is consumed lazily; nothing beyond the current group is buffered.
pub struct Batches<I: Iterator> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Batches<I> {
    /// Group `inner` into batches of `size` items. A size of zero is treated as one.
    pub fn new(inner: I, size: usize) -> Self {
        Self {
            inner,
            size: size.max(1),
        }
    }
}

impl<I: Iterator> Iterator for Batches<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let batch: Vec<_> = self.inner.by_ref().take(self.size).collect();
        if batch.is_empty() { None } else { Some(batch) }
    }
}

/// Extension trait to call `.batches(n)` on any iterator.
pub trait BatchesExt: Iterator + Sized {
    fn batches(self, size: usize) -> Batches<Self> {
        Batches::new(self, size)
    }
}

impl<I: Iterator> BatchesExt for I {}

/// Result of one bounded unit of work: rows looked at, and rows changed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub scanned: u64,
    pub altered: u64,
}

impl BatchCounts {
    pub fn new(scanned: u64, altered: u64) -> Self {
        Self { scanned, altered }
    }
}

impl AddAssign for BatchCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.scanned += rhs.scanned;
        self.altered += rhs.altered;
    }
}
