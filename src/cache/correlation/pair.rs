//! Correlation pair types and read-side snapshots

use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Unordered key pair, stored with the lexicographically smaller key first
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PairKey {
    low: Arc<str>,
    high: Arc<str>,
}

impl PairKey {
    /// `None` for a self pair
    pub fn new(a: Arc<str>, b: Arc<str>) -> Option<Self> {
        match a.cmp(&b) {
            Ordering::Less => Some(Self { low: a, high: b }),
            Ordering::Greater => Some(Self { low: b, high: a }),
            Ordering::Equal => None,
        }
    }

    #[inline]
    pub fn low(&self) -> &Arc<str> {
        &self.low
    }

    #[inline]
    pub fn high(&self) -> &Arc<str> {
        &self.high
    }

    /// The member of the pair that is not `key`
    #[inline]
    pub fn other(&self, key: &str) -> &Arc<str> {
        if &*self.low == key { &self.high } else { &self.low }
    }
}

/// Mutable per-pair counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PairStats {
    pub co_occurrences: u64,
    pub last_seen_ms: u64,
}

/// Public view of a tracked pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub key_a: String,
    pub key_b: String,
    pub co_occurrences: u64,
    /// Normalized, time-decayed frequency in `[0, 1]`
    pub score: f64,
    pub last_seen_ms: u64,
}

/// One key correlated with a trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedKey {
    pub key: String,
    pub score: f64,
    pub co_occurrences: u64,
    pub last_seen_ms: u64,
}

/// Candidate ordering: score descending, then co-occurrences descending, then key
pub(crate) fn rank(a: &CorrelatedKey, b: &CorrelatedKey) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.co_occurrences.cmp(&a.co_occurrences))
        .then_with(|| a.key.cmp(&b.key))
}

/// Immutable view of everything correlated with one trigger key.
///
/// Entries are in rank order. Strategies read only this, so selection runs
/// without holding any tracker lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSnapshot {
    pub trigger: String,
    /// Tracker clock (latest record timestamp) when the snapshot was taken
    pub now_ms: u64,
    pub entries: Vec<CorrelatedKey>,
}

impl CorrelationSnapshot {
    pub fn empty(trigger: impl Into<String>, now_ms: u64) -> Self {
        Self {
            trigger: trigger.into(),
            now_ms,
            entries: Vec::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Up to `n` entries scoring at least `min_score`, in rank order
    pub fn top(&self, n: usize, min_score: f64) -> impl Iterator<Item = &CorrelatedKey> {
        self.entries
            .iter()
            .filter(move |entry| entry.score >= min_score)
            .take(n)
    }
}
