//! Per-tier statistics with atomic counters
//!
//! Counters are updated on the hot path with relaxed atomics and read as a
//! plain snapshot by `TieredStore::stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use serde::{Deserialize, Serialize};

use super::Tier;

/// Lock-free counters for one tier
#[derive(Debug, Default)]
pub(crate) struct TierCounters {
    hits: CachePadded<AtomicU64>,
    misses: CachePadded<AtomicU64>,
    evictions: CachePadded<AtomicU64>,
    /// Entries that arrived in this tier through promotion
    promotions: CachePadded<AtomicU64>,
}

impl TierCounters {
    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, tier: Tier, size: usize, capacity: usize) -> TierSnapshot {
        TierSnapshot {
            tier,
            size,
            capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.promotions.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time view of a single tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSnapshot {
    pub tier: Tier,
    /// Entries currently resident in-process
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub promotions: u64,
}

impl TierSnapshot {
    /// Hits over lookups, 0.0 before the first lookup
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Statistics for all three tiers, hottest first
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub tiers: [TierSnapshot; 3],
}

impl StoreStats {
    #[inline]
    pub fn tier(&self, tier: Tier) -> &TierSnapshot {
        &self.tiers[tier.index()]
    }

    pub fn size_per_tier(&self) -> [usize; 3] {
        self.tiers.map(|t| t.size)
    }

    pub fn hits_per_tier(&self) -> [u64; 3] {
        self.tiers.map(|t| t.hits)
    }

    pub fn misses_per_tier(&self) -> [u64; 3] {
        self.tiers.map(|t| t.misses)
    }

    /// Fraction of hot lookups that did not fall through to a colder tier
    pub fn hot_hit_rate(&self) -> f64 {
        self.tier(Tier::Hot).hit_rate()
    }

    pub fn total_entries(&self) -> usize {
        self.tiers.iter().map(|t| t.size).sum()
    }
}
