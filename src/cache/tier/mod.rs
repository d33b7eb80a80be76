//! Three-tier cache storage
//!
//! Hot is the smallest tier and fully resident; Warm is resident as well;
//! Cold keeps an in-process recency mirror and may proxy to a [`ColdStore`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::types::Value;

pub mod backend;
pub mod recency;
pub mod stats;
pub mod store;

pub use backend::{ColdStore, MemoryColdStore};
pub use recency::RecencyList;
pub use stats::{StoreStats, TierSnapshot};
pub use store::TieredStore;

/// Cache level, hottest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Hot, Tier::Warm, Tier::Cold];

    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Tier::Hot => 0,
            Tier::Warm => 1,
            Tier::Cold => 2,
        }
    }

    /// Next colder tier, `None` for Cold
    #[inline]
    pub const fn colder(self) -> Option<Tier> {
        match self {
            Tier::Hot => Some(Tier::Warm),
            Tier::Warm => Some(Tier::Cold),
            Tier::Cold => None,
        }
    }

    /// Label value used by the metrics substrate
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Warm => "warm",
            Tier::Cold => "cold",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resident cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: Arc<str>,
    pub value: Value,
    pub tier: Tier,
    pub last_access_ms: u64,
    pub size_estimate: usize,
}

impl CacheEntry {
    pub fn new(key: Arc<str>, value: Value, tier: Tier, now_ms: u64) -> Self {
        let size_estimate = key.len() + value.len() + std::mem::size_of::<Self>();
        Self {
            key,
            value,
            tier,
            last_access_ms: now_ms,
            size_estimate,
        }
    }

    /// Metadata without the payload
    pub fn info(&self) -> CacheEntryInfo {
        CacheEntryInfo {
            tier: self.tier,
            last_access_ms: self.last_access_ms,
            size_estimate: self.size_estimate,
        }
    }
}

/// Entry metadata returned by `TieredStore::entry_info`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntryInfo {
    pub tier: Tier,
    pub last_access_ms: u64,
    pub size_estimate: usize,
}
