//! Cache system module
//!
//! Tiered storage with O(1) recency eviction, co-occurrence tracking between
//! keys, and predictive warming driven by those correlations.

pub mod config;
pub mod correlation;
pub mod error;
pub mod tier;
pub mod types;
pub mod warming;

pub use config::CacheConfig;
pub use correlation::{CorrelationPair, CorrelationSnapshot, CorrelationTracker};
pub use error::{CacheError, CacheResult, ErrorKind};
pub use tier::{CacheEntry, CacheEntryInfo, ColdStore, MemoryColdStore, Tier, TieredStore};
pub use types::Value;
pub use warming::{CacheWarmer, WarmingContext, WarmingResult, WarmingStrategy};
