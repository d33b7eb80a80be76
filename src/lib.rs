//! Pairwarm - tiered cache with correlation-driven predictive warming
//!
//! Built for read-heavy lookup workloads where keys are requested in
//! predictable groups (per-pair market data being the motivating case).
//!
//! # Features
//!
//! - **Three tiers**: Hot, Warm and Cold, each with O(1) least-recently-used
//!   eviction; the cold tier can proxy to an external [`ColdStore`]
//! - **Co-occurrence tracking**: access events within a time window build
//!   symmetric, time-decayed pair scores
//! - **Predictive warming**: pluggable selection strategies (top-N, threshold,
//!   adaptive, time-decay) feed background promotion into the hot tier
//! - **Metrics substrate**: counters, gauges and histograms with Prometheus,
//!   JSON and OpenTelemetry-style export
//!
//! ```no_run
//! use pairwarm::prelude::*;
//!
//! # async fn run() -> CacheResult<()> {
//! let cache = Pairwarm::builder()
//!     .hot_capacity(256)
//!     .strategy(StrategyConfig::TopN { n: 4 })
//!     .build()?;
//!
//! cache.set("WBTC_USDT", b"42000".to_vec(), Tier::Warm)?;
//! cache.record_access("WETH_USDT", 0)?;
//! cache.record_access("WBTC_USDT", 10)?;
//! let result = cache.warm_now("WETH_USDT").await?;
//! println!("warmed {} of {}", result.warmed, result.attempted);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod pairwarm;
pub mod prelude;
pub mod telemetry;

pub use cache::{
    CacheConfig, CacheError, CacheResult, ColdStore, CorrelationTracker, ErrorKind,
    MemoryColdStore, Tier, TieredStore,
};
pub use cache::warming::{CacheWarmer, WarmingContext, WarmingResult, WarmingStrategy};
pub use pairwarm::{Pairwarm, PairwarmBuilder};
pub use telemetry::{ExportFormat, Exported, MetricsCollector, MetricsSnapshot};
