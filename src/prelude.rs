//! Pairwarm prelude - convenient imports for users

pub use crate::cache::config::{
    CacheConfig, CorrelationConfig, MetricsConfig, StrategyConfig, TierConfig, WarmingConfig,
};
pub use crate::cache::correlation::{
    CorrelationAggregator, CorrelationPair, CorrelationSnapshot, CorrelationSummary,
    CorrelationTracker,
};
pub use crate::cache::error::{CacheError, CacheResult, ErrorKind};
pub use crate::cache::tier::{ColdStore, MemoryColdStore, StoreStats, Tier, TieredStore};
pub use crate::cache::types::Value;
pub use crate::cache::warming::{
    AdaptiveParams, AdaptiveState, CacheWarmer, WarmingContext, WarmingResult, WarmingStrategy,
};
pub use crate::pairwarm::{Pairwarm, PairwarmBuilder};
pub use crate::telemetry::{
    ExportFormat, Exported, MetricDefinition, MetricKind, MetricsCollector, MetricsSnapshot,
    SnapshotReporter,
};
