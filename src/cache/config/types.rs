//! Configuration section types
//!
//! Every field has a default so partial TOML documents deserialize.

use serde::{Deserialize, Serialize};

/// Tier capacities and eviction behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub hot_capacity: usize,
    pub warm_capacity: usize,
    /// Capacity of the in-process cold mirror
    pub cold_capacity: usize,
    /// Cascade evicted entries into the next colder tier instead of dropping them
    pub demote_on_evict: bool,
    /// Time to live for values written to the cold backend
    pub cold_ttl_ms: Option<u64>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            hot_capacity: 1_024,
            warm_capacity: 8_192,
            cold_capacity: 65_536,
            demote_on_evict: false,
            cold_ttl_ms: None,
        }
    }
}

/// Co-occurrence tracking parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Two records closer than this are a co-occurrence
    pub window_ms: u64,
    /// Scores start decaying once a pair has not been seen for this long
    pub decay_horizon_ms: u64,
    /// Ceiling on tracked pairs; least recently seen pairs go first
    pub max_tracked_pairs: usize,
    /// Ceiling on the recent-record index scanned by `record`
    pub max_window_population: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_ms: 50,
            decay_horizon_ms: 60_000,
            max_tracked_pairs: 100_000,
            max_window_population: 1_024,
        }
    }
}

/// Warming strategy selection, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    TopN {
        n: usize,
    },
    Threshold {
        threshold: f64,
    },
    Adaptive {
        target_hit_rate: f64,
        min_pairs: usize,
        max_pairs: usize,
        adjustment_factor: f64,
    },
    TimeDecay {
        half_life_ms: u64,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::TopN { n: 5 }
    }
}

/// Warming orchestration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmingConfig {
    pub strategy: StrategyConfig,
    pub min_score: f64,
    pub max_candidates: usize,
    /// Budget for one `warm` call, divided across its candidates
    pub time_budget_ms: u64,
    /// Promotions in flight at once, shared by every concurrent `warm` call
    pub fan_out: usize,
    /// Dispatch background warming from `record_access`
    pub warm_on_access: bool,
}

impl Default for WarmingConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyConfig::default(),
            min_score: 0.1,
            max_candidates: 16,
            time_budget_ms: 100,
            fan_out: 4,
            warm_on_access: true,
        }
    }
}

/// Metrics substrate parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prepended to every exported metric name
    pub prefix: String,
    /// Period of the background snapshot task
    pub snapshot_interval_ms: u64,
    /// Service name reported in the OpenTelemetry-style document
    pub service_name: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prefix: "pairwarm".to_string(),
            snapshot_interval_ms: 10_000,
            service_name: "pairwarm".to_string(),
        }
    }
}
