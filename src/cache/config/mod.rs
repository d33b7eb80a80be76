//! Cache configuration
//!
//! `CacheConfig` groups tier, correlation, warming and metrics settings. It is
//! loaded from TOML, checked with [`CacheConfig::validate`], and consumed by
//! the builder.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::cache::error::{CacheError, CacheResult};

pub mod types;

pub use types::{CorrelationConfig, MetricsConfig, StrategyConfig, TierConfig, WarmingConfig};

/// Complete configuration surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub tiers: TierConfig,
    pub correlation: CorrelationConfig,
    pub warming: WarmingConfig,
    pub metrics: MetricsConfig,
}

impl CacheConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> CacheResult<Self> {
        let config: CacheConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        log::info!("loaded cache configuration from {}", path.display());
        Ok(config)
    }

    /// Serialize to pretty TOML
    pub fn to_toml_string(&self) -> CacheResult<String> {
        toml::to_string_pretty(self).map_err(|e| CacheError::configuration(e.to_string()))
    }

    pub fn validate(&self) -> CacheResult<()> {
        let tiers = &self.tiers;
        if tiers.hot_capacity == 0 || tiers.warm_capacity == 0 || tiers.cold_capacity == 0 {
            return Err(CacheError::configuration("tier capacities must be non-zero"));
        }
        if tiers.hot_capacity > tiers.warm_capacity {
            log::warn!(
                "hot tier capacity {} exceeds warm tier capacity {}",
                tiers.hot_capacity,
                tiers.warm_capacity
            );
        }

        let correlation = &self.correlation;
        if correlation.window_ms == 0 {
            return Err(CacheError::configuration("correlation window must be non-zero"));
        }
        if correlation.decay_horizon_ms == 0 {
            return Err(CacheError::configuration("decay horizon must be non-zero"));
        }
        if correlation.max_tracked_pairs == 0 || correlation.max_window_population == 0 {
            return Err(CacheError::configuration(
                "max_tracked_pairs and max_window_population must be non-zero",
            ));
        }

        let warming = &self.warming;
        check_unit("warming.min_score", warming.min_score)?;
        if warming.max_candidates == 0 {
            return Err(CacheError::configuration("max_candidates must be non-zero"));
        }
        if warming.fan_out == 0 {
            return Err(CacheError::configuration("fan_out must be non-zero"));
        }
        if warming.time_budget_ms == 0 {
            return Err(CacheError::configuration("time_budget_ms must be non-zero"));
        }
        match &warming.strategy {
            StrategyConfig::TopN { n } if *n == 0 => {
                return Err(CacheError::configuration("top_n requires n > 0"));
            }
            StrategyConfig::Threshold { threshold } => {
                check_unit("strategy.threshold", *threshold)?;
            }
            StrategyConfig::Adaptive {
                target_hit_rate,
                min_pairs,
                max_pairs,
                adjustment_factor,
            } => {
                check_unit("strategy.target_hit_rate", *target_hit_rate)?;
                check_unit("strategy.adjustment_factor", *adjustment_factor)?;
                if min_pairs > max_pairs {
                    return Err(CacheError::configuration(format!(
                        "min_pairs {} exceeds max_pairs {}",
                        min_pairs, max_pairs
                    )));
                }
                if *max_pairs == 0 {
                    return Err(CacheError::configuration("max_pairs must be non-zero"));
                }
            }
            StrategyConfig::TimeDecay { half_life_ms } if *half_life_ms == 0 => {
                return Err(CacheError::configuration("half_life_ms must be non-zero"));
            }
            _ => {}
        }

        if self.metrics.prefix.is_empty() {
            return Err(CacheError::configuration("metric prefix must not be empty"));
        }
        if !self
            .metrics
            .prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(CacheError::configuration(format!(
                "metric prefix {:?} must be [A-Za-z0-9_]",
                self.metrics.prefix
            )));
        }
        if self.metrics.snapshot_interval_ms == 0 {
            return Err(CacheError::configuration("snapshot_interval_ms must be non-zero"));
        }
        Ok(())
    }
}

fn check_unit(name: &str, value: f64) -> CacheResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CacheError::configuration(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}
