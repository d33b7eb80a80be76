//! Candidate selection policies
//!
//! A strategy is a plain value. `select` is a pure function of the context
//! and a correlation snapshot: identical inputs always yield the same ordered
//! candidates, and nothing is mutated.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::context::WarmingContext;
use crate::cache::config::StrategyConfig;
use crate::cache::correlation::pair::{CorrelatedKey, rank};
use crate::cache::correlation::CorrelationSnapshot;
use crate::cache::error::{CacheError, CacheResult, validate_unit_interval};

/// Hit-rate feedback parameters for [`WarmingStrategy::Adaptive`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveParams {
    pub target_hit_rate: f64,
    pub min_pairs: usize,
    pub max_pairs: usize,
    /// Fraction of the remaining distance to the bound covered per step
    pub adjustment_factor: f64,
}

impl AdaptiveParams {
    pub fn new(
        target_hit_rate: f64,
        min_pairs: usize,
        max_pairs: usize,
        adjustment_factor: f64,
    ) -> CacheResult<Self> {
        validate_unit_interval("target_hit_rate", target_hit_rate)?;
        validate_unit_interval("adjustment_factor", adjustment_factor)?;
        if min_pairs > max_pairs {
            return Err(CacheError::validation(format!(
                "min_pairs {} exceeds max_pairs {}",
                min_pairs, max_pairs
            )));
        }
        Ok(Self {
            target_hit_rate,
            min_pairs,
            max_pairs,
            adjustment_factor,
        })
    }

    /// Effective N for this invocation.
    ///
    /// Below the target hit rate N moves toward `max_pairs`, above it toward
    /// `min_pairs`, each step covering `adjustment_factor` of the remaining
    /// distance (rounded up). Without a usable hit rate N stays put. The
    /// result is always within `[min_pairs, max_pairs]`.
    pub fn next_pairs(&self, ctx: &WarmingContext) -> usize {
        let (min, max) = (self.min_pairs, self.max_pairs);
        let current = match ctx.adaptive.current_pairs {
            0 => min,
            n => n.clamp(min, max),
        };
        let step = |distance: usize| (distance as f64 * self.adjustment_factor).ceil() as usize;

        let next = match ctx.observed_hit_rate {
            Some(rate) if rate < self.target_hit_rate => current.saturating_add(step(max - current)),
            Some(rate) if rate > self.target_hit_rate => current.saturating_sub(step(current - min)),
            _ => current,
        };
        next.clamp(min, max)
    }
}

/// Warming selection policy
#[derive(Debug, Clone, PartialEq)]
pub enum WarmingStrategy {
    /// The `n` best-scoring correlated keys at or above `min_score`
    TopN { n: usize },
    /// Every correlated key scoring at least `threshold`
    Threshold { threshold: f64 },
    /// Top-N with N driven by observed hit rate
    Adaptive(AdaptiveParams),
    /// Score weighted by `0.5^(age / half_life)` where age is measured from
    /// the pair's last co-occurrence to the snapshot clock
    TimeDecay { half_life_ms: u64 },
}

impl WarmingStrategy {
    pub fn top_n(n: usize) -> Self {
        WarmingStrategy::TopN { n }
    }

    pub fn threshold(threshold: f64) -> CacheResult<Self> {
        validate_unit_interval("threshold", threshold)?;
        Ok(WarmingStrategy::Threshold { threshold })
    }

    pub fn time_decay(half_life_ms: u64) -> CacheResult<Self> {
        if half_life_ms == 0 {
            return Err(CacheError::validation("half_life_ms must be non-zero"));
        }
        Ok(WarmingStrategy::TimeDecay { half_life_ms })
    }

    pub fn from_config(config: &StrategyConfig) -> CacheResult<Self> {
        match *config {
            StrategyConfig::TopN { n } => Ok(Self::top_n(n)),
            StrategyConfig::Threshold { threshold } => Self::threshold(threshold),
            StrategyConfig::Adaptive {
                target_hit_rate,
                min_pairs,
                max_pairs,
                adjustment_factor,
            } => AdaptiveParams::new(target_hit_rate, min_pairs, max_pairs, adjustment_factor)
                .map(WarmingStrategy::Adaptive),
            StrategyConfig::TimeDecay { half_life_ms } => Self::time_decay(half_life_ms),
        }
    }

    /// Label value for metrics
    pub const fn name(&self) -> &'static str {
        match self {
            WarmingStrategy::TopN { .. } => "top_n",
            WarmingStrategy::Threshold { .. } => "threshold",
            WarmingStrategy::Adaptive(_) => "adaptive",
            WarmingStrategy::TimeDecay { .. } => "time_decay",
        }
    }

    /// Ordered candidate keys for `ctx.trigger_key`.
    ///
    /// Every variant caps its output at `ctx.max_candidates`.
    pub fn select(
        &self,
        ctx: &WarmingContext,
        snapshot: &CorrelationSnapshot,
    ) -> CacheResult<Vec<String>> {
        if snapshot.trigger != ctx.trigger_key {
            return Err(CacheError::validation(format!(
                "snapshot for {} used to warm {}",
                snapshot.trigger, ctx.trigger_key
            )));
        }
        let cap = ctx.max_candidates;

        let selected = match self {
            WarmingStrategy::TopN { n } => collect_keys(snapshot.top((*n).min(cap), ctx.min_score)),
            WarmingStrategy::Threshold { threshold } => collect_keys(
                snapshot
                    .entries
                    .iter()
                    .filter(|entry| entry.score >= *threshold)
                    .take(cap),
            ),
            WarmingStrategy::Adaptive(params) => {
                let n = params.next_pairs(ctx).min(cap);
                collect_keys(snapshot.top(n, ctx.min_score))
            }
            WarmingStrategy::TimeDecay { half_life_ms } => {
                let mut weighted: Vec<(f64, &CorrelatedKey)> = snapshot
                    .entries
                    .iter()
                    .filter(|entry| entry.score >= ctx.min_score)
                    .map(|entry| {
                        let age = snapshot.now_ms.saturating_sub(entry.last_seen_ms);
                        (entry.score * recency_weight(age, *half_life_ms), entry)
                    })
                    .collect();
                weighted.sort_by(|(wa, a), (wb, b)| match wb.total_cmp(wa) {
                    Ordering::Equal => rank(a, b),
                    other => other,
                });
                weighted
                    .into_iter()
                    .take(cap)
                    .map(|(_, entry)| entry.key.clone())
                    .collect()
            }
        };
        Ok(selected)
    }
}

impl Default for WarmingStrategy {
    fn default() -> Self {
        WarmingStrategy::TopN { n: 5 }
    }
}

fn collect_keys<'a>(entries: impl Iterator<Item = &'a CorrelatedKey>) -> Vec<String> {
    entries.map(|entry| entry.key.clone()).collect()
}

/// `0.5^(age / half_life)`
#[inline]
pub(crate) fn recency_weight(age_ms: u64, half_life_ms: u64) -> f64 {
    if half_life_ms == 0 {
        return if age_ms == 0 { 1.0 } else { 0.0 };
    }
    0.5_f64.powf(age_ms as f64 / half_life_ms as f64)
}
