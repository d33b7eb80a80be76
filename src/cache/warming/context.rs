//! Per-invocation warming context
//!
//! Everything a strategy may depend on besides the correlation snapshot.
//! Adaptive state lives here rather than in the strategy, so one strategy
//! value can serve concurrent warming calls.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::error::{CacheResult, validate_key, validate_unit_interval};

/// Feedback state carried from one adaptive warming decision to the next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdaptiveState {
    /// N chosen by the previous decision; 0 before the first one
    pub current_pairs: usize,
}

/// Immutable inputs for one warming invocation
#[derive(Debug, Clone, PartialEq)]
pub struct WarmingContext {
    pub trigger_key: String,
    /// Hot-tier hit rate observed through the metrics substrate, `None`
    /// before any lookup was recorded
    pub observed_hit_rate: Option<f64>,
    pub min_score: f64,
    pub max_candidates: usize,
    /// Budget for the whole invocation, split evenly across candidates
    pub time_budget: Duration,
    pub adaptive: AdaptiveState,
}

impl WarmingContext {
    pub fn new(
        trigger_key: impl Into<String>,
        min_score: f64,
        max_candidates: usize,
        time_budget: Duration,
    ) -> CacheResult<Self> {
        let trigger_key = trigger_key.into();
        validate_key(&trigger_key)?;
        validate_unit_interval("min_score", min_score)?;
        Ok(Self {
            trigger_key,
            observed_hit_rate: None,
            min_score,
            max_candidates,
            time_budget,
            adaptive: AdaptiveState::default(),
        })
    }

    pub fn with_observed_hit_rate(mut self, hit_rate: Option<f64>) -> Self {
        self.observed_hit_rate = hit_rate;
        self
    }

    pub fn with_adaptive_state(mut self, state: AdaptiveState) -> Self {
        self.adaptive = state;
        self
    }

    /// Time slice for each of `candidates` promotions
    #[inline]
    pub fn per_candidate_budget(&self, candidates: usize) -> Duration {
        if candidates == 0 {
            return self.time_budget;
        }
        self.time_budget / candidates.min(u32::MAX as usize) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_validation() {
        assert!(WarmingContext::new("WETH_USDT", 0.0, 4, Duration::from_millis(100)).is_ok());
        assert!(WarmingContext::new("", 0.0, 4, Duration::from_millis(100)).is_err());
        assert!(WarmingContext::new("WETH_USDT", 1.5, 4, Duration::from_millis(100)).is_err());
        assert!(WarmingContext::new("WETH_USDT", -0.1, 4, Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_budget_split() {
        let ctx = WarmingContext::new("k", 0.0, 4, Duration::from_millis(100)).unwrap();
        assert_eq!(ctx.per_candidate_budget(4), Duration::from_millis(25));
        assert_eq!(ctx.per_candidate_budget(0), Duration::from_millis(100));
    }
}
