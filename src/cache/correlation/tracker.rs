//! Online co-occurrence tracking
//!
//! `record` is the hot path. It scans only the recent-record index (keys seen
//! within `window_ms` of the newest record), so its cost follows the window
//! population rather than the number of tracked keys. Each key appears in the
//! index at most once, at its latest timestamp.
//!
//! A pair's score is `co_occurrences / max(observations(a), observations(b))`
//! clamped to `[0, 1]`, computed on read from the current observation counts
//! and decayed by half every `decay_horizon_ms` once the pair has been unseen
//! for longer than the horizon.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ahash::{AHashMap, AHashSet};

use super::pair::{CorrelatedKey, CorrelationPair, CorrelationSnapshot, PairKey, PairStats, rank};
use crate::cache::config::CorrelationConfig;
use crate::cache::error::{CacheError, CacheResult, validate_key, validate_unit_interval};

#[derive(Debug, Clone)]
struct RecentRecord {
    key: Arc<str>,
    timestamp_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct KeyStats {
    observations: u64,
    last_seen_ms: u64,
}

#[derive(Debug)]
struct TrackerState {
    recent: VecDeque<RecentRecord>,
    keys: AHashMap<Arc<str>, KeyStats>,
    pairs: crate::cache::tier::RecencyList<PairKey, PairStats>,
    neighbors: AHashMap<Arc<str>, AHashSet<Arc<str>>>,
    /// Newest timestamp recorded so far
    clock_ms: u64,
    /// Reused buffer for the keys co-occurring with the current record
    scratch: Vec<Arc<str>>,
}

/// Co-occurrence tracker owned by a single execution context
#[derive(Debug)]
pub struct CorrelationTracker {
    state: RwLock<TrackerState>,
    config: CorrelationConfig,
}

impl CorrelationTracker {
    pub fn new(config: CorrelationConfig) -> Self {
        let state = TrackerState {
            recent: VecDeque::with_capacity(config.max_window_population.min(4_096)),
            keys: AHashMap::new(),
            pairs: crate::cache::tier::RecencyList::new(config.max_tracked_pairs),
            neighbors: AHashMap::new(),
            clock_ms: 0,
            scratch: Vec::new(),
        };
        Self {
            state: RwLock::new(state),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Record an access of `key` at `timestamp_ms`.
    ///
    /// Every other key whose latest record lies within the correlation window
    /// gains one co-occurrence with `key`.
    pub fn record(&self, key: &str, timestamp_ms: u64) -> CacheResult<()> {
        validate_key(key)?;
        let window = self.config.window_ms;
        let mut guard = self.write_state();
        let state = &mut *guard;

        state.clock_ms = state.clock_ms.max(timestamp_ms);
        let horizon_start = state.clock_ms.saturating_sub(window);
        while let Some(oldest) = state.recent.front() {
            if oldest.timestamp_ms >= horizon_start {
                break;
            }
            state.expire_oldest();
        }

        let key = intern(&state.keys, key);
        let stats = state.keys.entry(key.clone()).or_default();
        stats.observations += 1;
        stats.last_seen_ms = stats.last_seen_ms.max(timestamp_ms);

        let mut co_keys = std::mem::take(&mut state.scratch);
        co_keys.clear();
        let mut previous = None;
        for (idx, record) in state.recent.iter().enumerate() {
            if record.key == key {
                previous = Some(idx);
            } else if record.timestamp_ms.abs_diff(timestamp_ms) <= window {
                co_keys.push(record.key.clone());
            }
        }

        for other in co_keys.drain(..) {
            if let Some(pair) = PairKey::new(key.clone(), other) {
                state.observe_pair(pair, timestamp_ms);
            }
        }
        state.scratch = co_keys;

        if let Some(idx) = previous {
            state.recent.remove(idx);
        }
        state.recent.push_back(RecentRecord { key, timestamp_ms });
        while state.recent.len() > self.config.max_window_population {
            state.expire_oldest();
        }
        Ok(())
    }

    /// Symmetric score of a pair; 0.0 when the pair is not tracked
    pub fn score_of(&self, key_a: &str, key_b: &str) -> CacheResult<f64> {
        validate_pair(key_a, key_b)?;
        let state = self.read_state();
        Ok(state
            .lookup(key_a, key_b)
            .map(|(pair, stats)| state.score(&pair, stats, self.config.decay_horizon_ms))
            .unwrap_or(0.0))
    }

    /// Full view of a tracked pair
    pub fn pair(&self, key_a: &str, key_b: &str) -> CacheResult<Option<CorrelationPair>> {
        validate_pair(key_a, key_b)?;
        let state = self.read_state();
        Ok(state
            .lookup(key_a, key_b)
            .map(|(pair, stats)| state.view(&pair, stats, self.config.decay_horizon_ms)))
    }

    /// Up to `n` keys correlated with `key` scoring at least `min_score`,
    /// by score, then co-occurrences, then key
    pub fn top_correlated(
        &self,
        key: &str,
        n: usize,
        min_score: f64,
    ) -> CacheResult<Vec<(String, f64)>> {
        validate_unit_interval("min_score", min_score)?;
        let snapshot = self.snapshot_for(key)?;
        Ok(snapshot
            .top(n, min_score)
            .map(|entry| (entry.key.clone(), entry.score))
            .collect())
    }

    /// Everything correlated with `trigger`, ranked
    pub fn snapshot_for(&self, trigger: &str) -> CacheResult<CorrelationSnapshot> {
        validate_key(trigger)?;
        let state = self.read_state();
        let Some(others) = state.neighbors.get(trigger) else {
            return Ok(CorrelationSnapshot::empty(trigger, state.clock_ms));
        };

        let horizon = self.config.decay_horizon_ms;
        let mut entries: Vec<CorrelatedKey> = others
            .iter()
            .filter_map(|other| {
                let (pair, stats) = state.lookup(trigger, other)?;
                Some(CorrelatedKey {
                    key: other.to_string(),
                    score: state.score(&pair, stats, horizon),
                    co_occurrences: stats.co_occurrences,
                    last_seen_ms: stats.last_seen_ms,
                })
            })
            .collect();
        entries.sort_by(rank);

        Ok(CorrelationSnapshot {
            trigger: trigger.to_string(),
            now_ms: state.clock_ms,
            entries,
        })
    }

    /// Every tracked pair, most recently seen first
    pub fn pairs(&self) -> Vec<CorrelationPair> {
        let state = self.read_state();
        let horizon = self.config.decay_horizon_ms;
        state
            .pairs
            .iter()
            .map(|(pair, stats)| state.view(pair, *stats, horizon))
            .collect()
    }

    pub fn tracked_pairs(&self) -> usize {
        self.read_state().pairs.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.read_state().keys.len()
    }

    /// Keys currently in the recent-record index
    pub fn window_population(&self) -> usize {
        self.read_state().recent.len()
    }

    pub fn observations_of(&self, key: &str) -> u64 {
        self.read_state()
            .keys
            .get(key)
            .map(|stats| stats.observations)
            .unwrap_or(0)
    }

    /// Newest timestamp recorded so far
    pub fn clock_ms(&self) -> u64 {
        self.read_state().clock_ms
    }

    /// Drop all tracked state
    pub fn clear(&self) {
        let mut state = self.write_state();
        state.recent.clear();
        state.keys.clear();
        state.pairs.clear();
        state.neighbors.clear();
        state.clock_ms = 0;
    }

    /// Add externally observed counts, as produced by another context
    pub(crate) fn absorb(
        &self,
        clock_ms: u64,
        keys: impl IntoIterator<Item = (String, u64, u64)>,
        pairs: impl IntoIterator<Item = (String, String, u64, u64)>,
    ) {
        let mut guard = self.write_state();
        let state = &mut *guard;
        state.clock_ms = state.clock_ms.max(clock_ms);

        for (a, b, co_occurrences, last_seen_ms) in pairs {
            if a.is_empty() || b.is_empty() || co_occurrences == 0 {
                continue;
            }
            let a = intern(&state.keys, &a);
            let b = intern(&state.keys, &b);
            let Some(pair) = PairKey::new(a, b) else {
                continue;
            };
            for member in [pair.low().clone(), pair.high().clone()] {
                state.keys.entry(member).or_default();
            }
            state.add_pair_counts(pair, co_occurrences, last_seen_ms);
        }

        // counts of keys without a tracked pair would never be released
        for (key, observations, last_seen_ms) in keys {
            if let Some(stats) = state.keys.get_mut(key.as_str()) {
                stats.observations += observations;
                stats.last_seen_ms = stats.last_seen_ms.max(last_seen_ms);
            }
        }
    }

    /// Raw key counters, most observed first, for summaries
    pub(crate) fn key_counts(&self) -> Vec<(String, u64, u64)> {
        let state = self.read_state();
        let mut counts: Vec<_> = state
            .keys
            .iter()
            .map(|(key, stats)| (key.to_string(), stats.observations, stats.last_seen_ms))
            .collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts
    }

    /// Raw pair counters, most recently seen first
    pub(crate) fn pair_counts(&self, limit: usize) -> Vec<(String, String, u64, u64)> {
        self.read_state()
            .pairs
            .iter()
            .take(limit)
            .map(|(pair, stats)| {
                (
                    pair.low().to_string(),
                    pair.high().to_string(),
                    stats.co_occurrences,
                    stats.last_seen_ms,
                )
            })
            .collect()
    }

    #[inline]
    fn read_state(&self) -> RwLockReadGuard<'_, TrackerState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[inline]
    fn write_state(&self) -> RwLockWriteGuard<'_, TrackerState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TrackerState {
    /// Pop the oldest recent record; a key that left the window without
    /// forming any pair is forgotten
    fn expire_oldest(&mut self) {
        let Some(expired) = self.recent.pop_front() else {
            return;
        };
        if !self.neighbors.contains_key(&*expired.key) {
            self.keys.remove(&*expired.key);
        }
    }

    fn observe_pair(&mut self, pair: PairKey, timestamp_ms: u64) {
        self.add_pair_counts(pair, 1, timestamp_ms);
    }

    fn add_pair_counts(&mut self, pair: PairKey, co_occurrences: u64, last_seen_ms: u64) {
        if let Some(stats) = self.pairs.touch(&pair) {
            stats.co_occurrences += co_occurrences;
            stats.last_seen_ms = stats.last_seen_ms.max(last_seen_ms);
            return;
        }

        for (member, other) in [(pair.low(), pair.high()), (pair.high(), pair.low())] {
            self.neighbors
                .entry(member.clone())
                .or_default()
                .insert(other.clone());
        }
        let stats = PairStats {
            co_occurrences,
            last_seen_ms,
        };
        if let Some((evicted, _)) = self.pairs.insert(pair, stats) {
            log::trace!(
                "pair ceiling reached, evicting ({}, {})",
                evicted.low(),
                evicted.high()
            );
            self.forget_pair(&evicted);
        }
    }

    /// Drop adjacency for an evicted pair and any key left with no pairs and
    /// no presence in the recent window
    fn forget_pair(&mut self, pair: &PairKey) {
        for (member, other) in [(pair.low(), pair.high()), (pair.high(), pair.low())] {
            let orphaned = match self.neighbors.get_mut(&**member) {
                Some(set) => {
                    set.remove(&**other);
                    set.is_empty()
                }
                None => true,
            };
            if orphaned {
                self.neighbors.remove(&**member);
                let in_window = self.recent.iter().any(|record| record.key == *member);
                if !in_window {
                    self.keys.remove(&**member);
                }
            }
        }
    }

    fn lookup(&self, key_a: &str, key_b: &str) -> Option<(PairKey, PairStats)> {
        let (a, _) = self.keys.get_key_value(key_a)?;
        let (b, _) = self.keys.get_key_value(key_b)?;
        let pair = PairKey::new(a.clone(), b.clone())?;
        let stats = *self.pairs.peek(&pair)?;
        Some((pair, stats))
    }

    fn score(&self, pair: &PairKey, stats: PairStats, decay_horizon_ms: u64) -> f64 {
        let observations = |key: &Arc<str>| {
            self.keys
                .get(&**key)
                .map(|stats| stats.observations)
                .unwrap_or(0)
        };
        let denominator = observations(pair.low()).max(observations(pair.high()));
        if denominator == 0 {
            return 0.0;
        }
        let raw = (stats.co_occurrences as f64 / denominator as f64).clamp(0.0, 1.0);
        let age = self.clock_ms.saturating_sub(stats.last_seen_ms);
        (raw * decay_factor(age, decay_horizon_ms)).clamp(0.0, 1.0)
    }

    fn view(&self, pair: &PairKey, stats: PairStats, decay_horizon_ms: u64) -> CorrelationPair {
        CorrelationPair {
            key_a: pair.low().to_string(),
            key_b: pair.high().to_string(),
            co_occurrences: stats.co_occurrences,
            score: self.score(pair, stats, decay_horizon_ms),
            last_seen_ms: stats.last_seen_ms,
        }
    }
}

/// 1.0 up to the horizon, then halving every further horizon
#[inline]
pub(crate) fn decay_factor(age_ms: u64, horizon_ms: u64) -> f64 {
    if horizon_ms == 0 || age_ms <= horizon_ms {
        return 1.0;
    }
    let excess = (age_ms - horizon_ms) as f64 / horizon_ms as f64;
    0.5f64.powf(excess)
}

/// Reuse the tracker's existing allocation for `key` when there is one
#[inline]
fn intern(keys: &AHashMap<Arc<str>, KeyStats>, key: &str) -> Arc<str> {
    match keys.get_key_value(key) {
        Some((existing, _)) => existing.clone(),
        None => Arc::from(key),
    }
}

fn validate_pair(key_a: &str, key_b: &str) -> CacheResult<()> {
    validate_key(key_a)?;
    validate_key(key_b)?;
    if key_a == key_b {
        return Err(CacheError::validation(format!(
            "self pair ({}, {}) is not a correlation",
            key_a, key_b
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(window_ms: u64) -> CorrelationTracker {
        CorrelationTracker::new(CorrelationConfig {
            window_ms,
            ..CorrelationConfig::default()
        })
    }

    #[test]
    fn test_pair_within_window() {
        let tracker = tracker(50);
        tracker.record("WETH_USDT", 0).unwrap();
        tracker.record("WBTC_USDT", 10).unwrap();

        assert!(tracker.score_of("WETH_USDT", "WBTC_USDT").unwrap() > 0.0);
        let pair = tracker.pair("WBTC_USDT", "WETH_USDT").unwrap().unwrap();
        assert_eq!(pair.co_occurrences, 1);
        assert_eq!(pair.key_a, "WBTC_USDT");
    }

    #[test]
    fn test_outside_window_is_not_correlated() {
        let tracker = tracker(50);
        tracker.record("A", 0).unwrap();
        tracker.record("B", 51).unwrap();
        assert_eq!(tracker.score_of("A", "B").unwrap(), 0.0);
        assert_eq!(tracker.tracked_pairs(), 0);
        // A was pruned from the recent index
        assert_eq!(tracker.window_population(), 1);
    }

    #[test]
    fn test_score_is_symmetric() {
        let tracker = tracker(20);
        let keys = ["A", "B", "C", "D"];
        for t in 0..200u64 {
            let key = keys[((t * 7) % 4) as usize];
            tracker.record(key, t * 5).unwrap();
        }
        for a in keys {
            for b in keys {
                if a != b {
                    assert_eq!(
                        tracker.score_of(a, b).unwrap(),
                        tracker.score_of(b, a).unwrap()
                    );
                }
            }
        }
    }

    #[test]
    fn test_scores_bounded_and_no_self_pairs() {
        let tracker = tracker(30);
        for t in 0..300u64 {
            let key = format!("K{}", t % 5);
            tracker.record(&key, t * 3).unwrap();
            // same key twice in the window must not create a self pair
            tracker.record(&key, t * 3 + 1).unwrap();
        }
        let pairs = tracker.pairs();
        assert!(!pairs.is_empty());
        for pair in pairs {
            assert_ne!(pair.key_a, pair.key_b);
            assert!((0.0..=1.0).contains(&pair.score));
        }
        assert!(tracker.score_of("K1", "K1").is_err());
    }

    #[test]
    fn test_joint_observation_is_monotone_towards_one() {
        let tracker = tracker(50);
        // one noise observation of A keeps the first scores below 1
        tracker.record("A", 990).unwrap();
        let mut last_co = 0;
        let mut last_score = 0.0;
        for round in 1..=50u64 {
            let t = round * 1_000;
            tracker.record("A", t).unwrap();
            tracker.record("B", t + 5).unwrap();
            let pair = tracker.pair("A", "B").unwrap().unwrap();
            assert!(pair.co_occurrences > last_co);
            assert!(pair.score >= last_score);
            last_co = pair.co_occurrences;
            last_score = pair.score;
        }
        assert_eq!(last_co, 50);
        assert!(last_score > 0.97);
    }

    #[test]
    fn test_top_correlated_ordering() {
        let tracker = tracker(50);
        for round in 0..10u64 {
            let t = round * 1_000;
            tracker.record("T", t).unwrap();
            tracker.record("X", t + 1).unwrap();
            if round % 2 == 0 {
                tracker.record("Y", t + 2).unwrap();
            }
        }
        tracker.record("Z", 20_000).unwrap();
        tracker.record("T", 20_001).unwrap();

        let top = tracker.top_correlated("T", 10, 0.0).unwrap();
        let keys: Vec<_> = top.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys[0], "X");
        assert!(keys.contains(&"Y") && keys.contains(&"Z"));
        for window in top.windows(2) {
            assert!(window[0].1 >= window[1].1);
        }

        let limited = tracker.top_correlated("T", 1, 0.0).unwrap();
        assert_eq!(limited.len(), 1);
        assert!(tracker.top_correlated("T", 5, 1.5).is_err());
        assert!(tracker.top_correlated("unknown", 5, 0.0).unwrap().is_empty());
    }

    #[test]
    fn test_pair_ceiling_evicts_least_recently_seen() {
        let tracker = CorrelationTracker::new(CorrelationConfig {
            window_ms: 10,
            max_tracked_pairs: 2,
            ..CorrelationConfig::default()
        });
        tracker.record("A", 0).unwrap();
        tracker.record("B", 1).unwrap(); // (A,B)
        tracker.record("C", 100).unwrap();
        tracker.record("D", 101).unwrap(); // (C,D)
        tracker.record("E", 200).unwrap();
        tracker.record("F", 201).unwrap(); // (E,F) evicts (A,B)

        assert_eq!(tracker.tracked_pairs(), 2);
        assert!(tracker.pair("A", "B").unwrap().is_none());
        assert!(tracker.pair("E", "F").unwrap().is_some());
        assert_eq!(tracker.observations_of("A"), 0);
        assert!(tracker.snapshot_for("A").unwrap().is_empty());
    }

    #[test]
    fn test_window_population_cap() {
        let tracker = CorrelationTracker::new(CorrelationConfig {
            window_ms: 1_000,
            max_window_population: 4,
            ..CorrelationConfig::default()
        });
        for i in 0..10u64 {
            tracker.record(&format!("K{}", i), i).unwrap();
        }
        assert_eq!(tracker.window_population(), 4);
        // K9 only saw the four keys still in the index
        let snapshot = tracker.snapshot_for("K9").unwrap();
        assert_eq!(snapshot.len(), 4);
    }

    #[test]
    fn test_decay_lowers_stale_scores() {
        let tracker = CorrelationTracker::new(CorrelationConfig {
            window_ms: 50,
            decay_horizon_ms: 1_000,
            ..CorrelationConfig::default()
        });
        tracker.record("A", 0).unwrap();
        tracker.record("B", 10).unwrap();
        let fresh = tracker.score_of("A", "B").unwrap();
        tracker.record("C", 3_010).unwrap();
        let stale = tracker.score_of("A", "B").unwrap();
        assert!(stale < fresh);
        assert!((stale - fresh * 0.25).abs() < 1e-9);
        assert_eq!(decay_factor(500, 1_000), 1.0);
    }

    #[test]
    fn test_out_of_order_jitter_tolerated() {
        let tracker = tracker(50);
        tracker.record("A", 100).unwrap();
        tracker.record("B", 95).unwrap();
        assert_eq!(tracker.pair("A", "B").unwrap().unwrap().co_occurrences, 1);
        assert_eq!(tracker.clock_ms(), 100);
    }

    #[test]
    fn test_validation() {
        let tracker = tracker(50);
        assert!(matches!(tracker.record("", 0), Err(CacheError::Validation(_))));
        assert!(tracker.score_of("A", "").is_err());
        assert!(tracker.snapshot_for("").is_err());
    }

    #[test]
    fn test_unpaired_keys_are_released() {
        let tracker = CorrelationTracker::new(CorrelationConfig {
            window_ms: 10,
            max_tracked_pairs: 16,
            ..CorrelationConfig::default()
        });
        for i in 0..10_000u64 {
            tracker.record(&format!("K{}", i), i * 100).unwrap();
        }
        assert_eq!(tracker.tracked_pairs(), 0);
        assert_eq!(tracker.window_population(), 1);
        assert_eq!(tracker.tracked_keys(), 1);
    }

    #[test]
    fn test_tracked_keys_follow_pair_ceiling() {
        let tracker = CorrelationTracker::new(CorrelationConfig {
            window_ms: 10,
            max_tracked_pairs: 16,
            ..CorrelationConfig::default()
        });
        for i in 0..1_000u64 {
            let t = i * 100;
            tracker.record(&format!("A{}", i), t).unwrap();
            tracker.record(&format!("B{}", i), t + 1).unwrap();
        }
        assert_eq!(tracker.tracked_pairs(), 16);
        assert!(tracker.tracked_keys() <= 2 * 16 + 2);
        assert!(tracker.pair("A999", "B999").unwrap().is_some());
        assert_eq!(tracker.observations_of("A0"), 0);
    }
}
