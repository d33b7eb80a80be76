//! Public entry point
//!
//! [`Pairwarm`] wires a [`TieredStore`], a [`CorrelationTracker`], a
//! [`CacheWarmer`] and a [`MetricsCollector`] together. Access events feed the
//! tracker and, when enabled, dispatch detached warming for the accessed key.
//! Lookups are counted so the adaptive strategy can steer on the observed hot
//! hit rate.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_utils::CachePadded;
use tokio::task::JoinHandle;

use crate::cache::config::{CacheConfig, StrategyConfig};
use crate::cache::correlation::CorrelationTracker;
use crate::cache::error::{CacheError, CacheResult};
use crate::cache::tier::{ColdStore, StoreStats, Tier, TieredStore};
use crate::cache::types::Value;
use crate::cache::warming::{
    AdaptiveState, CacheWarmer, WarmingContext, WarmingResult, WarmingStrategy,
};
use crate::telemetry::catalog::{
    self, CACHE_ERRORS_TOTAL, CACHE_LOOKUPS_TOTAL, CACHE_WRITES_TOTAL, CORRELATION_RECORDS_TOTAL,
    CORRELATION_TRACKED_PAIRS, HOT_HIT_RATE, HOT_HITS_TOTAL, HOT_MISSES_TOTAL, TIER_ENTRIES,
    WARMING_PAIRS, note,
};
use crate::telemetry::export::{ExportFormat, ExportOptions, Exported};
use crate::telemetry::{MetricsCollector, MetricsSnapshot, SnapshotReporter, SnapshotSource};

/// Tiered cache with correlation-driven warming.
///
/// Cloning is cheap and shares all state.
#[derive(Debug, Clone)]
pub struct Pairwarm {
    config: Arc<CacheConfig>,
    strategy: Arc<WarmingStrategy>,
    store: Arc<TieredStore>,
    tracker: Arc<CorrelationTracker>,
    metrics: Arc<MetricsCollector>,
    warmer: Arc<CacheWarmer>,
    /// N chosen by the last adaptive decision
    adaptive_pairs: Arc<CachePadded<AtomicUsize>>,
}

impl Pairwarm {
    pub fn builder() -> PairwarmBuilder {
        PairwarmBuilder::new()
    }

    /// Cache with default configuration and no cold backend
    pub fn new() -> CacheResult<Self> {
        Self::builder().build()
    }

    /// Record an access event at `timestamp_ms`.
    ///
    /// Updates correlations synchronously. With `warm_on_access` enabled and
    /// a tokio runtime available, warming for `key` is dispatched as a
    /// detached task whose handle is returned; the caller never has to await it.
    pub fn record_access(
        &self,
        key: &str,
        timestamp_ms: u64,
    ) -> CacheResult<Option<JoinHandle<WarmingResult>>> {
        self.tracker.record(key, timestamp_ms)?;
        note(self.metrics.increment_counter(CORRELATION_RECORDS_TOTAL, &[], 1));

        if !self.config.warming.warm_on_access {
            return Ok(None);
        }
        let ctx = self.warming_context(key)?;
        Ok(self
            .warmer
            .spawn_warm(key.to_string(), (*self.strategy).clone(), ctx))
    }

    /// Look `key` up, hottest tier first
    pub fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let found = self
            .store
            .lookup(key)
            .inspect_err(|e| self.count_error(e, "get"))?;

        let (outcome, hot_counter) = match &found {
            Some((_, Tier::Hot)) => ("hit", HOT_HITS_TOTAL),
            Some(_) => ("hit", HOT_MISSES_TOTAL),
            None => ("miss", HOT_MISSES_TOTAL),
        };
        note(self.metrics.increment_counter(CACHE_LOOKUPS_TOTAL, &[("result", outcome)], 1));
        note(self.metrics.increment_counter(hot_counter, &[], 1));
        Ok(found.map(|(value, _)| value))
    }

    pub fn set(&self, key: &str, value: impl Into<Value>, tier: Tier) -> CacheResult<()> {
        self.store
            .set(key, value, tier)
            .inspect_err(|e| self.count_error(e, "set"))?;
        note(self.metrics.increment_counter(CACHE_WRITES_TOTAL, &[("tier", tier.as_str())], 1));
        Ok(())
    }

    /// Remove `key` from every tier and the backend
    pub fn invalidate(&self, key: &str) -> CacheResult<bool> {
        self.store
            .invalidate(key)
            .inspect_err(|e| self.count_error(e, "invalidate"))
    }

    /// Warm `trigger` inline and wait for the outcome
    pub async fn warm_now(&self, trigger: &str) -> CacheResult<WarmingResult> {
        let ctx = self.warming_context(trigger)?;
        Ok(self.warmer.warm(trigger, &self.strategy, &ctx).await)
    }

    /// Context for the next warming of `trigger`.
    ///
    /// Carries the observed hot hit rate and, for the adaptive strategy, the
    /// previous N; the N this context yields becomes the state for the next.
    pub fn warming_context(&self, trigger: &str) -> CacheResult<WarmingContext> {
        let warming = &self.config.warming;
        let mut ctx = WarmingContext::new(
            trigger,
            warming.min_score,
            warming.max_candidates,
            Duration::from_millis(warming.time_budget_ms),
        )?
        .with_observed_hit_rate(self.observed_hit_rate());

        if let WarmingStrategy::Adaptive(params) = &*self.strategy {
            ctx.adaptive = AdaptiveState {
                current_pairs: self.adaptive_pairs.load(Ordering::Relaxed),
            };
            let next = params.next_pairs(&ctx);
            self.adaptive_pairs.store(next, Ordering::Relaxed);
            note(self.metrics.set_gauge(WARMING_PAIRS, &[], next as f64));
        }
        Ok(ctx)
    }

    /// Hot-tier hit rate from the lookup counters, `None` before any lookup
    pub fn observed_hit_rate(&self) -> Option<f64> {
        let hits = self.metrics.counter_value(HOT_HITS_TOTAL, &[]).unwrap_or(0);
        let misses = self.metrics.counter_value(HOT_MISSES_TOTAL, &[]).unwrap_or(0);
        let total = hits + misses;
        (total > 0).then(|| hits as f64 / total as f64)
    }

    /// Refresh derived gauges and take a metrics snapshot
    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        self.refresh_gauges();
        self.metrics.snapshot()
    }

    fn refresh_gauges(&self) {
        let stats = self.store.stats();
        for tier in Tier::ALL {
            note(self.metrics.set_gauge(
                TIER_ENTRIES,
                &[("tier", tier.as_str())],
                stats.tier(tier).size as f64,
            ));
        }
        if let Some(rate) = self.observed_hit_rate() {
            note(self.metrics.set_gauge(HOT_HIT_RATE, &[], rate));
        }
        note(self.metrics.set_gauge(
            CORRELATION_TRACKED_PAIRS,
            &[],
            self.tracker.tracked_pairs() as f64,
        ));
    }

    /// Snapshot and render for an external sink
    pub fn export(&self, format: ExportFormat) -> Exported {
        self.refresh_gauges();
        self.metrics.export(format, self.export_options())
    }

    /// Snapshot periodically at `metrics.snapshot_interval_ms`
    pub fn spawn_snapshot_task(&self) -> CacheResult<SnapshotReporter> {
        let interval = Duration::from_millis(self.config.metrics.snapshot_interval_ms);
        SnapshotReporter::spawn(Arc::new(self.clone()), interval)
    }

    fn export_options(&self) -> ExportOptions<'_> {
        ExportOptions {
            prefix: &self.config.metrics.prefix,
            service_name: &self.config.metrics.service_name,
        }
    }

    fn count_error(&self, error: &CacheError, operation: &str) {
        note(self.metrics.increment_counter(
            CACHE_ERRORS_TOTAL,
            &[("kind", error.kind().as_str()), ("operation", operation)],
            1,
        ));
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn strategy(&self) -> &WarmingStrategy {
        &self.strategy
    }

    pub fn store(&self) -> &Arc<TieredStore> {
        &self.store
    }

    pub fn tracker(&self) -> &Arc<CorrelationTracker> {
        &self.tracker
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn warmer(&self) -> &Arc<CacheWarmer> {
        &self.warmer
    }
}

impl SnapshotSource for Pairwarm {
    fn take_snapshot(&self) -> Arc<MetricsSnapshot> {
        self.snapshot()
    }
}

/// Fluent builder for [`Pairwarm`]
#[derive(Debug, Default)]
pub struct PairwarmBuilder {
    config: CacheConfig,
    backend: Option<Arc<dyn ColdStore>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl PairwarmBuilder {
    /// Create new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Start from a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> CacheResult<Self> {
        Ok(Self::from_config(CacheConfig::load(path)?))
    }

    pub fn hot_capacity(mut self, capacity: usize) -> Self {
        self.config.tiers.hot_capacity = capacity;
        self
    }

    pub fn warm_capacity(mut self, capacity: usize) -> Self {
        self.config.tiers.warm_capacity = capacity;
        self
    }

    pub fn cold_capacity(mut self, capacity: usize) -> Self {
        self.config.tiers.cold_capacity = capacity;
        self
    }

    /// Cascade evicted entries into the next colder tier
    pub fn demote_on_evict(mut self, enabled: bool) -> Self {
        self.config.tiers.demote_on_evict = enabled;
        self
    }

    pub fn cold_ttl_ms(mut self, ttl_ms: Option<u64>) -> Self {
        self.config.tiers.cold_ttl_ms = ttl_ms;
        self
    }

    /// Proxy the cold tier to `backend`
    pub fn cold_store(mut self, backend: Arc<dyn ColdStore>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn correlation_window_ms(mut self, window_ms: u64) -> Self {
        self.config.correlation.window_ms = window_ms;
        self
    }

    pub fn decay_horizon_ms(mut self, horizon_ms: u64) -> Self {
        self.config.correlation.decay_horizon_ms = horizon_ms;
        self
    }

    pub fn max_tracked_pairs(mut self, max_pairs: usize) -> Self {
        self.config.correlation.max_tracked_pairs = max_pairs;
        self
    }

    pub fn max_window_population(mut self, population: usize) -> Self {
        self.config.correlation.max_window_population = population;
        self
    }

    pub fn strategy(mut self, strategy: StrategyConfig) -> Self {
        self.config.warming.strategy = strategy;
        self
    }

    pub fn min_score(mut self, min_score: f64) -> Self {
        self.config.warming.min_score = min_score;
        self
    }

    pub fn max_candidates(mut self, max_candidates: usize) -> Self {
        self.config.warming.max_candidates = max_candidates;
        self
    }

    pub fn time_budget_ms(mut self, budget_ms: u64) -> Self {
        self.config.warming.time_budget_ms = budget_ms;
        self
    }

    pub fn fan_out(mut self, fan_out: usize) -> Self {
        self.config.warming.fan_out = fan_out;
        self
    }

    /// Dispatch background warming from `record_access`
    pub fn warm_on_access(mut self, enabled: bool) -> Self {
        self.config.warming.warm_on_access = enabled;
        self
    }

    pub fn metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.metrics.prefix = prefix.into();
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.metrics.service_name = name.into();
        self
    }

    pub fn snapshot_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.metrics.snapshot_interval_ms = interval_ms;
        self
    }

    /// Share an existing collector instead of creating one
    pub fn metrics_collector(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate the configuration and assemble the cache
    pub fn build(self) -> CacheResult<Pairwarm> {
        self.config.validate()?;
        let strategy = WarmingStrategy::from_config(&self.config.warming.strategy)?;

        let store = Arc::new(match self.backend {
            Some(backend) => TieredStore::with_backend(&self.config.tiers, backend),
            None => TieredStore::new(&self.config.tiers),
        });
        let tracker = Arc::new(CorrelationTracker::new(self.config.correlation.clone()));
        let metrics = self.metrics.unwrap_or_default();
        catalog::register_defaults(&metrics)?;
        let warmer = Arc::new(CacheWarmer::new(
            store.clone(),
            tracker.clone(),
            metrics.clone(),
            self.config.warming.fan_out,
        ));

        log::info!(
            "pairwarm ready: hot={} warm={} cold={} strategy={}",
            self.config.tiers.hot_capacity,
            self.config.tiers.warm_capacity,
            self.config.tiers.cold_capacity,
            strategy.name()
        );
        Ok(Pairwarm {
            config: Arc::new(self.config),
            strategy: Arc::new(strategy),
            store,
            tracker,
            metrics,
            warmer,
            adaptive_pairs: Arc::new(CachePadded::new(AtomicUsize::new(0))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::MetricValue;

    fn cache() -> Pairwarm {
        Pairwarm::builder().warm_on_access(false).build().unwrap()
    }

    #[test]
    fn test_get_counts_hot_hits_and_misses() {
        let cache = cache();
        cache.set("A", b"a".to_vec(), Tier::Hot).unwrap();
        cache.set("B", b"b".to_vec(), Tier::Warm).unwrap();

        assert!(cache.get("A").unwrap().is_some());
        assert!(cache.get("B").unwrap().is_some());
        assert!(cache.get("C").unwrap().is_none());

        let metrics = cache.metrics();
        assert_eq!(metrics.counter_value(HOT_HITS_TOTAL, &[]), Some(1));
        assert_eq!(metrics.counter_value(HOT_MISSES_TOTAL, &[]), Some(2));
        assert_eq!(metrics.counter_value(CACHE_LOOKUPS_TOTAL, &[("result", "hit")]), Some(2));
        let rate = cache.observed_hit_rate().unwrap();
        assert!((rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_hot_hits_agree_with_store_under_churn() {
        let cache = cache();
        for i in 0..16 {
            cache.set(&format!("K{}", i), vec![i as u8], Tier::Warm).unwrap();
        }
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let key = format!("K{}", (round + t * 5) % 16);
                        if t % 2 == 0 {
                            cache.get(&key).unwrap();
                        } else if round % 2 == 0 {
                            cache.store().promote(&key).unwrap();
                        } else {
                            cache.set(&key, vec![0], Tier::Warm).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = cache.metrics();
        let hot_hits = metrics.counter_value(HOT_HITS_TOTAL, &[]).unwrap_or(0);
        let hot_misses = metrics.counter_value(HOT_MISSES_TOTAL, &[]).unwrap_or(0);
        assert_eq!(hot_hits, cache.stats().tier(Tier::Hot).hits);
        assert_eq!(hot_hits + hot_misses, 400);
    }

    #[test]
    fn test_errors_are_counted_by_kind() {
        let cache = cache();
        assert!(cache.get("").is_err());
        assert_eq!(
            cache
                .metrics()
                .counter_value(CACHE_ERRORS_TOTAL, &[("kind", "validation"), ("operation", "get")]),
            Some(1)
        );
    }

    #[test]
    fn test_adaptive_context_threads_state_forward() {
        let cache = Pairwarm::builder()
            .warm_on_access(false)
            .strategy(StrategyConfig::Adaptive {
                target_hit_rate: 0.9,
                min_pairs: 2,
                max_pairs: 10,
                adjustment_factor: 0.5,
            })
            .build()
            .unwrap();
        // no lookups yet: N starts at min_pairs
        let first = cache.warming_context("A").unwrap();
        assert_eq!(first.adaptive.current_pairs, 0);

        cache.get("missing").unwrap();
        let second = cache.warming_context("A").unwrap();
        assert_eq!(second.observed_hit_rate, Some(0.0));
        assert_eq!(second.adaptive.current_pairs, 2);
        let third = cache.warming_context("A").unwrap();
        // 2 + ceil(8 * 0.5) = 6
        assert_eq!(third.adaptive.current_pairs, 6);
    }

    #[test]
    fn test_invalid_builder_config_rejected() {
        assert!(Pairwarm::builder().hot_capacity(0).build().is_err());
        assert!(Pairwarm::builder().min_score(2.0).build().is_err());
        assert!(
            Pairwarm::builder()
                .strategy(StrategyConfig::TopN { n: 0 })
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_snapshot_refreshes_gauges() {
        let cache = cache();
        cache.set("A", b"a".to_vec(), Tier::Hot).unwrap();
        cache.set("B", b"b".to_vec(), Tier::Cold).unwrap();
        cache.record_access("A", 0).unwrap();
        cache.record_access("B", 5).unwrap();

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.gauge(TIER_ENTRIES, &[("tier", "hot")]), Some(1.0));
        assert_eq!(snapshot.gauge(TIER_ENTRIES, &[("tier", "cold")]), Some(1.0));
        assert_eq!(snapshot.gauge(CORRELATION_TRACKED_PAIRS, &[]), Some(1.0));
        assert_eq!(snapshot.counter(CORRELATION_RECORDS_TOTAL, &[]), Some(2));
        assert!(matches!(
            snapshot.find(CACHE_WRITES_TOTAL, &[("tier", "hot")]).map(|s| s.value),
            Some(MetricValue::Counter(1))
        ));
    }

    #[test]
    fn test_export_applies_prefix() {
        let cache = Pairwarm::builder()
            .warm_on_access(false)
            .metric_prefix("market")
            .build()
            .unwrap();
        cache.set("A", b"a".to_vec(), Tier::Hot).unwrap();
        let text = cache.export(ExportFormat::Prometheus).to_string();
        assert!(text.contains("market_cache_writes_total{tier=\"hot\"} 1"));
        assert!(text.contains("# TYPE market_tier_entries gauge"));
    }

    #[tokio::test]
    async fn test_warm_now_and_detached_warming() {
        let cache = Pairwarm::builder()
            .min_score(0.0)
            .strategy(StrategyConfig::TopN { n: 1 })
            .build()
            .unwrap();
        cache.set("WBTC_USDT", b"1".to_vec(), Tier::Cold).unwrap();
        // current-thread runtime: neither task runs before both records land
        let weth = cache.record_access("WETH_USDT", 0).unwrap().unwrap();
        let wbtc = cache.record_access("WBTC_USDT", 10).unwrap().unwrap();
        assert_eq!(weth.await.unwrap().warmed, 1);
        // WBTC_USDT's only correlation is WETH_USDT, which is not cached
        assert_eq!(wbtc.await.unwrap().not_found, 1);
        assert_eq!(cache.store().tier_of("WBTC_USDT"), Some(Tier::Hot));

        let result = cache.warm_now("WETH_USDT").await.unwrap();
        assert_eq!(result.attempted, 1);
        assert_eq!(result.already_hot, 1);
        assert_eq!(result.warmed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_task_refreshes_latest() {
        let cache = Pairwarm::builder()
            .warm_on_access(false)
            .snapshot_interval_ms(50)
            .build()
            .unwrap();
        let reporter = cache.spawn_snapshot_task().unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let latest = cache.metrics().latest_snapshot().unwrap();
        assert_eq!(latest.gauge(TIER_ENTRIES, &[("tier", "hot")]), Some(0.0));
        reporter.stop();
    }
}
