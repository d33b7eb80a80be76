use std::sync::Arc;
use std::time::Duration;

use pairwarm::prelude::*;

fn quiet_cache() -> Pairwarm {
    Pairwarm::builder()
        .warm_on_access(false)
        .min_score(0.0)
        .strategy(StrategyConfig::TopN { n: 1 })
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_correlated_pair_is_warmed() {
    let cache = quiet_cache();
    cache.set("WBTC_USDT", b"42000".to_vec(), Tier::Cold).unwrap();

    cache.record_access("WETH_USDT", 0).unwrap();
    cache.record_access("WBTC_USDT", 10).unwrap();

    let tracker = cache.tracker();
    assert!(tracker.score_of("WETH_USDT", "WBTC_USDT").unwrap() > 0.0);
    let pair = tracker.pair("WETH_USDT", "WBTC_USDT").unwrap().unwrap();
    assert_eq!(pair.co_occurrences, 1);

    let result = cache.warm_now("WETH_USDT").await.unwrap();
    assert_eq!(result.attempted, 1);
    assert_eq!(result.warmed, 1);
    assert_eq!(cache.store().tier_of("WBTC_USDT"), Some(Tier::Hot));
    assert_eq!(cache.get("WBTC_USDT").unwrap().as_deref(), Some(&b"42000"[..]));
}

#[tokio::test]
async fn test_records_outside_window_do_not_correlate() {
    let cache = quiet_cache();
    cache.record_access("WETH_USDT", 0).unwrap();
    cache.record_access("WBTC_USDT", 500).unwrap();
    assert_eq!(cache.tracker().score_of("WETH_USDT", "WBTC_USDT").unwrap(), 0.0);
    let result = cache.warm_now("WETH_USDT").await.unwrap();
    assert_eq!(result, WarmingResult { duration_ms: result.duration_ms, ..Default::default() });
}

#[test]
fn test_hot_tier_eviction_scenario() {
    let cache = Pairwarm::builder()
        .warm_on_access(false)
        .hot_capacity(2)
        .build()
        .unwrap();
    cache.set("A", b"a".to_vec(), Tier::Hot).unwrap();
    cache.set("B", b"b".to_vec(), Tier::Hot).unwrap();
    cache.set("C", b"c".to_vec(), Tier::Hot).unwrap();

    assert!(cache.get("A").unwrap().is_none());
    assert!(cache.get("B").unwrap().is_some());
    assert!(cache.get("C").unwrap().is_some());
    assert_eq!(cache.stats().tier(Tier::Hot).size, 2);
    assert_eq!(cache.stats().tier(Tier::Hot).evictions, 1);
}

#[test]
fn test_counters_match_operations() {
    let cache = quiet_cache();
    for i in 0..25 {
        cache.set(&format!("K{}", i), vec![i as u8], Tier::Warm).unwrap();
    }
    for i in 0..40 {
        let _ = cache.get(&format!("K{}", i)).unwrap();
    }
    let snapshot = cache.snapshot();
    assert_eq!(snapshot.counter("cache_writes_total", &[("tier", "warm")]), Some(25));
    assert_eq!(snapshot.counter("cache_lookups_total", &[("result", "hit")]), Some(25));
    assert_eq!(snapshot.counter("cache_lookups_total", &[("result", "miss")]), Some(15));
    assert_eq!(snapshot.counter_total("cache_lookups_total"), 40);
}

#[test]
fn test_adaptive_n_stays_within_bounds() {
    let cache = Pairwarm::builder()
        .warm_on_access(false)
        .strategy(StrategyConfig::Adaptive {
            target_hit_rate: 0.7,
            min_pairs: 1,
            max_pairs: 6,
            adjustment_factor: 0.5,
        })
        .build()
        .unwrap();
    cache.set("H", b"h".to_vec(), Tier::Hot).unwrap();

    let WarmingStrategy::Adaptive(params) = cache.strategy().clone() else {
        panic!("adaptive strategy expected");
    };
    for round in 0..50 {
        if round % 3 == 0 {
            cache.get("H").unwrap();
        } else {
            cache.get("missing").unwrap();
        }
        let ctx = cache.warming_context("T").unwrap();
        let n = params.next_pairs(&ctx);
        assert!((1..=6).contains(&n), "round {} produced {}", round, n);
    }
}

#[tokio::test]
async fn test_selection_is_repeatable() {
    let cache = Pairwarm::builder()
        .warm_on_access(false)
        .min_score(0.0)
        .strategy(StrategyConfig::TopN { n: 3 })
        .build()
        .unwrap();
    for (i, key) in ["A", "B", "C", "D"].iter().enumerate() {
        cache.record_access(key, i as u64 * 5).unwrap();
    }
    let ctx = cache.warming_context("A").unwrap();
    let snapshot = cache.tracker().snapshot_for("A").unwrap();
    let first = cache.strategy().select(&ctx, &snapshot).unwrap();
    assert_eq!(first.len(), 3);
    for _ in 0..10 {
        let snapshot = cache.tracker().snapshot_for("A").unwrap();
        assert_eq!(cache.strategy().select(&ctx, &snapshot).unwrap(), first);
    }
}

#[tokio::test]
async fn test_unavailable_cold_store_does_not_break_hot_path() {
    let backend = Arc::new(MemoryColdStore::new());
    let cache = Pairwarm::builder()
        .warm_on_access(false)
        .min_score(0.0)
        .strategy(StrategyConfig::TopN { n: 4 })
        .cold_store(backend.clone())
        .build()
        .unwrap();
    backend.set("REMOTE", Arc::from(&b"r"[..]), None).unwrap();
    cache.set("HOT", b"h".to_vec(), Tier::Hot).unwrap();
    cache.record_access("TRIGGER", 0).unwrap();
    cache.record_access("REMOTE", 1).unwrap();

    backend.set_available(false);
    let result = cache.warm_now("TRIGGER").await.unwrap();
    assert_eq!(result.attempted, 1);
    assert_eq!(result.unavailable, 1);

    assert_eq!(cache.get("HOT").unwrap().as_deref(), Some(&b"h"[..]));
    assert!(matches!(cache.get("REMOTE"), Err(CacheError::StoreUnavailable(_))));

    backend.set_available(true);
    let retry = cache.warm_now("TRIGGER").await.unwrap();
    assert_eq!(retry.warmed, 1);
    assert!(cache.store().contains_hot("REMOTE"));
}

#[tokio::test]
async fn test_exports_cover_every_format() {
    let cache = quiet_cache();
    cache.set("WBTC_USDT", b"1".to_vec(), Tier::Warm).unwrap();
    cache.record_access("WETH_USDT", 0).unwrap();
    cache.record_access("WBTC_USDT", 10).unwrap();
    cache.warm_now("WETH_USDT").await.unwrap();

    let text = cache.export(ExportFormat::Prometheus).to_string();
    assert!(text.contains("pairwarm_warming_candidates_total{outcome=\"warmed\"} 1"));
    assert!(text.contains("# TYPE pairwarm_warming_duration_ms summary"));

    let json = cache.export(ExportFormat::Json);
    let metrics = json.as_document().unwrap()["metrics"].as_array().unwrap().clone();
    assert!(metrics.iter().any(|m| m["name"] == "pairwarm_warming_runs_total"));

    let otel = cache.export(ExportFormat::OpenTelemetry);
    let doc = otel.as_document().unwrap();
    assert_eq!(
        doc["resourceMetrics"][0]["resource"]["attributes"][0]["value"]["stringValue"],
        "pairwarm"
    );
}

#[test]
fn test_summaries_merge_across_contexts() {
    let worker = CorrelationTracker::new(CorrelationConfig::default());
    worker.record("A", 0).unwrap();
    worker.record("B", 5).unwrap();

    let aggregator = CorrelationAggregator::new(
        Arc::new(CorrelationTracker::new(CorrelationConfig::default())),
        8,
    );
    aggregator.publisher("worker-1", 100).publish(&worker).unwrap();
    assert_eq!(aggregator.drain(), 1);
    assert!(aggregator.tracker().score_of("A", "B").unwrap() > 0.0);
}

#[test]
fn test_config_file_drives_builder() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pairwarm.toml");
    std::fs::write(
        &path,
        r#"
[tiers]
hot_capacity = 8

[warming]
time_budget_ms = 40

[warming.strategy]
kind = "threshold"
threshold = 0.5
"#,
    )
    .unwrap();
    let cache = PairwarmBuilder::load(&path).unwrap().warm_on_access(false).build().unwrap();
    assert_eq!(cache.config().tiers.hot_capacity, 8);
    assert_eq!(cache.strategy(), &WarmingStrategy::Threshold { threshold: 0.5 });
    let ctx = cache.warming_context("K").unwrap();
    assert_eq!(ctx.time_budget, Duration::from_millis(40));
}
