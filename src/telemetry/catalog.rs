//! Built-in metric names
//!
//! Definitions for everything the cache, tracker and warmer record, registered
//! up front so exports carry help text and a fixed label schema.

use super::collector::MetricsCollector;
use super::types::{MetricDefinition, MetricKind};
use crate::cache::error::CacheResult;

pub const CACHE_LOOKUPS_TOTAL: &str = "cache_lookups_total";
pub const HOT_HITS_TOTAL: &str = "hot_hits_total";
pub const HOT_MISSES_TOTAL: &str = "hot_misses_total";
pub const CACHE_WRITES_TOTAL: &str = "cache_writes_total";
pub const CACHE_ERRORS_TOTAL: &str = "cache_errors_total";
pub const TIER_ENTRIES: &str = "tier_entries";
pub const HOT_HIT_RATE: &str = "hot_hit_rate";
pub const CORRELATION_RECORDS_TOTAL: &str = "correlation_records_total";
pub const CORRELATION_TRACKED_PAIRS: &str = "correlation_tracked_pairs";
pub const WARMING_RUNS_TOTAL: &str = "warming_runs_total";
pub const WARMING_CANDIDATES_TOTAL: &str = "warming_candidates_total";
pub const WARMING_ERRORS_TOTAL: &str = "warming_errors_total";
pub const WARMING_DURATION_MS: &str = "warming_duration_ms";
pub const WARMING_PAIRS: &str = "warming_pairs";

pub fn definitions() -> Vec<MetricDefinition> {
    use MetricKind::{Counter, Gauge, Histogram};
    vec![
        MetricDefinition::new(CACHE_LOOKUPS_TOTAL, Counter, &["result"])
            .with_help("Cache lookups by outcome"),
        MetricDefinition::new(HOT_HITS_TOTAL, Counter, &[]).with_help("Lookups served by the hot tier"),
        MetricDefinition::new(HOT_MISSES_TOTAL, Counter, &[])
            .with_help("Lookups the hot tier could not serve"),
        MetricDefinition::new(CACHE_WRITES_TOTAL, Counter, &["tier"]).with_help("Cache writes by tier"),
        MetricDefinition::new(CACHE_ERRORS_TOTAL, Counter, &["kind", "operation"])
            .with_help("Failed cache operations"),
        MetricDefinition::new(TIER_ENTRIES, Gauge, &["tier"]).with_help("Resident entries per tier"),
        MetricDefinition::new(HOT_HIT_RATE, Gauge, &[]).with_help("Hot tier hit rate"),
        MetricDefinition::new(CORRELATION_RECORDS_TOTAL, Counter, &[])
            .with_help("Access events recorded by the correlation tracker"),
        MetricDefinition::new(CORRELATION_TRACKED_PAIRS, Gauge, &[])
            .with_help("Key pairs currently tracked"),
        MetricDefinition::new(WARMING_RUNS_TOTAL, Counter, &["strategy"])
            .with_help("Warming invocations"),
        MetricDefinition::new(WARMING_CANDIDATES_TOTAL, Counter, &["outcome"])
            .with_help("Warming candidates by outcome"),
        MetricDefinition::new(WARMING_ERRORS_TOTAL, Counter, &["kind"])
            .with_help("Warming failures by error kind"),
        MetricDefinition::new(WARMING_DURATION_MS, Histogram, &["strategy"])
            .with_help("Wall time of one warming invocation in milliseconds"),
        MetricDefinition::new(WARMING_PAIRS, Gauge, &[])
            .with_help("Candidate count chosen by the adaptive strategy"),
    ]
}

pub fn register_defaults(collector: &MetricsCollector) -> CacheResult<()> {
    for definition in definitions() {
        collector.register(definition)?;
    }
    Ok(())
}

/// Log and swallow a failed metric update; metrics never fail an operation
#[inline]
pub(crate) fn note(result: CacheResult<()>) {
    if let Err(e) = result {
        log::debug!("metric update rejected: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_register_once() {
        let collector = MetricsCollector::new();
        register_defaults(&collector).unwrap();
        register_defaults(&collector).unwrap();
        assert_eq!(collector.definitions().len(), definitions().len());
        collector
            .increment_counter(CACHE_ERRORS_TOTAL, &[("operation", "get"), ("kind", "timeout")], 1)
            .unwrap();
        assert!(collector.increment_counter(CACHE_ERRORS_TOTAL, &[("kind", "timeout")], 1).is_err());
    }
}
