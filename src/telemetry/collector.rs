//! Low-overhead metrics collector
//!
//! Series are indexed directly by a key made of the metric name followed by
//! the label values in schema order, built in a stack buffer. Hot-path calls
//! do one definition lookup and one series lookup, then a single atomic update
//! (histograms also push into their pending buffer). Sorting, quantiles and
//! formatting happen only in [`MetricsCollector::snapshot`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use arrayvec::ArrayString;
use crossbeam_utils::CachePadded;
use dashmap::DashMap;

use super::atomic_float::AtomicF64;
use super::export::{self, ExportFormat, ExportOptions, Exported};
use super::histogram::Histogram;
use super::types::{MetricDefinition, MetricKind, MetricSample, MetricValue, MetricsSnapshot};
use crate::cache::error::{CacheError, CacheResult};
use crate::cache::types::timestamp_millis;

/// Upper bound on name plus label values for one series
const SERIES_KEY_CAPACITY: usize = 256;
const SEPARATOR: char = '\u{1f}';

type SeriesKey = ArrayString<SERIES_KEY_CAPACITY>;

#[derive(Debug)]
enum SeriesData {
    Counter(CachePadded<AtomicU64>),
    Gauge(AtomicF64),
    Histogram(Histogram),
}

#[derive(Debug)]
struct Series {
    name: Arc<str>,
    /// Label name/value pairs in schema order
    labels: Vec<(String, String)>,
    data: SeriesData,
}

/// Counter/gauge/histogram registry owned by one execution context
#[derive(Debug, Default)]
pub struct MetricsCollector {
    definitions: DashMap<String, Arc<MetricDefinition>>,
    series: DashMap<String, Arc<Series>>,
    latest: RwLock<Option<Arc<MetricsSnapshot>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric ahead of use.
    ///
    /// Re-registering an identical definition is a no-op; a conflicting kind
    /// or schema is rejected.
    pub fn register(&self, definition: MetricDefinition) -> CacheResult<()> {
        validate_name(&definition.name)?;
        if let Some(existing) = self.definitions.get(&definition.name) {
            if existing.kind != definition.kind || existing.label_schema != definition.label_schema
            {
                return Err(CacheError::validation(format!(
                    "metric {} already registered as {} {:?}",
                    definition.name,
                    existing.kind.as_str(),
                    existing.label_schema
                )));
            }
            return Ok(());
        }
        self.definitions
            .entry(definition.name.clone())
            .or_insert_with(|| Arc::new(definition));
        Ok(())
    }

    /// Add `delta` to a counter
    #[inline]
    pub fn increment_counter(&self, name: &str, labels: &[(&str, &str)], delta: u64) -> CacheResult<()> {
        self.with_series(name, MetricKind::Counter, labels, |data| {
            if let SeriesData::Counter(counter) = data {
                counter.fetch_add(delta, Ordering::Relaxed);
            }
        })
    }

    /// Set a gauge to `value`
    #[inline]
    pub fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) -> CacheResult<()> {
        self.with_series(name, MetricKind::Gauge, labels, |data| {
            if let SeriesData::Gauge(gauge) = data {
                gauge.store(value, Ordering::Relaxed);
            }
        })
    }

    /// Record one histogram observation
    #[inline]
    pub fn record_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) -> CacheResult<()> {
        self.with_series(name, MetricKind::Histogram, labels, |data| {
            if let SeriesData::Histogram(histogram) = data {
                histogram.record(value);
            }
        })
    }

    /// Current counter value without taking a snapshot
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        let definition = self.definitions.get(name)?;
        let key = series_key(&definition, labels).ok()?;
        let series = self.series.get(key.as_str())?;
        match &series.data {
            SeriesData::Counter(counter) => Some(counter.load(Ordering::Relaxed)),
            _ => None,
        }
    }

    /// Current gauge value without taking a snapshot
    pub fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        let definition = self.definitions.get(name)?;
        let key = series_key(&definition, labels).ok()?;
        let series = self.series.get(key.as_str())?;
        match &series.data {
            SeriesData::Gauge(gauge) => Some(gauge.load(Ordering::Relaxed)),
            _ => None,
        }
    }

    pub fn definitions(&self) -> Vec<MetricDefinition> {
        let mut definitions: Vec<_> = self
            .definitions
            .iter()
            .map(|entry| (**entry.value()).clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Materialize every series, computing histogram quantiles over the
    /// observations recorded since the previous snapshot
    pub fn snapshot(&self) -> Arc<MetricsSnapshot> {
        let timestamp_ms = timestamp_millis();
        let mut samples: Vec<MetricSample> = self
            .series
            .iter()
            .map(|entry| {
                let series = entry.value();
                let (kind, value) = match &series.data {
                    SeriesData::Counter(counter) => (
                        MetricKind::Counter,
                        MetricValue::Counter(counter.load(Ordering::Relaxed)),
                    ),
                    SeriesData::Gauge(gauge) => (
                        MetricKind::Gauge,
                        MetricValue::Gauge(gauge.load(Ordering::Relaxed)),
                    ),
                    SeriesData::Histogram(histogram) => (
                        MetricKind::Histogram,
                        MetricValue::Histogram(histogram.distribution()),
                    ),
                };
                MetricSample {
                    name: series.name.to_string(),
                    kind,
                    labels: series.labels.iter().cloned().collect(),
                    value,
                    timestamp_ms,
                }
            })
            .collect();
        samples.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.labels.cmp(&b.labels)));

        let help: BTreeMap<String, String> = self
            .definitions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().help.clone()))
            .collect();

        let snapshot = Arc::new(MetricsSnapshot {
            timestamp_ms,
            samples,
            help,
        });
        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(snapshot.clone());
        snapshot
    }

    /// Take a fresh snapshot and render it
    pub fn export(&self, format: ExportFormat, options: ExportOptions<'_>) -> Exported {
        export::render(&self.snapshot(), format, options)
    }

    /// Most recent snapshot, if one was taken
    pub fn latest_snapshot(&self) -> Option<Arc<MetricsSnapshot>> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Drop all series and the cached snapshot; definitions are kept.
    /// Test and teardown hook.
    pub fn reset(&self) {
        self.series.clear();
        *self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        log::debug!("metrics collector reset");
    }

    #[inline]
    fn with_series<F>(&self, name: &str, kind: MetricKind, labels: &[(&str, &str)], update: F) -> CacheResult<()>
    where
        F: FnOnce(&SeriesData),
    {
        let definition = self.definition_for(name, kind, labels)?;
        if definition.kind != kind {
            return Err(CacheError::validation(format!(
                "metric {} is a {}, not a {}",
                name,
                definition.kind.as_str(),
                kind.as_str()
            )));
        }
        let key = series_key(&definition, labels)?;

        if let Some(series) = self.series.get(key.as_str()) {
            update(&series.data);
            return Ok(());
        }

        let series = self
            .series
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(new_series(&definition, labels)))
            .clone();
        update(&series.data);
        Ok(())
    }

    /// Existing definition, or one auto-registered from the first use with
    /// label names sorted
    #[inline]
    fn definition_for(&self, name: &str, kind: MetricKind, labels: &[(&str, &str)]) -> CacheResult<Arc<MetricDefinition>> {
        if let Some(definition) = self.definitions.get(name) {
            return Ok(definition.clone());
        }
        validate_name(name)?;
        let mut schema: Vec<&str> = labels.iter().map(|(k, _)| *k).collect();
        schema.sort_unstable();
        schema.dedup();
        let definition = MetricDefinition::new(name, kind, &schema);
        Ok(self
            .definitions
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(definition))
            .clone())
    }
}

/// `name SEP value1 SEP value2 ...` with values in schema order
fn series_key(definition: &MetricDefinition, labels: &[(&str, &str)]) -> CacheResult<SeriesKey> {
    if labels.len() != definition.label_schema.len() {
        return Err(CacheError::validation(format!(
            "metric {} expects labels {:?}",
            definition.name, definition.label_schema
        )));
    }
    let mut key = SeriesKey::new();
    let overflow = || CacheError::validation(format!("label set of {} too long", definition.name));
    key.try_push_str(&definition.name).map_err(|_| overflow())?;
    for label in &definition.label_schema {
        let value = labels
            .iter()
            .find(|(k, _)| *k == label.as_str())
            .map(|(_, v)| *v)
            .ok_or_else(|| {
                CacheError::validation(format!(
                    "metric {} missing label {}",
                    definition.name, label
                ))
            })?;
        key.try_push(SEPARATOR).map_err(|_| overflow())?;
        key.try_push_str(value).map_err(|_| overflow())?;
    }
    Ok(key)
}

fn new_series(definition: &MetricDefinition, labels: &[(&str, &str)]) -> Series {
    let labels = definition
        .label_schema
        .iter()
        .map(|label| {
            let value = labels
                .iter()
                .find(|(k, _)| *k == label.as_str())
                .map(|(_, v)| v.to_string())
                .unwrap_or_default();
            (label.clone(), value)
        })
        .collect();
    let data = match definition.kind {
        MetricKind::Counter => SeriesData::Counter(CachePadded::new(AtomicU64::new(0))),
        MetricKind::Gauge => SeriesData::Gauge(AtomicF64::new(0.0)),
        MetricKind::Histogram => SeriesData::Histogram(Histogram::new()),
    };
    Series {
        name: Arc::from(definition.name.as_str()),
        labels,
        data,
    }
}

fn validate_name(name: &str) -> CacheResult<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CacheError::validation(format!(
            "invalid metric name {:?}",
            name
        )));
    }
    Ok(())
}
