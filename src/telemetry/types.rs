//! Metric definitions, samples and snapshots

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Kind of a metric series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

/// Registered metric: name, kind and its ordered label schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub kind: MetricKind,
    pub label_schema: Vec<String>,
    pub help: String,
}

impl MetricDefinition {
    pub fn new(name: impl Into<String>, kind: MetricKind, label_schema: &[&str]) -> Self {
        let name = name.into();
        Self {
            help: format!("{} {}", kind.as_str(), name),
            name,
            kind,
            label_schema: label_schema.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }
}

/// Histogram summary computed at snapshot time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Distribution {
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Value of one series at snapshot time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricValue {
    Counter(u64),
    Gauge(f64),
    Histogram(Distribution),
}

/// One labelled series in a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub labels: BTreeMap<String, String>,
    pub value: MetricValue,
    pub timestamp_ms: u64,
}

impl MetricSample {
    fn matches(&self, name: &str, labels: &[(&str, &str)]) -> bool {
        self.name == name
            && self.labels.len() == labels.len()
            && labels
                .iter()
                .all(|(k, v)| self.labels.get(*k).is_some_and(|value| value == v))
    }
}

/// All series at one point in time, ordered by name then labels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp_ms: u64,
    pub samples: Vec<MetricSample>,
    /// Help text per metric name
    pub help: BTreeMap<String, String>,
}

impl MetricsSnapshot {
    pub fn find(&self, name: &str, labels: &[(&str, &str)]) -> Option<&MetricSample> {
        self.samples.iter().find(|s| s.matches(name, labels))
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        match self.find(name, labels)?.value {
            MetricValue::Counter(v) => Some(v),
            _ => None,
        }
    }

    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        match self.find(name, labels)?.value {
            MetricValue::Gauge(v) => Some(v),
            _ => None,
        }
    }

    pub fn distribution(&self, name: &str, labels: &[(&str, &str)]) -> Option<Distribution> {
        match self.find(name, labels)?.value {
            MetricValue::Histogram(d) => Some(d),
            _ => None,
        }
    }

    /// Sum of a counter across all label values
    pub fn counter_total(&self, name: &str) -> u64 {
        self.samples
            .iter()
            .filter(|s| s.name == name)
            .filter_map(|s| match s.value {
                MetricValue::Counter(v) => Some(v),
                _ => None,
            })
            .sum()
    }

    /// `hits / (hits + misses)` from two counters, `None` before any lookup
    pub fn ratio(
        &self,
        hits: (&str, &[(&str, &str)]),
        misses: (&str, &[(&str, &str)]),
    ) -> Option<f64> {
        let hits = self.counter(hits.0, hits.1).unwrap_or(0);
        let misses = self.counter(misses.0, misses.1).unwrap_or(0);
        let total = hits + misses;
        (total > 0).then(|| hits as f64 / total as f64)
    }
}
