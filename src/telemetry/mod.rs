//! Metrics substrate
//!
//! Counters, gauges and histograms with fixed label schemas, snapshots with
//! lazily computed quantiles, and Prometheus/JSON/OpenTelemetry rendering.

pub mod atomic_float;
pub mod catalog;
pub mod collector;
pub mod export;
pub(crate) mod histogram;
pub mod reporter;
pub mod types;

pub use collector::MetricsCollector;
pub use export::{ExportFormat, ExportOptions, Exported};
pub use reporter::{SnapshotReporter, SnapshotSource};
pub use types::{
    Distribution, MetricDefinition, MetricKind, MetricSample, MetricValue, MetricsSnapshot,
};
