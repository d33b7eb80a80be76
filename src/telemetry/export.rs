//! Snapshot rendering for external sinks
//!
//! Three renderings of the same [`MetricsSnapshot`]: Prometheus text
//! exposition, a flat JSON document, and an OTLP/JSON-shaped metrics payload.
//! Rendering never touches live series.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use super::types::{Distribution, MetricKind, MetricSample, MetricValue, MetricsSnapshot};
use crate::cache::error::CacheError;

/// Quantiles emitted for histogram series
const QUANTILES: [(&str, f64); 3] = [("0.5", 0.5), ("0.95", 0.95), ("0.99", 0.99)];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Prometheus,
    Json,
    OpenTelemetry,
}

impl FromStr for ExportFormat {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prometheus" | "prom" => Ok(ExportFormat::Prometheus),
            "json" => Ok(ExportFormat::Json),
            "opentelemetry" | "open_telemetry" | "otel" | "otlp" => Ok(ExportFormat::OpenTelemetry),
            other => Err(CacheError::validation(format!(
                "unknown export format: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Prometheus => "prometheus",
            ExportFormat::Json => "json",
            ExportFormat::OpenTelemetry => "opentelemetry",
        })
    }
}

/// Rendered snapshot
#[derive(Debug, Clone, PartialEq)]
pub enum Exported {
    /// Prometheus text exposition
    Text(String),
    /// JSON or OTLP/JSON document
    Document(JsonValue),
}

impl Exported {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Exported::Text(text) => Some(text),
            Exported::Document(_) => None,
        }
    }

    pub fn as_document(&self) -> Option<&JsonValue> {
        match self {
            Exported::Text(_) => None,
            Exported::Document(doc) => Some(doc),
        }
    }
}

impl fmt::Display for Exported {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exported::Text(text) => f.write_str(text),
            Exported::Document(doc) => write!(f, "{}", doc),
        }
    }
}

/// Naming applied while rendering
#[derive(Debug, Clone, Copy)]
pub struct ExportOptions<'a> {
    /// Prepended to every metric name as `prefix_`; empty for none
    pub prefix: &'a str,
    /// `service.name` resource attribute for OpenTelemetry output
    pub service_name: &'a str,
}

pub fn render(snapshot: &MetricsSnapshot, format: ExportFormat, options: ExportOptions<'_>) -> Exported {
    match format {
        ExportFormat::Prometheus => Exported::Text(render_prometheus(snapshot, options.prefix)),
        ExportFormat::Json => Exported::Document(render_json(snapshot, options.prefix)),
        ExportFormat::OpenTelemetry => Exported::Document(render_open_telemetry(snapshot, options)),
    }
}

fn full_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}_{}", prefix, name)
    }
}

/// Samples grouped by metric name; snapshots are already sorted by name
fn by_name(snapshot: &MetricsSnapshot) -> impl Iterator<Item = &[MetricSample]> {
    snapshot.samples.chunk_by(|a, b| a.name == b.name)
}

pub fn render_prometheus(snapshot: &MetricsSnapshot, prefix: &str) -> String {
    let mut out = String::new();
    for group in by_name(snapshot) {
        let first = &group[0];
        let name = full_name(prefix, &first.name);
        let type_name = match first.kind {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "summary",
        };
        if let Some(help) = snapshot.help.get(&first.name) {
            let _ = writeln!(out, "# HELP {} {}", name, escape_help(help));
        }
        let _ = writeln!(out, "# TYPE {} {}", name, type_name);

        for sample in group {
            match sample.value {
                MetricValue::Counter(v) => {
                    let _ = writeln!(out, "{}{} {}", name, label_block(sample, None), v);
                }
                MetricValue::Gauge(v) => {
                    let _ = writeln!(out, "{}{} {}", name, label_block(sample, None), prom_float(v));
                }
                MetricValue::Histogram(d) => {
                    for (label, q) in QUANTILES {
                        let _ = writeln!(
                            out,
                            "{}{} {}",
                            name,
                            label_block(sample, Some(label)),
                            prom_float(quantile_of(&d, q))
                        );
                    }
                    let labels = label_block(sample, None);
                    let _ = writeln!(out, "{}_sum{} {}", name, labels, prom_float(d.sum));
                    let _ = writeln!(out, "{}_count{} {}", name, labels, d.count);
                }
            }
        }
    }
    out
}

fn label_block(sample: &MetricSample, quantile: Option<&str>) -> String {
    if sample.labels.is_empty() && quantile.is_none() {
        return String::new();
    }
    let mut parts: Vec<String> = sample
        .labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
        .collect();
    if let Some(q) = quantile {
        parts.push(format!("quantile=\"{}\"", q));
    }
    format!("{{{}}}", parts.join(","))
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn prom_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

fn quantile_of(d: &Distribution, q: f64) -> f64 {
    if q >= 0.99 {
        d.p99
    } else if q >= 0.95 {
        d.p95
    } else {
        d.p50
    }
}

pub fn render_json(snapshot: &MetricsSnapshot, prefix: &str) -> JsonValue {
    let metrics: Vec<JsonValue> = snapshot
        .samples
        .iter()
        .map(|sample| {
            let mut metric = json!({
                "name": full_name(prefix, &sample.name),
                "kind": sample.kind.as_str(),
                "labels": sample.labels,
                "timestamp": sample.timestamp_ms,
            });
            match sample.value {
                MetricValue::Counter(v) => metric["value"] = json!(v),
                MetricValue::Gauge(v) => metric["value"] = json!(v),
                MetricValue::Histogram(d) => metric["distribution"] = json!(d),
            }
            metric
        })
        .collect();
    json!({
        "timestamp": snapshot.timestamp_ms,
        "metrics": metrics,
    })
}

pub fn render_open_telemetry(snapshot: &MetricsSnapshot, options: ExportOptions<'_>) -> JsonValue {
    let metrics: Vec<JsonValue> = by_name(snapshot)
        .map(|group| {
            let first = &group[0];
            let description = snapshot.help.get(&first.name).cloned().unwrap_or_default();
            let points: Vec<JsonValue> = group.iter().map(otel_data_point).collect();
            let mut metric = json!({
                "name": full_name(options.prefix, &first.name),
                "description": description,
            });
            match first.kind {
                MetricKind::Counter => {
                    metric["sum"] = json!({
                        "dataPoints": points,
                        // AGGREGATION_TEMPORALITY_CUMULATIVE
                        "aggregationTemporality": 2,
                        "isMonotonic": true,
                    });
                }
                MetricKind::Gauge => metric["gauge"] = json!({ "dataPoints": points }),
                MetricKind::Histogram => metric["summary"] = json!({ "dataPoints": points }),
            }
            metric
        })
        .collect();

    json!({
        "resourceMetrics": [{
            "resource": {
                "attributes": [{
                    "key": "service.name",
                    "value": { "stringValue": options.service_name },
                }],
            },
            "scopeMetrics": [{
                "scope": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "metrics": metrics,
            }],
        }],
    })
}

fn otel_data_point(sample: &MetricSample) -> JsonValue {
    let attributes: Vec<JsonValue> = sample
        .labels
        .iter()
        .map(|(k, v)| json!({ "key": k, "value": { "stringValue": v } }))
        .collect();
    // int64/fixed64 fields are strings in OTLP/JSON
    let time_unix_nano = (sample.timestamp_ms as u128 * 1_000_000).to_string();
    let mut point = json!({
        "attributes": attributes,
        "timeUnixNano": time_unix_nano,
    });
    match sample.value {
        MetricValue::Counter(v) => point["asInt"] = json!(v.to_string()),
        MetricValue::Gauge(v) => point["asDouble"] = json!(v),
        MetricValue::Histogram(d) => {
            point["count"] = json!(d.count.to_string());
            point["sum"] = json!(d.sum);
            point["quantileValues"] = JsonValue::Array(
                QUANTILES
                    .iter()
                    .map(|(_, q)| json!({ "quantile": q, "value": quantile_of(&d, *q) }))
                    .collect(),
            );
        }
    }
    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::collector::MetricsCollector;
    use crate::telemetry::types::MetricDefinition;

    fn sample_snapshot() -> MetricsSnapshot {
        let collector = MetricsCollector::new();
        collector
            .register(
                MetricDefinition::new("lookups_total", MetricKind::Counter, &["tier"])
                    .with_help("Cache lookups"),
            )
            .unwrap();
        collector.increment_counter("lookups_total", &[("tier", "hot")], 7).unwrap();
        collector.increment_counter("lookups_total", &[("tier", "warm")], 2).unwrap();
        collector.set_gauge("hit_rate", &[], 0.5).unwrap();
        for v in 1..=100 {
            collector
                .record_histogram("warm_ms", &[("strategy", "top_n")], v as f64)
                .unwrap();
        }
        (*collector.snapshot()).clone()
    }

    #[test]
    fn test_prometheus_text() {
        let text = render_prometheus(&sample_snapshot(), "pw");
        assert!(text.contains("# HELP pw_lookups_total Cache lookups\n"));
        assert!(text.contains("# TYPE pw_lookups_total counter\n"));
        assert!(text.contains("pw_lookups_total{tier=\"hot\"} 7\n"));
        assert!(text.contains("pw_lookups_total{tier=\"warm\"} 2\n"));
        assert!(text.contains("pw_hit_rate 0.5\n"));
        assert!(text.contains("# TYPE pw_warm_ms summary\n"));
        assert!(text.contains("pw_warm_ms{strategy=\"top_n\",quantile=\"0.5\"} 50\n"));
        assert!(text.contains("pw_warm_ms{strategy=\"top_n\",quantile=\"0.99\"} 99\n"));
        assert!(text.contains("pw_warm_ms_count{strategy=\"top_n\"} 100\n"));
        assert!(text.contains("pw_warm_ms_sum{strategy=\"top_n\"} 5050\n"));
        assert_eq!(text.matches("# TYPE pw_lookups_total").count(), 1);
    }

    #[test]
    fn test_prometheus_escaping_and_no_prefix() {
        let collector = MetricsCollector::new();
        collector
            .increment_counter("odd_total", &[("key", "a\"b\\c\nd")], 1)
            .unwrap();
        let text = render_prometheus(&collector.snapshot(), "");
        assert!(text.contains("odd_total{key=\"a\\\"b\\\\c\\nd\"} 1\n"));
        assert_eq!(prom_float(f64::INFINITY), "+Inf");
        assert_eq!(prom_float(f64::NAN), "NaN");
    }

    #[test]
    fn test_json_document() {
        let snapshot = sample_snapshot();
        let doc = render_json(&snapshot, "pw");
        assert_eq!(doc["timestamp"], json!(snapshot.timestamp_ms));
        let metrics = doc["metrics"].as_array().unwrap();
        assert_eq!(metrics.len(), 4);
        let hot = metrics
            .iter()
            .find(|m| m["name"] == "pw_lookups_total" && m["labels"]["tier"] == "hot")
            .unwrap();
        assert_eq!(hot["kind"], "counter");
        assert_eq!(hot["value"], 7);
        let warm = metrics.iter().find(|m| m["name"] == "pw_warm_ms").unwrap();
        assert_eq!(warm["distribution"]["count"], 100);
        assert_eq!(warm["distribution"]["p95"], 95.0);
    }

    #[test]
    fn test_open_telemetry_document() {
        let doc = render_open_telemetry(
            &sample_snapshot(),
            ExportOptions {
                prefix: "pw",
                service_name: "pricing",
            },
        );
        let resource = &doc["resourceMetrics"][0];
        assert_eq!(
            resource["resource"]["attributes"][0]["value"]["stringValue"],
            "pricing"
        );
        let metrics = resource["scopeMetrics"][0]["metrics"].as_array().unwrap();
        assert_eq!(metrics.len(), 3);

        let lookups = metrics.iter().find(|m| m["name"] == "pw_lookups_total").unwrap();
        assert_eq!(lookups["sum"]["isMonotonic"], true);
        assert_eq!(lookups["sum"]["dataPoints"].as_array().unwrap().len(), 2);
        assert_eq!(lookups["description"], "Cache lookups");

        let gauge = metrics.iter().find(|m| m["name"] == "pw_hit_rate").unwrap();
        assert_eq!(gauge["gauge"]["dataPoints"][0]["asDouble"], 0.5);

        let summary = metrics.iter().find(|m| m["name"] == "pw_warm_ms").unwrap();
        let point = &summary["summary"]["dataPoints"][0];
        assert_eq!(point["count"], "100");
        assert_eq!(point["quantileValues"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("Prometheus".parse::<ExportFormat>().unwrap(), ExportFormat::Prometheus);
        assert_eq!("otel".parse::<ExportFormat>().unwrap(), ExportFormat::OpenTelemetry);
        assert!("xml".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Json.to_string(), "json");
    }
}
