//! Histogram accumulation and lazy quantiles
//!
//! Recording updates cumulative count/sum/min/max atomically and appends the
//! observation to a bounded pending buffer. Quantiles are only computed when a
//! snapshot drains that buffer, by sorting it.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use super::atomic_float::AtomicF64;
use super::types::Distribution;

/// Observations kept between snapshots; older ones are overwritten round-robin
pub(crate) const MAX_PENDING_OBSERVATIONS: usize = 16_384;

#[derive(Debug, Clone, Copy, Default)]
struct Quantiles {
    p50: f64,
    p95: f64,
    p99: f64,
}

#[derive(Debug)]
pub(crate) struct Histogram {
    count: CachePadded<AtomicU64>,
    sum: AtomicF64,
    min: AtomicF64,
    max: AtomicF64,
    pending: Mutex<Vec<f64>>,
    /// Quantiles from the last non-empty window
    last: Mutex<Quantiles>,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            count: CachePadded::new(AtomicU64::new(0)),
            sum: AtomicF64::new(0.0),
            min: AtomicF64::new(f64::INFINITY),
            max: AtomicF64::new(f64::NEG_INFINITY),
            pending: Mutex::new(Vec::new()),
            last: Mutex::new(Quantiles::default()),
        }
    }

    #[inline]
    pub fn record(&self, value: f64) {
        let seen = self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(value, Ordering::Relaxed);
        self.min.fetch_min(value, Ordering::Relaxed);
        self.max.fetch_max(value, Ordering::Relaxed);

        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if pending.len() < MAX_PENDING_OBSERVATIONS {
            pending.push(value);
        } else {
            pending[(seen as usize) % MAX_PENDING_OBSERVATIONS] = value;
        }
    }

    /// Drain pending observations and summarize
    pub fn distribution(&self) -> Distribution {
        let mut window = std::mem::take(
            &mut *self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        let mut last = self
            .last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !window.is_empty() {
            window.sort_unstable_by(f64::total_cmp);
            *last = Quantiles {
                p50: quantile(&window, 0.50),
                p95: quantile(&window, 0.95),
                p99: quantile(&window, 0.99),
            };
        }

        let count = self.count.load(Ordering::Relaxed);
        let (min, max) = if count == 0 {
            (0.0, 0.0)
        } else {
            (
                self.min.load(Ordering::Relaxed),
                self.max.load(Ordering::Relaxed),
            )
        };
        Distribution {
            count,
            sum: self.sum.load(Ordering::Relaxed),
            min,
            max,
            p50: last.p50,
            p95: last.p95,
            p99: last.p99,
        }
    }
}

/// Nearest-rank quantile of sorted, non-empty `values`
pub(crate) fn quantile(values: &[f64], q: f64) -> f64 {
    debug_assert!(!values.is_empty());
    let rank = (q * values.len() as f64).ceil() as usize;
    values[rank.clamp(1, values.len()) - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantiles_of_one_to_hundred() {
        let histogram = Histogram::new();
        for v in (1..=100).rev() {
            histogram.record(v as f64);
        }
        let d = histogram.distribution();
        assert_eq!(d.count, 100);
        assert_eq!(d.sum, 5_050.0);
        assert_eq!(d.min, 1.0);
        assert_eq!(d.max, 100.0);
        assert!((d.p50 - 50.0).abs() <= 1.0);
        assert!((d.p95 - 95.0).abs() <= 1.0);
        assert!((d.p99 - 99.0).abs() <= 1.0);
    }

    #[test]
    fn test_empty_window_keeps_previous_quantiles() {
        let histogram = Histogram::new();
        let empty = histogram.distribution();
        assert_eq!(empty.count, 0);
        assert_eq!(empty.min, 0.0);

        histogram.record(10.0);
        histogram.record(20.0);
        let first = histogram.distribution();
        let second = histogram.distribution();
        assert_eq!(first.p99, 20.0);
        assert_eq!(second, first);
    }

    #[test]
    fn test_quantile_edges() {
        assert_eq!(quantile(&[5.0], 0.5), 5.0);
        assert_eq!(quantile(&[1.0, 2.0], 0.0), 1.0);
        assert_eq!(quantile(&[1.0, 2.0], 1.0), 2.0);
    }

    #[test]
    fn test_pending_buffer_is_bounded() {
        let histogram = Histogram::new();
        for v in 0..(MAX_PENDING_OBSERVATIONS + 100) {
            histogram.record(v as f64);
        }
        assert_eq!(
            histogram.pending.lock().unwrap().len(),
            MAX_PENDING_OBSERVATIONS
        );
        assert_eq!(
            histogram.distribution().count,
            (MAX_PENDING_OBSERVATIONS + 100) as u64
        );
    }
}
