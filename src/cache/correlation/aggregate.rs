//! Cross-context aggregation of correlation state
//!
//! Trackers are never shared between execution contexts. Instead each context
//! periodically publishes a [`CorrelationSummary`] over a channel and one
//! aggregating context merges them into its own tracker.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use super::tracker::CorrelationTracker;
use crate::cache::error::{CacheError, CacheResult};

/// Per-key observation counts in a summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyObservation {
    pub key: String,
    pub observations: u64,
    pub last_seen_ms: u64,
}

/// Raw pair counters in a summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairObservation {
    pub key_a: String,
    pub key_b: String,
    pub co_occurrences: u64,
    pub last_seen_ms: u64,
}

/// Serializable counts exported by one context's tracker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationSummary {
    /// Identifies the publishing context in logs
    pub origin: String,
    pub clock_ms: u64,
    pub keys: Vec<KeyObservation>,
    pub pairs: Vec<PairObservation>,
}

impl CorrelationTracker {
    /// Summarize raw counts, keeping at most `max_pairs` most recently seen pairs
    pub fn summarize(&self, origin: impl Into<String>, max_pairs: usize) -> CorrelationSummary {
        let pairs: Vec<PairObservation> = self
            .pair_counts(max_pairs)
            .into_iter()
            .map(|(key_a, key_b, co_occurrences, last_seen_ms)| PairObservation {
                key_a,
                key_b,
                co_occurrences,
                last_seen_ms,
            })
            .collect();
        let keys = self
            .key_counts()
            .into_iter()
            .map(|(key, observations, last_seen_ms)| KeyObservation {
                key,
                observations,
                last_seen_ms,
            })
            .collect();
        CorrelationSummary {
            origin: origin.into(),
            clock_ms: self.clock_ms(),
            keys,
            pairs,
        }
    }

    /// Add another context's counts to this tracker
    pub fn merge_summary(&self, summary: &CorrelationSummary) {
        log::debug!(
            "merging correlation summary from {}: {} keys, {} pairs",
            summary.origin,
            summary.keys.len(),
            summary.pairs.len()
        );
        self.absorb(
            summary.clock_ms,
            summary
                .keys
                .iter()
                .map(|k| (k.key.clone(), k.observations, k.last_seen_ms)),
            summary
                .pairs
                .iter()
                .map(|p| (p.key_a.clone(), p.key_b.clone(), p.co_occurrences, p.last_seen_ms)),
        );
    }
}

/// Publishing end handed to each execution context
#[derive(Debug, Clone)]
pub struct SummaryPublisher {
    origin: String,
    max_pairs: usize,
    sender: Sender<CorrelationSummary>,
}

impl SummaryPublisher {
    /// Summarize `tracker` and send it without blocking.
    ///
    /// A full channel drops this summary; the next publish carries newer counts.
    pub fn publish(&self, tracker: &CorrelationTracker) -> CacheResult<()> {
        let summary = tracker.summarize(self.origin.clone(), self.max_pairs);
        match self.sender.try_send(summary) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::warn!("summary channel full, dropping summary from {}", self.origin);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(CacheError::unexpected(
                "correlation aggregator is gone",
            )),
        }
    }
}

/// Receiving end that merges summaries into its own tracker
#[derive(Debug)]
pub struct CorrelationAggregator {
    receiver: Receiver<CorrelationSummary>,
    sender: Sender<CorrelationSummary>,
    tracker: Arc<CorrelationTracker>,
}

impl CorrelationAggregator {
    /// Aggregator holding at most `capacity` unmerged summaries
    pub fn new(tracker: Arc<CorrelationTracker>, capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        Self {
            receiver,
            sender,
            tracker,
        }
    }

    /// Publisher for one context, limiting each summary to `max_pairs` pairs
    pub fn publisher(&self, origin: impl Into<String>, max_pairs: usize) -> SummaryPublisher {
        SummaryPublisher {
            origin: origin.into(),
            max_pairs,
            sender: self.sender.clone(),
        }
    }

    pub fn tracker(&self) -> &Arc<CorrelationTracker> {
        &self.tracker
    }

    /// Merge every summary currently queued, returning how many were merged
    pub fn drain(&self) -> usize {
        let mut merged = 0;
        while let Ok(summary) = self.receiver.try_recv() {
            self.tracker.merge_summary(&summary);
            merged += 1;
        }
        merged
    }

    /// Wait up to `timeout` for one summary and merge it
    pub fn merge_next(&self, timeout: Duration) -> bool {
        match self.receiver.recv_timeout(timeout) {
            Ok(summary) => {
                self.tracker.merge_summary(&summary);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::config::CorrelationConfig;

    fn tracker() -> CorrelationTracker {
        CorrelationTracker::new(CorrelationConfig::default())
    }

    #[test]
    fn test_merge_adds_counts() {
        let worker_a = tracker();
        worker_a.record("A", 0).unwrap();
        worker_a.record("B", 10).unwrap();
        let worker_b = tracker();
        worker_b.record("A", 5).unwrap();
        worker_b.record("B", 12).unwrap();
        worker_b.record("C", 14).unwrap();

        let merged = tracker();
        merged.merge_summary(&worker_a.summarize("a", 100));
        merged.merge_summary(&worker_b.summarize("b", 100));

        assert_eq!(merged.observations_of("A"), 2);
        assert_eq!(merged.pair("A", "B").unwrap().unwrap().co_occurrences, 2);
        assert_eq!(merged.score_of("A", "B").unwrap(), 1.0);
        assert!(merged.pair("B", "C").unwrap().is_some());
        assert_eq!(merged.clock_ms(), 14);
    }

    #[test]
    fn test_summary_is_serializable() {
        let worker = tracker();
        worker.record("A", 0).unwrap();
        worker.record("B", 1).unwrap();
        let summary = worker.summarize("w1", 10);
        let json = serde_json::to_string(&summary).unwrap();
        let back: CorrelationSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }

    #[test]
    fn test_aggregator_drains_published_summaries() {
        let aggregator = CorrelationAggregator::new(Arc::new(tracker()), 8);
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let publisher = aggregator.publisher(format!("worker-{}", i), 100);
                std::thread::spawn(move || {
                    let local = tracker();
                    local.record("X", 0).unwrap();
                    local.record("Y", 1).unwrap();
                    publisher.publish(&local).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(aggregator.drain(), 3);
        let pair = aggregator.tracker().pair("X", "Y").unwrap().unwrap();
        assert_eq!(pair.co_occurrences, 3);
        assert!(!aggregator.merge_next(Duration::from_millis(1)));
    }

    #[test]
    fn test_full_channel_drops_without_error() {
        let aggregator = CorrelationAggregator::new(Arc::new(tracker()), 1);
        let publisher = aggregator.publisher("w", 10);
        let local = tracker();
        publisher.publish(&local).unwrap();
        publisher.publish(&local).unwrap();
        assert_eq!(aggregator.drain(), 1);
    }
}
