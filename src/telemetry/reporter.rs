//! Periodic snapshot task
//!
//! Takes a snapshot on a fixed interval so exporters can read
//! [`MetricsCollector::latest_snapshot`] without paying for quantiles on the
//! request path.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::collector::MetricsCollector;
use super::types::MetricsSnapshot;
use crate::cache::error::{CacheError, CacheResult};

/// Anything that can produce a metrics snapshot on demand
pub trait SnapshotSource: Send + Sync + 'static {
    fn take_snapshot(&self) -> Arc<MetricsSnapshot>;
}

impl SnapshotSource for MetricsCollector {
    fn take_snapshot(&self) -> Arc<MetricsSnapshot> {
        self.snapshot()
    }
}

/// Background snapshotting; the task is aborted when the reporter is dropped
#[derive(Debug)]
pub struct SnapshotReporter {
    handle: JoinHandle<()>,
}

impl SnapshotReporter {
    pub fn spawn<S: SnapshotSource>(source: Arc<S>, interval: Duration) -> CacheResult<Self> {
        Self::spawn_with_sink(source, interval, |_| {})
    }

    /// Spawn on the current tokio runtime, handing each snapshot to `sink`
    pub fn spawn_with_sink<S, F>(source: Arc<S>, interval: Duration, sink: F) -> CacheResult<Self>
    where
        S: SnapshotSource,
        F: Fn(Arc<MetricsSnapshot>) + Send + 'static,
    {
        if interval.is_zero() {
            return Err(CacheError::validation("snapshot interval must be non-zero"));
        }
        let runtime = Handle::try_current()
            .map_err(|e| CacheError::configuration(format!("no tokio runtime: {}", e)))?;

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = source.take_snapshot();
                log::trace!("metrics snapshot with {} series", snapshot.samples.len());
                sink(snapshot);
            }
        });
        log::debug!("snapshot reporter started every {:?}", interval);
        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for SnapshotReporter {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
