//! Warming orchestration
//!
//! `warm` takes a correlation snapshot for the trigger, lets the strategy pick
//! candidates, and promotes the ones not already hot. Promotions run as
//! blocking tasks, at most `fan_out` at a time across every concurrent `warm`
//! call. Each candidate gets an equal share of the context's time budget,
//! cut short by the deadline of the whole call; waiting for a fan-out permit
//! counts against both. A failing candidate never affects the others,
//! and nothing escapes to the caller. Every outcome is counted in the returned
//! [`WarmingResult`] and reported to the metrics collector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use super::context::WarmingContext;
use super::strategy::WarmingStrategy;
use crate::cache::correlation::CorrelationTracker;
use crate::cache::error::{CacheError, CacheResult, ErrorKind};
use crate::cache::tier::TieredStore;
use crate::telemetry::MetricsCollector;
use crate::telemetry::catalog::{
    WARMING_CANDIDATES_TOTAL, WARMING_DURATION_MS, WARMING_ERRORS_TOTAL, WARMING_RUNS_TOTAL, note,
};

/// Outcome counts of one warming invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarmingResult {
    /// Candidates selected by the strategy, including those already hot
    pub attempted: usize,
    pub warmed: usize,
    pub already_hot: usize,
    /// In no tier and not in the backend
    pub not_found: usize,
    /// Promotion exceeded its slice of the time budget
    pub timed_out: usize,
    /// Backend unreachable
    pub unavailable: usize,
    /// Any other failure
    pub failed: usize,
    pub duration_ms: u64,
}

impl WarmingResult {
    /// Candidates that did not end up hot because of an error
    pub fn failures(&self) -> usize {
        self.timed_out + self.unavailable + self.failed
    }

    fn add(&mut self, outcome: CandidateOutcome) {
        match outcome {
            CandidateOutcome::Warmed => self.warmed += 1,
            CandidateOutcome::AlreadyHot => self.already_hot += 1,
            CandidateOutcome::NotFound => self.not_found += 1,
            CandidateOutcome::TimedOut => self.timed_out += 1,
            CandidateOutcome::Unavailable => self.unavailable += 1,
            CandidateOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateOutcome {
    Warmed,
    AlreadyHot,
    NotFound,
    TimedOut,
    Unavailable,
    Failed,
}

impl CandidateOutcome {
    const fn label(self) -> &'static str {
        match self {
            CandidateOutcome::Warmed => "warmed",
            CandidateOutcome::AlreadyHot => "already_hot",
            CandidateOutcome::NotFound => "not_found",
            CandidateOutcome::TimedOut => "timed_out",
            CandidateOutcome::Unavailable => "unavailable",
            CandidateOutcome::Failed => "failed",
        }
    }

    fn from_error(error: &CacheError) -> Self {
        match error.kind() {
            ErrorKind::Timeout => CandidateOutcome::TimedOut,
            ErrorKind::StoreUnavailable => CandidateOutcome::Unavailable,
            _ => CandidateOutcome::Failed,
        }
    }
}

/// Promotes correlated keys into the hot tier ahead of demand
#[derive(Debug)]
pub struct CacheWarmer {
    store: Arc<TieredStore>,
    tracker: Arc<CorrelationTracker>,
    metrics: Arc<MetricsCollector>,
    fan_out: Arc<Semaphore>,
}

impl CacheWarmer {
    /// `fan_out` bounds promotions in flight across all invocations sharing
    /// this warmer (at least 1)
    pub fn new(
        store: Arc<TieredStore>,
        tracker: Arc<CorrelationTracker>,
        metrics: Arc<MetricsCollector>,
        fan_out: usize,
    ) -> Self {
        Self {
            store,
            tracker,
            metrics,
            fan_out: Arc::new(Semaphore::new(fan_out.max(1))),
        }
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

    /// Warm keys correlated with `trigger`.
    ///
    /// Never fails: an empty snapshot yields an all-zero result, and errors
    /// are folded into the per-outcome counts.
    pub async fn warm(
        &self,
        trigger: &str,
        strategy: &WarmingStrategy,
        ctx: &WarmingContext,
    ) -> WarmingResult {
        let started = Instant::now();
        let mut result = WarmingResult::default();

        match self.candidates(trigger, strategy, ctx) {
            Ok(candidates) if !candidates.is_empty() => {
                result.attempted = candidates.len();
                self.promote_all(trigger, candidates, ctx).await.into_iter().for_each(|outcome| {
                    result.add(outcome);
                    self.count_outcome(outcome);
                });
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("warming for {} skipped: {}", trigger, e);
                self.count_error(&e);
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        note(self.metrics.increment_counter(
            WARMING_RUNS_TOTAL,
            &[("strategy", strategy.name())],
            1,
        ));
        note(self.metrics.record_histogram(
            WARMING_DURATION_MS,
            &[("strategy", strategy.name())],
            started.elapsed().as_secs_f64() * 1_000.0,
        ));
        log::debug!(
            "warmed {} of {} candidates for {} in {}ms ({} already hot, {} failed)",
            result.warmed,
            result.attempted,
            trigger,
            result.duration_ms,
            result.already_hot,
            result.failures()
        );
        result
    }

    /// Run `warm` as a detached task on the current runtime.
    ///
    /// Returns `None` outside a tokio runtime; the trigger is skipped.
    pub fn spawn_warm(
        self: &Arc<Self>,
        trigger: String,
        strategy: WarmingStrategy,
        ctx: WarmingContext,
    ) -> Option<JoinHandle<WarmingResult>> {
        let Ok(runtime) = Handle::try_current() else {
            log::debug!("no tokio runtime, skipping background warming for {}", trigger);
            return None;
        };
        let warmer = Arc::clone(self);
        Some(runtime.spawn(async move { warmer.warm(&trigger, &strategy, &ctx).await }))
    }

    fn candidates(
        &self,
        trigger: &str,
        strategy: &WarmingStrategy,
        ctx: &WarmingContext,
    ) -> CacheResult<Vec<String>> {
        let snapshot = self.tracker.snapshot_for(trigger)?;
        if snapshot.is_empty() {
            log::trace!("no correlations for {}, nothing to warm", trigger);
            return Ok(Vec::new());
        }
        strategy.select(ctx, &snapshot)
    }

    async fn promote_all(
        &self,
        trigger: &str,
        candidates: Vec<String>,
        ctx: &WarmingContext,
    ) -> Vec<CandidateOutcome> {
        let mut outcomes = Vec::with_capacity(candidates.len());
        let slice = ctx.per_candidate_budget(candidates.len());
        let deadline = tokio::time::Instant::now() + ctx.time_budget;
        let mut tasks = JoinSet::new();

        for candidate in candidates {
            if self.store.contains_hot(&candidate) {
                outcomes.push(CandidateOutcome::AlreadyHot);
                continue;
            }
            let store = Arc::clone(&self.store);
            let permits = Arc::clone(&self.fan_out);
            tasks.spawn(async move {
                let promoted =
                    promote_within(store, permits, candidate.clone(), slice, deadline).await;
                (candidate, promoted)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((_, Ok(true))) => CandidateOutcome::Warmed,
                Ok((_, Ok(false))) => CandidateOutcome::NotFound,
                Ok((candidate, Err(e))) => {
                    let outcome = CandidateOutcome::from_error(&e);
                    if outcome == CandidateOutcome::Failed {
                        log::error!(
                            "warming {} for trigger {} failed: {}",
                            candidate,
                            trigger,
                            e
                        );
                    } else {
                        log::warn!(
                            "warming {} for trigger {} abandoned: {}",
                            candidate,
                            trigger,
                            e
                        );
                    }
                    self.count_error(&e);
                    outcome
                }
                Err(join_error) => {
                    log::error!("warming task for trigger {} panicked: {}", trigger, join_error);
                    self.count_error(&CacheError::from(join_error));
                    CandidateOutcome::Failed
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    fn count_outcome(&self, outcome: CandidateOutcome) {
        note(self.metrics.increment_counter(
            WARMING_CANDIDATES_TOTAL,
            &[("outcome", outcome.label())],
            1,
        ));
    }

    fn count_error(&self, error: &CacheError) {
        note(self.metrics.increment_counter(
            WARMING_ERRORS_TOTAL,
            &[("kind", error.kind().as_str())],
            1,
        ));
    }
}

/// Promote `key` on the blocking pool once a fan-out permit is held.
///
/// Acquiring the permit and the promotion share one timeout: `slice`, or less
/// when the call's `deadline` comes first. The permit travels into the
/// blocking task, so an abandoned promotion keeps its slot until the backend
/// call returns.
async fn promote_within(
    store: Arc<TieredStore>,
    permits: Arc<Semaphore>,
    key: String,
    slice: Duration,
    deadline: tokio::time::Instant,
) -> CacheResult<bool> {
    let expires = deadline.min(tokio::time::Instant::now() + slice);
    let promotion = async move {
        let permit = permits
            .acquire_owned()
            .await
            .map_err(|e| CacheError::unexpected(format!("fan-out semaphore closed: {}", e)))?;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            store.promote(&key)
        })
        .await?
    };
    match tokio::time::timeout_at(expires, promotion).await {
        Ok(promoted) => promoted,
        Err(_) => Err(CacheError::Timeout),
    }
}
