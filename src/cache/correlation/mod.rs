//! Co-occurrence tracking between cache keys
//!
//! The tracker observes access events and scores how often pairs of keys are
//! accessed together. Scores drive the warming strategies.

pub mod aggregate;
pub mod pair;
pub mod tracker;

pub use aggregate::{CorrelationAggregator, CorrelationSummary, SummaryPublisher};
pub use pair::{CorrelatedKey, CorrelationPair, CorrelationSnapshot};
pub use tracker::CorrelationTracker;
