//! Correlation-driven cache warming
//!
//! [`WarmingStrategy`] picks candidates from a correlation snapshot;
//! [`CacheWarmer`] promotes them into the hot tier in the background.

pub mod context;
pub mod strategy;
pub mod warmer;

pub use context::{AdaptiveState, WarmingContext};
pub use strategy::{AdaptiveParams, WarmingStrategy};
pub use warmer::{CacheWarmer, WarmingResult};
