//! Shared primitive types

use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque cache payload; cloning shares the allocation
pub type Value = std::sync::Arc<[u8]>;

/// Wall-clock milliseconds since the Unix epoch
#[inline]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
