//! Backing store interface for the cold tier
//!
//! The cold tier may proxy to an external key-value store. Transport failures
//! surface as [`CacheError::StoreUnavailable`], never as panics, so callers on
//! the warming path can skip the key and continue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use ahash::AHashMap;

use crate::cache::error::{CacheError, CacheResult};

/// Abstract key-value store behind the cold tier.
///
/// Calls may block; the warmer always invokes them from a blocking task.
pub trait ColdStore: Send + Sync + std::fmt::Debug {
    /// Fetch a value, `Ok(None)` when absent or expired
    fn get(&self, key: &str) -> CacheResult<Option<Arc<[u8]>>>;

    /// Store a value with an optional time to live
    fn set(&self, key: &str, value: Arc<[u8]>, ttl: Option<Duration>) -> CacheResult<()>;

    /// Delete a value, returning whether it existed
    fn remove(&self, key: &str) -> CacheResult<bool>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Arc<[u8]>,
    expires_at: Option<Instant>,
}

/// In-process [`ColdStore`] with TTL support.
///
/// Can be switched into an unavailable state to exercise the
/// store-unavailable path of callers.
#[derive(Debug, Default)]
pub struct MemoryColdStore {
    entries: RwLock<AHashMap<String, StoredValue>>,
    unavailable: AtomicBool,
}

impl MemoryColdStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or reachable again)
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::Release);
    }

    /// Number of stored values, including expired ones not yet reaped
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> CacheResult<()> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(CacheError::store_unavailable("memory cold store offline"));
        }
        Ok(())
    }
}

impl ColdStore for MemoryColdStore {
    fn get(&self, key: &str) -> CacheResult<Option<Arc<[u8]>>> {
        self.check_available()?;
        let now = Instant::now();
        {
            let entries = self
                .entries
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match entries.get(key) {
                None => return Ok(None),
                Some(stored) if stored.expires_at.is_none_or(|at| at > now) => {
                    return Ok(Some(stored.value.clone()));
                }
                Some(_) => {}
            }
        }
        // expired: reap lazily
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
        Ok(None)
    }

    fn set(&self, key: &str, value: Arc<[u8]>, ttl: Option<Duration>) -> CacheResult<()> {
        self.check_available()?;
        let stored = StoredValue {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), stored);
        Ok(())
    }

    fn remove(&self, key: &str) -> CacheResult<bool> {
        self.check_available()?;
        Ok(self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryColdStore::new();
        store.set("k", Arc::from(&b"v"[..]), None).unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some(&b"v"[..]));
        assert!(store.remove("k").unwrap());
        assert!(!store.remove("k").unwrap());
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let store = MemoryColdStore::new();
        store
            .set("k", Arc::from(&b"v"[..]), Some(Duration::from_millis(0)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert!(store.get("k").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unavailable_signal() {
        let store = MemoryColdStore::new();
        store.set_available(false);
        assert!(matches!(
            store.get("k"),
            Err(CacheError::StoreUnavailable(_))
        ));
        assert!(store.set("k", Arc::from(&b"v"[..]), None).is_err());
        store.set_available(true);
        assert!(store.get("k").unwrap().is_none());
    }
}
