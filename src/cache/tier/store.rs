//! Tiered store with per-tier recency eviction
//!
//! All three in-process tier indexes live behind one short-held mutex so that
//! moving a key between tiers is a single critical section: readers never see
//! a key in two tiers. The tier lock is never held across cold-store I/O.
//!
//! Hot and Warm writes do no backend I/O at all. A backend copy that may be
//! outdated is scheduled for removal instead; until that removal succeeds the
//! key is treated as absent from the backend. Backend reads run unlocked and
//! are discarded when the key changed residency meanwhile, detected through
//! striped version counters. Cold writes and backend removals of the same key
//! are serialized through a striped key lock.

use std::hash::BuildHasher;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::Duration;

use ahash::AHashMap;
use crossbeam_utils::CachePadded;

use super::backend::ColdStore;
use super::recency::RecencyList;
use super::stats::{StoreStats, TierCounters};
use super::{CacheEntry, CacheEntryInfo, Tier};
use crate::cache::config::TierConfig;
use crate::cache::error::{CacheResult, validate_key};
use crate::cache::types::{Value, timestamp_millis};

const KEY_LOCK_STRIPES: usize = 64;
const VERSION_STRIPES: usize = 64;
/// Deferred backend removals retried per backend call
const PURGE_BATCH: usize = 8;

type TierList = RecencyList<Arc<str>, CacheEntry>;

#[derive(Debug)]
struct TierSet {
    lists: [TierList; 3],
    /// Backend copies that must be removed before they may be served again,
    /// keyed to the marker issued when the removal was scheduled
    pending_removals: AHashMap<Arc<str>, u64>,
    next_marker: u64,
    /// Bumped whenever a key of the stripe enters or leaves a tier
    versions: [u64; VERSION_STRIPES],
    hasher: ahash::RandomState,
}

impl TierSet {
    fn locate(&self, key: &str) -> Option<Tier> {
        Tier::ALL
            .into_iter()
            .find(|tier| self.lists[tier.index()].contains(key))
    }

    #[inline]
    fn stripe(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) as usize) % VERSION_STRIPES
    }

    #[inline]
    fn version(&self, key: &str) -> u64 {
        self.versions[self.stripe(key)]
    }

    #[inline]
    fn bump(&mut self, key: &str) {
        let stripe = self.stripe(key);
        self.versions[stripe] = self.versions[stripe].wrapping_add(1);
    }

    /// Insert into the entry's tier, returning the entry evicted to make room
    fn insert(&mut self, entry: CacheEntry) -> Option<(Arc<str>, CacheEntry)> {
        self.bump(&entry.key);
        let evicted = self.lists[entry.tier.index()].insert(entry.key.clone(), entry);
        if let Some((key, _)) = &evicted {
            self.bump(key);
        }
        evicted
    }

    fn remove_everywhere(&mut self, key: &str) -> Option<CacheEntry> {
        let tier = self.locate(key)?;
        self.bump(key);
        self.lists[tier.index()].remove(key)
    }

    #[inline]
    fn is_pending(&self, key: &str) -> bool {
        self.pending_removals.contains_key(key)
    }

    fn schedule_removal(&mut self, key: Arc<str>) -> u64 {
        self.next_marker += 1;
        self.pending_removals.insert(key, self.next_marker);
        self.next_marker
    }

    /// Drop the pending removal if no newer one was scheduled since `marker`
    fn settle_removal(&mut self, key: &str, marker: u64) -> bool {
        if self.pending_removals.get(key) == Some(&marker) {
            self.pending_removals.remove(key);
            true
        } else {
            false
        }
    }
}

/// Backend write of an entry demoted into the cold tier
#[derive(Debug)]
struct ColdWrite {
    key: Arc<str>,
    value: Value,
    /// Pending removal the write supersedes
    marker: Option<u64>,
}

/// Side effects of a placement that must run after the tier lock is released
#[derive(Debug, Default)]
struct Placement {
    cold_writes: Vec<ColdWrite>,
}

/// Where `promote` found a key in-process
#[derive(Debug)]
enum Residency {
    AlreadyHot,
    Moved(Tier, Placement),
    Absent,
}

/// Hot/Warm/Cold cache with O(1) recency eviction in every tier
#[derive(Debug)]
pub struct TieredStore {
    tiers: Mutex<TierSet>,
    counters: [TierCounters; 3],
    backend: Option<Arc<dyn ColdStore>>,
    key_locks: Box<[CachePadded<Mutex<()>>]>,
    hasher: ahash::RandomState,
    demote_on_evict: bool,
    cold_ttl: Option<Duration>,
}

impl TieredStore {
    /// Store without a cold backend: the cold tier is fully in-process
    pub fn new(config: &TierConfig) -> Self {
        Self::build(config, None)
    }

    /// Store whose cold tier proxies to `backend`
    pub fn with_backend(config: &TierConfig, backend: Arc<dyn ColdStore>) -> Self {
        Self::build(config, Some(backend))
    }

    fn build(config: &TierConfig, backend: Option<Arc<dyn ColdStore>>) -> Self {
        let key_locks = (0..KEY_LOCK_STRIPES)
            .map(|_| CachePadded::new(Mutex::new(())))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            tiers: Mutex::new(TierSet {
                lists: [
                    RecencyList::new(config.hot_capacity),
                    RecencyList::new(config.warm_capacity),
                    RecencyList::new(config.cold_capacity),
                ],
                pending_removals: AHashMap::new(),
                next_marker: 0,
                versions: [0; VERSION_STRIPES],
                hasher: ahash::RandomState::new(),
            }),
            counters: Default::default(),
            backend,
            key_locks,
            hasher: ahash::RandomState::new(),
            demote_on_evict: config.demote_on_evict,
            cold_ttl: config.cold_ttl_ms.map(Duration::from_millis),
        }
    }

    /// Look a key up hottest tier first.
    ///
    /// A hit refreshes the entry's recency within its tier. Falling through to
    /// an unreachable cold backend yields `StoreUnavailable`.
    pub fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        Ok(self.lookup(key)?.map(|(value, _)| value))
    }

    /// [`get`](Self::get) that also reports the tier which served the hit
    pub fn lookup(&self, key: &str) -> CacheResult<Option<(Value, Tier)>> {
        validate_key(key)?;
        let now = timestamp_millis();
        let version = {
            let mut tiers = self.lock_tiers();
            for tier in Tier::ALL {
                if let Some(entry) = tiers.lists[tier.index()].touch(key) {
                    entry.last_access_ms = now;
                    self.counters[tier.index()].record_hit();
                    return Ok(Some((entry.value.clone(), tier)));
                }
                if tier != Tier::Cold || self.backend.is_none() {
                    self.counters[tier.index()].record_miss();
                }
            }
            if self.backend.is_some() && tiers.is_pending(key) {
                self.counters[Tier::Cold.index()].record_miss();
                return Ok(None);
            }
            tiers.version(key)
        };

        let Some(backend) = self.backend.as_ref() else {
            return Ok(None);
        };
        self.purge_quietly(backend.as_ref());
        let fetched = backend
            .get(key)
            .inspect_err(|_| self.counters[Tier::Cold.index()].record_miss())?;

        let mut tiers = self.lock_tiers();
        if tiers.version(key) != version || tiers.is_pending(key) {
            // changed while the backend was read; only resident state counts
            return Ok(self.touch_resident(&mut tiers, key, now));
        }
        let Some(value) = fetched else {
            self.counters[Tier::Cold.index()].record_miss();
            return Ok(None);
        };
        self.counters[Tier::Cold.index()].record_hit();

        let entry = CacheEntry::new(Arc::from(key), value.clone(), Tier::Cold, now);
        if let Some((evicted, _)) = tiers.insert(entry) {
            self.counters[Tier::Cold.index()].record_eviction();
            log::trace!("cold mirror dropped {}", evicted);
        }
        Ok(Some((value, Tier::Cold)))
    }

    /// Place `value` under `key` in `tier`, removing it from any other tier.
    ///
    /// Cold writes go through to the backend first; a failure leaves the store
    /// unchanged. Hot and Warm writes never touch the backend: an older cold
    /// copy is scheduled for removal and hidden until it is gone.
    pub fn set(&self, key: &str, value: impl Into<Value>, tier: Tier) -> CacheResult<()> {
        validate_key(key)?;
        let value = value.into();
        let cold_backend = self.backend.as_ref().filter(|_| tier == Tier::Cold);
        let _guard = cold_backend.map(|_| self.lock_key(key));

        if let Some(backend) = cold_backend {
            self.purge_quietly(backend.as_ref());
            backend.set(key, value.clone(), self.cold_ttl)?;
        }

        let key: Arc<str> = Arc::from(key);
        let placement = {
            let mut tiers = self.lock_tiers();
            tiers.remove_everywhere(&key);
            if cold_backend.is_some() {
                tiers.pending_removals.remove(&*key);
            } else if self.backend.is_some() {
                tiers.schedule_removal(key.clone());
            }
            let entry = CacheEntry::new(key, value, tier, timestamp_millis());
            self.place(&mut tiers, entry)
        };
        self.flush_cold_writes(placement);
        Ok(())
    }

    /// Move `key` from a colder tier into Hot.
    ///
    /// Returns `Ok(false)` when the key is in no tier, `Ok(true)` when it is
    /// Hot afterwards (including when it already was).
    pub fn promote(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;
        let now = timestamp_millis();
        let (residency, version, pending) = {
            let mut tiers = self.lock_tiers();
            let residency = self.promote_resident(&mut tiers, key, now);
            (residency, tiers.version(key), tiers.is_pending(key))
        };
        if let Some(promoted) = self.finish_promotion(key, residency) {
            return Ok(promoted);
        }
        match self.backend.as_ref() {
            Some(backend) if !pending => self.promote_from_backend(backend.as_ref(), key, now, version),
            _ => Ok(false),
        }
    }

    fn promote_from_backend(
        &self,
        backend: &dyn ColdStore,
        key: &str,
        now: u64,
        version: u64,
    ) -> CacheResult<bool> {
        self.purge_quietly(backend);
        let Some(value) = backend.get(key)? else {
            return Ok(false);
        };

        let (residency, marker) = {
            let mut tiers = self.lock_tiers();
            if tiers.version(key) != version || tiers.is_pending(key) {
                (self.promote_resident(&mut tiers, key, now), None)
            } else {
                let entry = CacheEntry::new(Arc::from(key), value, Tier::Hot, now);
                let marker = tiers.schedule_removal(entry.key.clone());
                (Residency::Moved(Tier::Cold, self.place(&mut tiers, entry)), Some(marker))
            }
        };
        let promoted = self.finish_promotion(key, residency).unwrap_or(false);
        if let Some(marker) = marker
            && let Err(e) = self.retry_removal(backend, key, marker)
        {
            log::debug!("cold copy of promoted key {} kept for later removal: {}", key, e);
        }
        Ok(promoted)
    }

    fn promote_resident(&self, tiers: &mut TierSet, key: &str, now: u64) -> Residency {
        match tiers.locate(key) {
            None => Residency::Absent,
            Some(Tier::Hot) => {
                if let Some(entry) = tiers.lists[Tier::Hot.index()].touch(key) {
                    entry.last_access_ms = now;
                }
                Residency::AlreadyHot
            }
            Some(source) => {
                let Some(mut entry) = tiers.remove_everywhere(key) else {
                    return Residency::Absent;
                };
                if source == Tier::Cold && self.backend.is_some() {
                    tiers.schedule_removal(entry.key.clone());
                }
                entry.tier = Tier::Hot;
                entry.last_access_ms = now;
                Residency::Moved(source, self.place(tiers, entry))
            }
        }
    }

    /// `None` when the key was not resident
    fn finish_promotion(&self, key: &str, residency: Residency) -> Option<bool> {
        match residency {
            Residency::AlreadyHot => Some(true),
            Residency::Moved(source, placement) => {
                self.counters[Tier::Hot.index()].record_promotion();
                self.flush_cold_writes(placement);
                log::trace!("promoted {} from {} to hot", key, source);
                Some(true)
            }
            Residency::Absent => None,
        }
    }

    /// Remove `key` from every tier and the backend.
    ///
    /// An unreachable backend does not fail the call: the backend copy stays
    /// hidden until a later backend call removes it.
    pub fn invalidate(&self, key: &str) -> CacheResult<bool> {
        validate_key(key)?;
        let _guard = self.lock_key(key);
        let (removed, marker) = {
            let mut tiers = self.lock_tiers();
            let removed = tiers.remove_everywhere(key).is_some();
            let marker = self
                .backend
                .is_some()
                .then(|| tiers.schedule_removal(Arc::from(key)));
            (removed, marker)
        };
        let (Some(backend), Some(marker)) = (self.backend.as_ref(), marker) else {
            return Ok(removed);
        };
        match backend.remove(key) {
            Ok(existed) => {
                self.lock_tiers().settle_removal(key, marker);
                Ok(existed || removed)
            }
            Err(e) => {
                log::warn!("cold copy of {} kept for later removal: {}", key, e);
                Ok(removed)
            }
        }
    }

    /// Retry every deferred backend removal now.
    ///
    /// Returns how many were settled; stops at the first backend failure.
    pub fn purge_pending_removals(&self) -> CacheResult<usize> {
        match self.backend.as_ref() {
            Some(backend) => self.purge(backend.as_ref(), usize::MAX),
            None => Ok(0),
        }
    }

    /// Backend copies hidden until their removal succeeds
    pub fn pending_removals(&self) -> usize {
        self.lock_tiers().pending_removals.len()
    }

    /// Tier currently holding `key` in-process
    pub fn tier_of(&self, key: &str) -> Option<Tier> {
        self.lock_tiers().locate(key)
    }

    #[inline]
    pub fn contains_hot(&self, key: &str) -> bool {
        self.lock_tiers().lists[Tier::Hot.index()].contains(key)
    }

    /// Entry metadata without touching recency
    pub fn entry_info(&self, key: &str) -> Option<CacheEntryInfo> {
        let tiers = self.lock_tiers();
        let tier = tiers.locate(key)?;
        tiers.lists[tier.index()].peek(key).map(CacheEntry::info)
    }

    /// Keys of one tier, most recently used first
    pub fn keys(&self, tier: Tier) -> Vec<Arc<str>> {
        self.lock_tiers().lists[tier.index()]
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn stats(&self) -> StoreStats {
        let tiers = self.lock_tiers();
        let snapshot = |tier: Tier| {
            let list = &tiers.lists[tier.index()];
            self.counters[tier.index()].snapshot(tier, list.len(), list.capacity())
        };
        StoreStats {
            tiers: Tier::ALL.map(snapshot),
        }
    }

    pub fn reset_stats(&self) {
        for counters in &self.counters {
            counters.reset();
        }
    }

    /// Drop every in-process entry; the backend and pending removals are
    /// left untouched
    pub fn clear(&self) {
        let mut tiers = self.lock_tiers();
        for list in tiers.lists.iter_mut() {
            list.clear();
        }
        tiers.versions.iter_mut().for_each(|v| *v = v.wrapping_add(1));
    }

    /// Hit on whatever is resident now, a cold miss otherwise
    fn touch_resident(&self, tiers: &mut TierSet, key: &str, now: u64) -> Option<(Value, Tier)> {
        let Some(tier) = tiers.locate(key) else {
            self.counters[Tier::Cold.index()].record_miss();
            return None;
        };
        let entry = tiers.lists[tier.index()].touch(key)?;
        entry.last_access_ms = now;
        self.counters[tier.index()].record_hit();
        Some((entry.value.clone(), tier))
    }

    /// Insert `entry` into its tier, cascading or destroying evicted entries
    fn place(&self, tiers: &mut TierSet, entry: CacheEntry) -> Placement {
        let mut placement = Placement::default();
        let mut pending = Some((entry, false));
        while let Some((entry, needs_backend_write)) = pending.take() {
            let tier = entry.tier;
            if needs_backend_write {
                placement.cold_writes.push(ColdWrite {
                    key: entry.key.clone(),
                    value: entry.value.clone(),
                    marker: tiers.pending_removals.get(&*entry.key).copied(),
                });
            }
            let Some((evicted_key, mut evicted)) = tiers.insert(entry) else {
                break;
            };
            self.counters[tier.index()].record_eviction();

            match tier.colder() {
                Some(next) if self.demote_on_evict => {
                    log::trace!("demoting {} from {} to {}", evicted_key, tier, next);
                    evicted.tier = next;
                    pending = Some((evicted, next == Tier::Cold && self.backend.is_some()));
                }
                _ => {
                    log::trace!("evicted {} from {}", evicted_key, tier);
                }
            }
        }
        placement
    }

    /// Write demoted entries through to the backend
    fn flush_cold_writes(&self, placement: Placement) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        for write in placement.cold_writes {
            match backend.set(&write.key, write.value, self.cold_ttl) {
                Ok(()) => {
                    if let Some(marker) = write.marker {
                        self.lock_tiers().settle_removal(&write.key, marker);
                    }
                }
                Err(e) => {
                    log::warn!("failed to write demoted entry {} to cold store: {}", write.key, e);
                    self.lock_tiers().schedule_removal(write.key);
                }
            }
        }
    }

    /// Remove up to `limit` outdated backend copies
    fn purge(&self, backend: &dyn ColdStore, limit: usize) -> CacheResult<usize> {
        let batch: Vec<(Arc<str>, u64)> = self
            .lock_tiers()
            .pending_removals
            .iter()
            .take(limit)
            .map(|(key, marker)| (key.clone(), *marker))
            .collect();
        let mut settled = 0;
        for (key, marker) in batch {
            if self.retry_removal(backend, &key, marker)? {
                settled += 1;
            }
        }
        if settled > 0 {
            log::trace!("settled {} deferred cold removals", settled);
        }
        Ok(settled)
    }

    fn purge_quietly(&self, backend: &dyn ColdStore) {
        if let Err(e) = self.purge(backend, PURGE_BATCH) {
            log::debug!("deferred cold removals still pending: {}", e);
        }
    }

    /// Skipped while another caller holds the key's stripe for backend I/O
    fn retry_removal(&self, backend: &dyn ColdStore, key: &str, marker: u64) -> CacheResult<bool> {
        let Some(_guard) = self.try_lock_key(key) else {
            return Ok(false);
        };
        backend.remove(key)?;
        Ok(self.lock_tiers().settle_removal(key, marker))
    }

    #[inline]
    fn lock_tiers(&self) -> MutexGuard<'_, TierSet> {
        self.tiers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[inline]
    fn key_stripe(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) as usize) % self.key_locks.len()
    }

    #[inline]
    fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        self.key_locks[self.key_stripe(key)]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn try_lock_key(&self, key: &str) -> Option<MutexGuard<'_, ()>> {
        match self.key_locks[self.key_stripe(key)].try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
