//! Lock-free atomic f64 using bit manipulation
//!
//! The value is stored as its IEEE-754 bit pattern in an `AtomicU64`;
//! read-modify-write operations run a compare-exchange retry loop.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

/// Atomic f64 for gauges and histogram sums
#[derive(Debug)]
pub struct AtomicF64 {
    bits: CachePadded<AtomicU64>,
}

impl AtomicF64 {
    #[inline]
    pub fn new(value: f64) -> Self {
        Self {
            bits: CachePadded::new(AtomicU64::new(value.to_bits())),
        }
    }

    #[inline]
    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.bits.load(ordering))
    }

    #[inline]
    pub fn store(&self, value: f64, ordering: Ordering) {
        self.bits.store(value.to_bits(), ordering);
    }

    /// Apply `f` atomically, returning the previous value
    #[inline]
    pub fn fetch_update<F>(&self, ordering: Ordering, mut f: F) -> f64
    where
        F: FnMut(f64) -> f64,
    {
        let mut current_bits = self.bits.load(Ordering::Relaxed);
        loop {
            let current = f64::from_bits(current_bits);
            let new = f(current);
            match self.bits.compare_exchange_weak(
                current_bits,
                new.to_bits(),
                ordering,
                Ordering::Relaxed,
            ) {
                Ok(_) => return current,
                Err(bits) => current_bits = bits,
            }
        }
    }

    #[inline]
    pub fn fetch_add(&self, value: f64, ordering: Ordering) -> f64 {
        self.fetch_update(ordering, |current| current + value)
    }

    #[inline]
    pub fn fetch_max(&self, value: f64, ordering: Ordering) -> f64 {
        self.fetch_update(ordering, |current| current.max(value))
    }

    #[inline]
    pub fn fetch_min(&self, value: f64, ordering: Ordering) -> f64 {
        self.fetch_update(ordering, |current| current.min(value))
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_concurrent_add() {
        let value = Arc::new(AtomicF64::new(0.0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let value = value.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        value.fetch_add(0.5, Ordering::Relaxed);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(value.load(Ordering::Relaxed), 2_000.0);
    }

    #[test]
    fn test_min_max() {
        let min = AtomicF64::new(f64::INFINITY);
        let max = AtomicF64::new(f64::NEG_INFINITY);
        for v in [3.0, -1.0, 7.5] {
            min.fetch_min(v, Ordering::Relaxed);
            max.fetch_max(v, Ordering::Relaxed);
        }
        assert_eq!(min.load(Ordering::Relaxed), -1.0);
        assert_eq!(max.load(Ordering::Relaxed), 7.5);
    }
}
