//! A process-wide string-interning pool.
//!
//! Entities carry many short strings that repeat across objects (namespaces, and the names and
//! UIDs that are used as index keys). Interning them lets every index share one allocation per
//! distinct value.

use ahash::AHashSet as HashSet;
use parking_lot::RwLock;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

#[derive(Debug)]
pub struct StringPool {
    strings: RwLock<HashSet<Arc<str>>>,
    empty: Arc<str>,
    default_ns: Arc<str>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

// === impl StringPool ===

impl Default for StringPool {
    fn default() -> Self {
        Self {
            strings: RwLock::new(HashSet::new()),
            empty: Arc::from(""),
            default_ns: Arc::from("default"),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl StringPool {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the canonical reference for `s`.
    ///
    /// Two calls with equal content return pointers to the same allocation for as long as the
    /// pool retains the value.
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(v) = self.strings.read().get(s) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return v.clone();
        }

        let mut strings = self.strings.write();
        // Another writer may have won the race between the two locks.
        if let Some(v) = strings.get(s) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return v.clone();
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let v = Arc::<str>::from(s);
        strings.insert(v.clone());
        v
    }

    pub fn intern_uid(&self, uid: &str) -> Arc<str> {
        self.intern(uid)
    }

    /// Interns a namespace, short-circuiting the empty and `default` namespaces.
    pub fn intern_namespace(&self, ns: &str) -> Arc<str> {
        match ns {
            "" => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.empty.clone()
            }
            "default" => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.default_ns.clone()
            }
            ns => self.intern(ns),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.strings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.read().is_empty()
    }

    /// When the pool holds more than `max` strings, drops every string that is no longer
    /// referenced outside of the pool. Returns the number of strings removed.
    pub fn cleanup(&self, max: usize) -> usize {
        let mut strings = self.strings.write();
        if strings.len() <= max {
            return 0;
        }
        let before = strings.len();
        strings.retain(|s| Arc::strong_count(s) > 1);
        let removed = before - strings.len();
        tracing::debug!(removed, remaining = strings.len(), "cleaned up string pool");
        removed
    }
}
