//! In-process bounded attempt counter store.
//!
//! Mirrors the semantics of the BPF hash maps used by the hook programs:
//! fixed capacity, no eviction, per-key atomic increments. Existing keys are
//! bumped under a shared read lock; only first insertion of a source takes the
//! write lock.

use imds_guard_common::policy::{BLOCKED_ATTEMPTS_CAPACITY, TOKEN_REQUESTS_CAPACITY};
use imds_guard_common::{AttemptCounter, RecordOutcome};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::{trace, warn};

use crate::lock_utils::{read_lock_or_recover, write_lock_or_recover};

pub struct BoundedCounterStore {
    name: &'static str,
    capacity: usize,
    entries: RwLock<HashMap<u32, AtomicU64>>,
    /// Set once the first insertion is dropped, so the warning fires once.
    saturated: AtomicBool,
}

impl BoundedCounterStore {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            entries: RwLock::new(HashMap::with_capacity(capacity)),
            saturated: AtomicBool::new(false),
        }
    }

    /// Store sized like the kernel-side blocked-attempts map.
    pub fn blocked_attempts() -> Self {
        Self::new("blocked_attempts", BLOCKED_ATTEMPTS_CAPACITY as usize)
    }

    /// Store sized like the kernel-side token-requests map.
    pub fn token_requests() -> Self {
        Self::new("token_requests", TOKEN_REQUESTS_CAPACITY as usize)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        read_lock_or_recover(&self.entries, self.name).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Current count for `source`, `None` if it was never recorded.
    pub fn get(&self, source: Ipv4Addr) -> Option<u64> {
        read_lock_or_recover(&self.entries, self.name)
            .get(&u32::from(source))
            .map(|count| count.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of all entries. Read-only with respect to the store.
    pub fn snapshot(&self) -> Vec<(Ipv4Addr, u64)> {
        read_lock_or_recover(&self.entries, self.name)
            .iter()
            .map(|(source, count)| (Ipv4Addr::from(*source), count.load(Ordering::Relaxed)))
            .collect()
    }
}

impl AttemptCounter for BoundedCounterStore {
    fn record(&self, source: u32) -> RecordOutcome {
        {
            let entries = read_lock_or_recover(&self.entries, self.name);
            if let Some(count) = entries.get(&source) {
                count.fetch_add(1, Ordering::Relaxed);
                return RecordOutcome::Incremented;
            }
        }

        let mut entries = write_lock_or_recover(&self.entries, self.name);
        // another thread may have inserted while we waited for the write lock
        if let Some(count) = entries.get(&source) {
            count.fetch_add(1, Ordering::Relaxed);
            return RecordOutcome::Incremented;
        }
        if entries.len() >= self.capacity {
            drop(entries);
            if !self.saturated.swap(true, Ordering::Relaxed) {
                warn!(
                    store = self.name,
                    capacity = self.capacity,
                    "Counter store full, new sources will not be counted"
                );
            }
            trace!(store = self.name, source = %Ipv4Addr::from(source), "Dropped counter update");
            return RecordOutcome::Dropped;
        }
        entries.insert(source, AtomicU64::new(1));
        RecordOutcome::Inserted
    }
}

impl std::fmt::Debug for BoundedCounterStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCounterStore")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
