//! Poison-tolerant lock helpers.
//!
//! Counter stores sit on the classification path, so a panic in one reporting
//! thread must not take packet accounting down with it. A poisoned lock is
//! logged and its guard recovered; the protected data is plain counters that
//! cannot be left half-updated.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::error;

/// Read-lock `rwlock`, recovering the guard if a previous holder panicked.
pub fn read_lock_or_recover<'a, T>(rwlock: &'a RwLock<T>, context: &str) -> RwLockReadGuard<'a, T> {
    rwlock.read().unwrap_or_else(|poisoned| {
        error!(store = context, "RwLock (read) poisoned - recovering");
        poisoned.into_inner()
    })
}

/// Write-lock `rwlock`, recovering the guard if a previous holder panicked.
pub fn write_lock_or_recover<'a, T>(
    rwlock: &'a RwLock<T>,
    context: &str,
) -> RwLockWriteGuard<'a, T> {
    rwlock.write().unwrap_or_else(|poisoned| {
        error!(store = context, "RwLock (write) poisoned - recovering");
        poisoned.into_inner()
    })
}
