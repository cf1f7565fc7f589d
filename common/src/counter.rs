//! Attempt counter abstraction.
//!
//! The verdict engine records each `Allow`/`Block` decision into two
//! capacity-bounded stores keyed by source address. A full store is a normal
//! outcome ([`RecordOutcome::Dropped`]), never an error, and never feeds back
//! into the verdict.

/// Result of a single counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The source was already present and its count was incremented.
    Incremented,
    /// The source was new and was inserted with a count of 1.
    Inserted,
    /// The source was new and the store had no spare capacity.
    Dropped,
}

impl RecordOutcome {
    pub fn is_recorded(&self) -> bool {
        !matches!(self, RecordOutcome::Dropped)
    }
}

/// A bounded, source-keyed tally store.
///
/// Implementations must make the increment atomic per key: concurrent calls
/// for the same source may not lose updates.
pub trait AttemptCounter {
    /// `source` is the host-order IPv4 source address.
    fn record(&self, source: u32) -> RecordOutcome;
}

impl<T: AttemptCounter + ?Sized> AttemptCounter for &T {
    #[inline(always)]
    fn record(&self, source: u32) -> RecordOutcome {
        (**self).record(source)
    }
}
