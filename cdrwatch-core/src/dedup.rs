//! Process-wide record deduplication
//!
//! Every worker shares one [`Deduplicator`]. Ids are kept for the lifetime of
//! the process: there is no eviction and nothing is persisted, so a restart
//! re-delivers whatever the portal still lists.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

/// Set of record ids that were already emitted
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: Mutex<HashSet<String>>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true the first time `id` is seen, false afterwards.
    ///
    /// Membership check and insert happen under one lock, so two workers can
    /// never both be told to emit the same id.
    pub fn should_emit(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if seen.contains(id) {
            return false;
        }
        seen.insert(id.to_string())
    }

    /// Get the number of ids seen
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
