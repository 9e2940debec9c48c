//! Credential pools shared by every caller of one external dependency
//!
//! A pool hands out a "current" entry and only moves on when a caller
//! reports that entry as rate limited. Each entry also carries an error
//! counter: entries that failed too often are skipped when selecting, and a
//! success pays one error back.

use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

/// Default number of errors after which an entry is skipped
pub const DEFAULT_ERROR_LIMIT: u32 = 3;

/// A pool needs at least one entry
#[derive(Debug, Error)]
#[error("credential pool must contain at least one entry")]
pub struct EmptyPoolError;

#[derive(Debug)]
struct PoolState {
    cursor: usize,
    errors: Vec<u32>,
    rotations: u64,
}

/// Ordered credentials with a shared rotation cursor
#[derive(Debug)]
pub struct CredentialPool<C> {
    entries: Vec<C>,
    error_limit: u32,
    state: Mutex<PoolState>,
}

impl<C: Clone> CredentialPool<C> {
    /// Create a pool. The first entry is selected initially.
    pub fn new(entries: Vec<C>) -> Result<Self, EmptyPoolError> {
        if entries.is_empty() {
            return Err(EmptyPoolError);
        }

        let errors = vec![0; entries.len()];
        Ok(Self {
            entries,
            error_limit: DEFAULT_ERROR_LIMIT,
            state: Mutex::new(PoolState {
                cursor: 0,
                errors,
                rotations: 0,
            }),
        })
    }

    /// Pool with exactly one entry
    pub fn single(entry: C) -> Self {
        let entries = vec![entry];
        Self {
            entries,
            error_limit: DEFAULT_ERROR_LIMIT,
            state: Mutex::new(PoolState {
                cursor: 0,
                errors: vec![0],
                rotations: 0,
            }),
        }
    }

    /// Override the error limit
    pub fn with_error_limit(mut self, limit: u32) -> Self {
        self.error_limit = limit.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the current entry and its index.
    ///
    /// Entries at or over the error limit are skipped. When every entry is
    /// over the limit all counters are reset and the cursor entry is used.
    pub fn select(&self) -> (usize, C) {
        let mut state = self.lock();
        let len = self.entries.len();

        if state.errors.iter().all(|&count| count >= self.error_limit) {
            warn!(
                entries = len,
                "All credentials exceeded the error limit, resetting counters"
            );
            state.errors.iter_mut().for_each(|count| *count = 0);
        }

        let start = state.cursor;
        let index = (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&i| state.errors[i] < self.error_limit)
            .unwrap_or(start);

        if index != start {
            debug!(from = start, to = index, "Skipping unhealthy credential");
            state.cursor = index;
        }

        (index, self.entries[index].clone())
    }

    /// Advance the cursor past `index` if it still points there.
    ///
    /// Concurrent callers that saw the same entry fail rotate it once; the
    /// later ones find the cursor already moved and return `false`.
    pub fn rotate_from(&self, index: usize) -> bool {
        if self.entries.len() < 2 {
            return false;
        }

        let mut state = self.lock();
        if state.cursor != index {
            return false;
        }

        state.cursor = (index + 1) % self.entries.len();
        state.rotations += 1;
        debug!(from = index, to = state.cursor, "Rotated credential");
        true
    }

    pub fn record_success(&self, index: usize) {
        let mut state = self.lock();
        if let Some(count) = state.errors.get_mut(index) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn record_failure(&self, index: usize) {
        let mut state = self.lock();
        if let Some(count) = state.errors.get_mut(index) {
            *count = count.saturating_add(1);
        }
    }

    /// Number of successful rotations so far
    pub fn rotations(&self) -> u64 {
        self.lock().rotations
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    pub fn error_count(&self, index: usize) -> u32 {
        self.lock().errors.get(index).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(keys: &[&'static str]) -> CredentialPool<&'static str> {
        CredentialPool::new(keys.to_vec()).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(CredentialPool::<String>::new(Vec::new()).is_err());
    }

    #[test]
    fn test_selection_is_sticky() {
        let pool = pool(&["a", "b"]);
        assert_eq!(pool.select(), (0, "a"));
        assert_eq!(pool.select(), (0, "a"));
    }

    #[test]
    fn test_rotate_from_is_compare_and_advance() {
        let pool = pool(&["a", "b", "c"]);

        assert!(pool.rotate_from(0));
        // A second caller that also saw entry 0 fail must not skip entry 1
        assert!(!pool.rotate_from(0));

        assert_eq!(pool.select(), (1, "b"));
        assert_eq!(pool.rotations(), 1);
    }

    #[test]
    fn test_single_entry_never_rotates() {
        let pool = CredentialPool::single("only");
        assert!(!pool.rotate_from(0));
        assert_eq!(pool.rotations(), 0);
    }

    #[test]
    fn test_unhealthy_entries_are_skipped() {
        let pool = pool(&["a", "b"]);
        for _ in 0..DEFAULT_ERROR_LIMIT {
            pool.record_failure(0);
        }

        assert_eq!(pool.select(), (1, "b"));
        assert_eq!(pool.cursor(), 1);
    }

    #[test]
    fn test_counters_reset_when_all_unhealthy() {
        let pool = pool(&["a", "b"]).with_error_limit(1);
        pool.record_failure(0);
        pool.record_failure(1);

        assert_eq!(pool.select(), (0, "a"));
        assert_eq!(pool.error_count(0), 0);
        assert_eq!(pool.error_count(1), 0);
    }

    #[test]
    fn test_success_pays_back_one_error() {
        let pool = pool(&["a"]);
        pool.record_failure(0);
        pool.record_failure(0);
        pool.record_success(0);
        assert_eq!(pool.error_count(0), 1);

        pool.record_success(0);
        pool.record_success(0);
        assert_eq!(pool.error_count(0), 0);
    }
}
