//! Transaction-scoped locks
//!
//! Two primitives, both keyed by string and owned by a transaction id:
//! - advisory locks: non-blocking try-lock, a contended key is refused
//! - row locks: `FOR UPDATE` style, waits up to the lock-wait timeout
//!
//! Locks are re-entrant for the owning transaction and released together
//! when the transaction commits or rolls back.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Transaction identifier used as lock owner
pub type TxnId = u64;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Named, non-blocking, transaction-scoped mutual exclusion
#[derive(Debug, Default)]
pub struct AdvisoryLocks {
    held: Mutex<HashMap<String, TxnId>>,
}

impl AdvisoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `key` for `owner` without waiting.
    ///
    /// Returns `true` when acquired or already held by `owner`.
    pub fn try_lock(&self, key: &str, owner: TxnId) -> bool {
        let mut held = guard(&self.held);
        match held.get(key) {
            Some(current) => *current == owner,
            None => {
                held.insert(key.to_string(), owner);
                true
            }
        }
    }

    pub fn holder(&self, key: &str) -> Option<TxnId> {
        guard(&self.held).get(key).copied()
    }

    /// Release every key held by `owner`.
    pub fn release_all(&self, owner: TxnId) {
        guard(&self.held).retain(|_, holder| *holder != owner);
    }

    pub fn held_count(&self) -> usize {
        guard(&self.held).len()
    }
}

/// Outcome of a row lock request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLockResult {
    Acquired,
    /// Held by another transaction past the wait timeout
    TimedOut,
}

/// Exclusive row locks with bounded waiting
#[derive(Debug, Default)]
pub struct RowLocks {
    held: Mutex<HashMap<String, TxnId>>,
    released: Condvar,
}

impl RowLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock `key` for `owner`, waiting at most `wait`.
    pub fn lock(&self, key: &str, owner: TxnId, wait: Duration) -> RowLockResult {
        let deadline = Instant::now() + wait;
        let mut held = guard(&self.held);

        loop {
            match held.get(key) {
                None => {
                    held.insert(key.to_string(), owner);
                    return RowLockResult::Acquired;
                }
                Some(current) if *current == owner => return RowLockResult::Acquired,
                Some(_) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return RowLockResult::TimedOut;
                    }
                    let (next, _) = self
                        .released
                        .wait_timeout(held, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                    held = next;
                }
            }
        }
    }

    /// Release every row held by `owner` and wake waiters.
    pub fn release_all(&self, owner: TxnId) {
        let mut held = guard(&self.held);
        let before = held.len();
        held.retain(|_, holder| *holder != owner);
        if held.len() != before {
            self.released.notify_all();
        }
    }

    pub fn holder(&self, key: &str) -> Option<TxnId> {
        guard(&self.held).get(key).copied()
    }
}
