//! Transactional row store
//!
//! Committed tables live behind one mutex that is only held for short,
//! non-blocking critical sections. A `Transaction` stages its writes in a
//! private write-set: its own reads see its writes first, then committed
//! state. Commit checks the rows it read for concurrent modification,
//! journals the write-set, and applies it atomically. Dropping a
//! transaction without committing discards the write-set. Either way all of
//! its locks are released.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use types::account::TradingAccount;
use types::ids::{AccountId, AlertId, InstrumentRef, OrderId, PositionId, TransactionId};
use types::instrument::Instrument;
use types::ledger::Transaction as LedgerEntry;
use types::order::Order;
use types::position::Position;
use types::risk::RiskAlert;

use crate::journal::{Change, CommitRecord, JournalError, JournalWriter};
use crate::locks::{AdvisoryLocks, RowLockResult, RowLocks, TxnId};
use crate::recovery;

// ── Errors ──────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Lock wait timeout on {key}")]
    LockTimeout { key: String },

    #[error("Write conflict on {table} row {key}")]
    Conflict { table: &'static str, key: String },

    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),
}

// ── Rows ────────────────────────────────────────────────────────────

/// Key/value configuration row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// All tables. Also used as a transaction's write-set.
#[derive(Debug, Clone, Default)]
pub struct Tables {
    pub accounts: BTreeMap<AccountId, TradingAccount>,
    pub orders: BTreeMap<OrderId, Order>,
    pub positions: BTreeMap<PositionId, Position>,
    pub transactions: BTreeMap<TransactionId, LedgerEntry>,
    pub alerts: BTreeMap<AlertId, RiskAlert>,
    pub instruments: BTreeMap<InstrumentRef, Instrument>,
    pub settings: BTreeMap<String, Setting>,
}

impl Tables {
    pub fn apply(&mut self, change: Change) {
        match change {
            Change::Account(r) => self.put(r),
            Change::Order(r) => self.put(r),
            Change::Position(r) => self.put(r),
            Change::Transaction(r) => self.put(r),
            Change::Alert(r) => self.put(r),
            Change::Instrument(r) => self.put(r),
            Change::Setting(r) => self.put(r),
        }
    }

    fn put<R: Row>(&mut self, row: R) {
        R::table_mut(self).insert(row.key(), row);
    }

    fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.orders.is_empty()
            && self.positions.is_empty()
            && self.transactions.is_empty()
            && self.alerts.is_empty()
            && self.instruments.is_empty()
            && self.settings.is_empty()
    }
}

/// A table row type
pub trait Row: Clone {
    type Key: Ord + Clone + fmt::Display;
    const TABLE: &'static str;

    fn key(&self) -> Self::Key;

    /// Row version for conflict detection; unversioned rows report 0
    fn version(&self) -> u64 {
        0
    }

    fn table(tables: &Tables) -> &BTreeMap<Self::Key, Self>;
    fn table_mut(tables: &mut Tables) -> &mut BTreeMap<Self::Key, Self>;
    fn into_change(self) -> Change;
}

macro_rules! row {
    ($ty:ty, $key:ty, $field:ident, $variant:ident, |$r:ident| $key_expr:expr $(, version: $ver:expr)?) => {
        impl Row for $ty {
            type Key = $key;
            const TABLE: &'static str = stringify!($field);

            fn key(&self) -> $key {
                let $r = self;
                $key_expr
            }

            $(
                fn version(&self) -> u64 {
                    let $r = self;
                    $ver
                }
            )?

            fn table(tables: &Tables) -> &BTreeMap<$key, Self> {
                &tables.$field
            }

            fn table_mut(tables: &mut Tables) -> &mut BTreeMap<$key, Self> {
                &mut tables.$field
            }

            fn into_change(self) -> Change {
                Change::$variant(self)
            }
        }
    };
}

row!(TradingAccount, AccountId, accounts, Account, |r| r.account_id, version: r.version);
row!(Order, OrderId, orders, Order, |r| r.order_id, version: r.version);
row!(Position, PositionId, positions, Position, |r| r.position_id, version: r.version);
row!(LedgerEntry, TransactionId, transactions, Transaction, |r| r.transaction_id);
row!(RiskAlert, AlertId, alerts, Alert, |r| r.alert_id);
row!(Instrument, InstrumentRef, instruments, Instrument, |r| r.instrument_ref.clone());
row!(Setting, String, settings, Setting, |r| r.key.clone());

// ── Database ────────────────────────────────────────────────────────

/// Store configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Longest a row lock request waits before `LockTimeout`
    pub lock_wait: Duration,
    /// Commit journal; `None` keeps the store purely in memory
    pub journal_path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::from_secs(5),
            journal_path: None,
        }
    }
}

struct Committed {
    tables: Tables,
    next_sequence: u64,
}

struct Inner {
    committed: Mutex<Committed>,
    journal: Option<Mutex<JournalWriter>>,
    advisory: AdvisoryLocks,
    rows: RowLocks,
    next_txn: AtomicU64,
    lock_wait: Duration,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared handle to the store
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("lock_wait", &self.inner.lock_wait)
            .field("journaled", &self.inner.journal.is_some())
            .finish()
    }
}

impl Database {
    /// Empty in-memory store with default settings
    pub fn in_memory() -> Self {
        Self::build(Tables::default(), 0, None, DatabaseConfig::default().lock_wait)
    }

    /// Open a store, replaying the commit journal when one is configured.
    pub fn open(config: DatabaseConfig) -> Result<Self, StoreError> {
        match &config.journal_path {
            None => Ok(Self::build(Tables::default(), 0, None, config.lock_wait)),
            Some(path) => {
                let recovered = recovery::recover(path)?;
                let mut writer = JournalWriter::open(path)?;
                writer.set_next_sequence(recovered.next_sequence);
                Ok(Self::build(
                    recovered.tables,
                    recovered.next_sequence,
                    Some(writer),
                    config.lock_wait,
                ))
            }
        }
    }

    fn build(tables: Tables, next_sequence: u64, journal: Option<JournalWriter>, lock_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                committed: Mutex::new(Committed {
                    tables,
                    next_sequence,
                }),
                journal: journal.map(Mutex::new),
                advisory: AdvisoryLocks::new(),
                rows: RowLocks::new(),
                next_txn: AtomicU64::new(1),
                lock_wait,
            }),
        }
    }

    /// Start a transaction
    pub fn begin(&self) -> Transaction {
        let id = self.inner.next_txn.fetch_add(1, Ordering::Relaxed);
        Transaction {
            id,
            inner: Arc::clone(&self.inner),
            writes: Tables::default(),
            read_versions: BTreeMap::new(),
            finished: false,
        }
    }

    /// Committed row by key
    pub fn get<R: Row>(&self, key: &R::Key) -> Option<R> {
        let committed = guard(&self.inner.committed);
        R::table(&committed.tables).get(key).cloned()
    }

    /// Committed rows matching `pred`, in key order
    pub fn scan<R: Row>(&self, pred: impl Fn(&R) -> bool) -> Vec<R> {
        let committed = guard(&self.inner.committed);
        R::table(&committed.tables)
            .values()
            .filter(|r| pred(r))
            .cloned()
            .collect()
    }

    /// Committed setting value
    pub fn setting(&self, key: &str) -> Option<String> {
        self.get::<Setting>(&key.to_string()).map(|s| s.value)
    }

    /// Number of commits applied so far
    pub fn sequence(&self) -> u64 {
        guard(&self.inner.committed).next_sequence
    }

    pub fn lock_wait(&self) -> Duration {
        self.inner.lock_wait
    }

    /// Current owner of an advisory lock
    pub fn advisory_holder(&self, key: &str) -> Option<TxnId> {
        self.inner.advisory.holder(key)
    }
}

// ── Transaction ─────────────────────────────────────────────────────

/// Outcome of a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitInfo {
    /// Journal sequence; `None` when nothing was written
    pub sequence: Option<u64>,
    pub rows_written: usize,
}

/// A unit of work over the store
pub struct Transaction {
    id: TxnId,
    inner: Arc<Inner>,
    writes: Tables,
    read_versions: BTreeMap<(&'static str, String), u64>,
    finished: bool,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("finished", &self.finished)
            .finish()
    }
}

impl Transaction {
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// Non-blocking advisory lock held until commit or rollback.
    pub fn try_advisory_lock(&self, key: &str) -> bool {
        self.inner.advisory.try_lock(key, self.id)
    }

    /// Exclusive row lock (`FOR UPDATE`), waiting up to the lock-wait timeout.
    pub fn lock_row(&self, key: &str) -> Result<(), StoreError> {
        match self.inner.rows.lock(key, self.id, self.inner.lock_wait) {
            RowLockResult::Acquired => Ok(()),
            RowLockResult::TimedOut => Err(StoreError::LockTimeout {
                key: key.to_string(),
            }),
        }
    }

    /// Row by key: own writes first, then committed state.
    pub fn get<R: Row>(&mut self, key: &R::Key) -> Option<R> {
        if let Some(row) = R::table(&self.writes).get(key) {
            return Some(row.clone());
        }
        let row = {
            let committed = guard(&self.inner.committed);
            R::table(&committed.tables).get(key).cloned()
        };
        if let Some(r) = &row {
            self.read_versions
                .entry((R::TABLE, key.to_string()))
                .or_insert(r.version());
        }
        row
    }

    /// Rows matching `pred` with own writes applied, in key order.
    pub fn scan<R: Row>(&mut self, pred: impl Fn(&R) -> bool) -> Vec<R> {
        let staged = R::table(&self.writes);
        let mut merged: BTreeMap<R::Key, R> = {
            let committed = guard(&self.inner.committed);
            R::table(&committed.tables)
                .iter()
                .filter(|(k, _)| !staged.contains_key(k))
                .filter(|(_, r)| pred(r))
                .map(|(k, r)| (k.clone(), r.clone()))
                .collect()
        };
        for (key, row) in &merged {
            self.read_versions
                .entry((R::TABLE, key.to_string()))
                .or_insert(row.version());
        }
        merged.extend(
            staged
                .iter()
                .filter(|(_, r)| pred(r))
                .map(|(k, r)| (k.clone(), r.clone())),
        );
        merged.into_values().collect()
    }

    /// Stage an insert or update
    pub fn put<R: Row>(&mut self, row: R) {
        R::table_mut(&mut self.writes).insert(row.key(), row);
    }

    /// Setting value with own writes applied
    pub fn setting(&mut self, key: &str) -> Option<String> {
        self.get::<Setting>(&key.to_string()).map(|s| s.value)
    }

    pub fn set_setting(&mut self, key: &str, value: impl Into<String>, timestamp: DateTime<Utc>) {
        self.put(Setting {
            key: key.to_string(),
            value: value.into(),
            updated_at: timestamp,
        });
    }

    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Validate, journal and apply the write-set, then release locks.
    pub fn commit(mut self) -> Result<CommitInfo, StoreError> {
        self.finished = true;
        let writes = std::mem::take(&mut self.writes);
        let result = self.apply(writes);
        self.release();
        result
    }

    /// Discard the write-set and release locks.
    pub fn rollback(mut self) {
        self.finished = true;
        if self.is_dirty() {
            debug!(txn = self.id, "Transaction rolled back");
        }
        self.release();
    }

    fn apply(&self, mut writes: Tables) -> Result<CommitInfo, StoreError> {
        let mut committed = guard(&self.inner.committed);

        self.check::<TradingAccount>(&committed.tables, &writes)?;
        self.check::<Order>(&committed.tables, &writes)?;
        self.check::<Position>(&committed.tables, &writes)?;
        self.check::<LedgerEntry>(&committed.tables, &writes)?;
        self.check::<RiskAlert>(&committed.tables, &writes)?;
        self.check::<Instrument>(&committed.tables, &writes)?;
        self.check::<Setting>(&committed.tables, &writes)?;

        let mut changes = Vec::new();
        drain::<TradingAccount>(&mut writes, &mut changes);
        drain::<Order>(&mut writes, &mut changes);
        drain::<Position>(&mut writes, &mut changes);
        drain::<LedgerEntry>(&mut writes, &mut changes);
        drain::<RiskAlert>(&mut writes, &mut changes);
        drain::<Instrument>(&mut writes, &mut changes);
        drain::<Setting>(&mut writes, &mut changes);

        if changes.is_empty() {
            return Ok(CommitInfo {
                sequence: None,
                rows_written: 0,
            });
        }

        let sequence = committed.next_sequence;
        if let Some(journal) = &self.inner.journal {
            let record = CommitRecord {
                sequence,
                timestamp: Utc::now().timestamp_millis(),
                changes: changes.clone(),
            };
            guard(journal).append(&record)?;
        }

        let rows_written = changes.len();
        for change in changes {
            committed.tables.apply(change);
        }
        committed.next_sequence += 1;

        debug!(txn = self.id, sequence, rows_written, "Transaction committed");
        Ok(CommitInfo {
            sequence: Some(sequence),
            rows_written,
        })
    }

    /// Reject the commit if a staged row changed since this transaction read it
    fn check<R: Row>(&self, committed: &Tables, writes: &Tables) -> Result<(), StoreError> {
        for key in R::table(writes).keys() {
            let Some(read) = self.read_versions.get(&(R::TABLE, key.to_string())) else {
                continue;
            };
            let current = R::table(committed).get(key).map(|r| r.version());
            if current != Some(*read) {
                warn!(txn = self.id, table = R::TABLE, key = %key, "Write conflict");
                return Err(StoreError::Conflict {
                    table: R::TABLE,
                    key: key.to_string(),
                });
            }
        }
        Ok(())
    }

    fn release(&self) {
        self.inner.advisory.release_all(self.id);
        self.inner.rows.release_all(self.id);
    }
}

fn drain<R: Row>(writes: &mut Tables, out: &mut Vec<Change>) {
    let rows = std::mem::take(R::table_mut(writes));
    out.extend(rows.into_values().map(R::into_change));
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished {
            if self.is_dirty() {
                debug!(txn = self.id, "Transaction dropped without commit; discarding writes");
            }
            self.release();
        }
    }
}
