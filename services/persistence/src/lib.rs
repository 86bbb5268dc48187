//! Persistence Service
//!
//! Transactional in-process store for the execution engine: tables for
//! accounts, orders, positions, ledger entries, alerts, instruments and
//! settings; transactions with staged writes and atomic commit;
//! transaction-scoped advisory and row locks; an optional checksummed
//! commit journal replayed on open.

pub mod journal;
pub mod locks;
pub mod recovery;
pub mod store;

pub use locks::TxnId;
pub use store::{CommitInfo, Database, DatabaseConfig, Row, Setting, StoreError, Tables, Transaction};
