//! Execution Engine Service
//!
//! Turns submitted orders into positions and keeps accounts solvent:
//! - `ledger`: margin and fund mutations with an append-only entry log
//! - `positions`: per-instrument netting and valuation
//! - `submission`: reserve funds and record PENDING orders
//! - `worker`: exactly-once settlement with compensation
//! - `close`: the shared position close path
//! - `monitor`: periodic loss-utilization sweep with auto-close
//! - `operator`: manual close, on-demand sweep, thresholds, alerts

pub mod close;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod monitor;
pub mod notify;
pub mod operator;
pub mod positions;
pub mod quotes;
pub mod settings;
pub mod submission;
pub mod worker;

pub use close::{CloseOutcome, CloseReason};
pub use config::EngineArgs;
pub use context::EngineContext;
pub use error::{EngineError, LedgerError};
pub use monitor::{MonitorConfig, RiskMonitor, SweepReport};
pub use notify::{ChannelNotifier, Notification, Notifier};
pub use operator::Operator;
pub use quotes::{QuoteError, QuoteSource, StaticQuotes, StoredQuotes};
pub use settings::SettingsCache;
pub use submission::{submit_order, OrderRequest, Submission};
pub use worker::{BatchReport, ExecutionHook, ExecutionWorker, OrderOutcome, WorkerConfig};
