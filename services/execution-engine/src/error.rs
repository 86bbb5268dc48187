//! Execution engine errors

use persistence::StoreError;
use risk_engine::{MarginError, ValidationError};
use thiserror::Error;
use types::errors::{AccountError, OrderError, PositionError};

use crate::quotes::QuoteError;

/// Fund ledger failures
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Account(#[from] AccountError),

    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Position(#[from] PositionError),

    #[error(transparent)]
    Margin(#[from] MarginError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Quote(#[from] QuoteError),

    #[error("Lock held elsewhere: {0}")]
    Busy(String),

    #[error("Invalid thresholds: warning {warning}, auto-close {auto_close}")]
    InvalidThresholds { warning: String, auto_close: String },

    #[error("Alert not found: {0}")]
    AlertNotFound(String),

    #[error("Execution aborted: {0}")]
    Aborted(String),
}

impl EngineError {
    /// Failures caused by another transaction touching the same rows
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            EngineError::Busy(_)
                | EngineError::Store(StoreError::LockTimeout { .. })
                | EngineError::Store(StoreError::Conflict { .. })
                | EngineError::Ledger(LedgerError::Store(StoreError::LockTimeout { .. }))
                | EngineError::Ledger(LedgerError::Store(StoreError::Conflict { .. }))
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
