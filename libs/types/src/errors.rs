//! Error types shared by the engine crates
//!
//! Domain error taxonomy using thiserror

use thiserror::Error;

/// Account-level (ledger) errors. These fail closed: the caller must not proceed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AccountError {
    #[error("Account not found: {account_id}")]
    NotFound { account_id: String },

    #[error("Account suspended")]
    Suspended,

    #[error("Account closed")]
    Closed,

    #[error("Insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: String, available: String },

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
}

/// Order-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrderError {
    #[error("Invalid execution price: {0}")]
    InvalidPrice(String),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Missing instrument reference: {0:?}")]
    MissingInstrument(String),

    #[error("Order not found: {order_id}")]
    NotFound { order_id: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Position-level errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PositionError {
    #[error("Position not found: {position_id}")]
    NotFound { position_id: String },

    #[error("Position already booked: {position_id}")]
    AlreadyBooked { position_id: String },

    #[error("No price available to close {instrument}")]
    NoExitPrice { instrument: String },
}
