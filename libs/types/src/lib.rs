//! Types library for the order-execution and account-risk engine
//!
//! Core row and value types shared by the risk engine, the persistence layer
//! and the execution engine.
//!
//! # Modules
//! - `ids`: Unique identifiers (OrderId, AccountId, PositionId, ...)
//! - `numeric`: Money and price rounding helpers
//! - `instrument`: Instruments, segments and product types
//! - `order`: Order lifecycle types
//! - `account`: Trading account and margin buckets
//! - `position`: Position netting and valuation
//! - `ledger`: Append-only ledger entries
//! - `risk`: Risk alerts
//! - `errors`: Error taxonomy

pub mod ids;
pub mod numeric;
pub mod instrument;
pub mod order;
pub mod account;
pub mod position;
pub mod ledger;
pub mod risk;
pub mod errors;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::account::*;
    pub use crate::errors::*;
    pub use crate::ids::*;
    pub use crate::instrument::*;
    pub use crate::ledger::*;
    pub use crate::numeric::*;
    pub use crate::order::*;
    pub use crate::position::*;
    pub use crate::risk::*;
}
