//! Pre-submission validation
//!
//! Checks an incoming order against the account and the instrument before
//! any money moves. The ledger still fails closed on its own; these checks
//! give the caller an early, specific rejection.

use rust_decimal::Decimal;
use thiserror::Error;
use types::account::{AccountStatus, TradingAccount};
use types::instrument::Instrument;
use types::order::OrderType;

use crate::margin::MarginBreakdown;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Account is not active: {0:?}")]
    AccountInactive(AccountStatus),

    #[error("Quantity must be positive")]
    ZeroQuantity,

    #[error("Unknown or invalid instrument: {0:?}")]
    UnknownInstrument(String),

    #[error("Limit order requires a positive price")]
    MissingLimitPrice,

    #[error("Insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: Decimal, available: Decimal },
}

/// Validate the order shape: account status, quantity, instrument, price.
///
/// Checks run in that order and the first failure is returned.
pub fn validate_order(
    account: &TradingAccount,
    instrument: Option<&Instrument>,
    instrument_ref: &str,
    order_type: OrderType,
    quantity: u32,
    limit_price: Option<Decimal>,
) -> Result<(), ValidationError> {
    if !account.is_active() {
        return Err(ValidationError::AccountInactive(account.status));
    }
    if quantity == 0 {
        return Err(ValidationError::ZeroQuantity);
    }
    match instrument {
        Some(i) if i.instrument_ref.is_valid() => {}
        _ => return Err(ValidationError::UnknownInstrument(instrument_ref.to_string())),
    }
    if order_type == OrderType::Limit && limit_price.map_or(true, |p| p <= Decimal::ZERO) {
        return Err(ValidationError::MissingLimitPrice);
    }
    Ok(())
}

/// Check the account can fund margin plus charges.
pub fn check_collateral(available: Decimal, breakdown: &MarginBreakdown) -> Result<(), ValidationError> {
    let required = breakdown.required_margin + breakdown.total_charges;
    if available >= required {
        Ok(())
    } else {
        Err(ValidationError::InsufficientMargin { required, available })
    }
}
