//! Exposure and utilization calculations
//!
//! Deterministic valuation of open positions and the account-level loss
//! utilization used by the risk monitor.

use rust_decimal::Decimal;
use types::position::Position;

/// Unrealized P&L of a signed holding
///
/// `(current_price - average_price) × signed_quantity`
pub fn unrealized_pnl(signed_quantity: i64, average_price: Decimal, current_price: Decimal) -> Decimal {
    (current_price - average_price) * Decimal::from(signed_quantity)
}

/// Notional value of a signed holding at `price`
pub fn position_value(signed_quantity: i64, price: Decimal) -> Decimal {
    Decimal::from(signed_quantity.abs()) * price
}

/// Sum of stored unrealized P&L across open positions.
pub fn total_unrealized_pnl(positions: &[Position]) -> Decimal {
    positions
        .iter()
        .filter(|p| p.is_open())
        .fold(Decimal::ZERO, |acc, p| acc + p.unrealized_pnl)
}

/// Unrealized loss as a non-negative amount; profits count as zero loss.
pub fn unrealized_loss(total_unrealized: Decimal) -> Decimal {
    if total_unrealized < Decimal::ZERO {
        -total_unrealized
    } else {
        Decimal::ZERO
    }
}

/// Loss utilization
///
/// `utilization = loss / (available_margin + balance)`, zero when the
/// denominator is not positive. Only a net loss counts: gains on some
/// positions offset losses on others, and a net gain gives zero.
pub fn loss_utilization(total_unrealized: Decimal, available_margin: Decimal, balance: Decimal) -> Decimal {
    let funds = available_margin + balance;
    if funds <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    unrealized_loss(total_unrealized) / funds
}
