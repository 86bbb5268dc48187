//! Order lifecycle types
//!
//! An order is created PENDING by the submission path and moved exactly once
//! to EXECUTED or CANCELLED by the execution worker. Terminal orders are never
//! re-opened.

use crate::errors::OrderError;
use crate::ids::{AccountId, InstrumentRef, OrderId, PositionId};
use crate::instrument::{ProductType, Segment};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side (buyer or seller)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy order (bid)
    BUY,
    /// Sell order (ask)
    SELL,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::BUY => Side::SELL,
            Side::SELL => Side::BUY,
        }
    }

    /// +1 for BUY, -1 for SELL
    pub fn sign(&self) -> i64 {
        match self {
            Side::BUY => 1,
            Side::SELL => -1,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::BUY => f.write_str("BUY"),
            Side::SELL => f.write_str("SELL"),
        }
    }
}

/// Market orders take the realism-adjusted quote, limit orders their own price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    /// Accepted, margin reserved, awaiting the execution worker
    Pending,
    /// Filled into a position (terminal)
    Executed,
    /// Cancelled, reserved funds released (terminal)
    Cancelled,
}

impl OrderStatus {
    /// Check if status is terminal (no further transitions possible)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Executed => "EXECUTED",
            OrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Why an order ended CANCELLED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    /// No positive price could be resolved for execution
    InvalidPrice,
    /// The order does not reference a known instrument
    MissingInstrument,
    /// Execution failed after the order was claimed; compensated
    ExecutionFailed,
    UserRequested,
}

/// Order row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub account_id: AccountId,
    pub instrument_ref: InstrumentRef,
    pub segment: Segment,
    pub product_type: ProductType,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: u32,
    /// Limit price, if any
    pub requested_price: Option<Decimal>,
    pub status: OrderStatus,
    pub cancel_reason: Option<CancelReason>,
    pub filled_quantity: u32,
    /// Price recorded at submission for market orders, final fill price once executed
    pub average_fill_price: Decimal,
    /// Margin moved to used at submission
    pub blocked_margin: Decimal,
    /// Brokerage plus statutory charges debited at submission
    pub charges: Decimal,
    pub position_id: Option<PositionId>,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl Order {
    /// Create a new pending order
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: AccountId,
        instrument_ref: InstrumentRef,
        segment: Segment,
        product_type: ProductType,
        order_type: OrderType,
        side: Side,
        quantity: u32,
        requested_price: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: OrderId::new(),
            account_id,
            instrument_ref,
            segment,
            product_type,
            order_type,
            side,
            quantity,
            requested_price,
            status: OrderStatus::Pending,
            cancel_reason: None,
            filled_quantity: 0,
            average_fill_price: Decimal::ZERO,
            blocked_margin: Decimal::ZERO,
            charges: Decimal::ZERO,
            position_id: None,
            created_at: timestamp,
            executed_at: None,
            updated_at: timestamp,
            version: 0,
        }
    }

    /// Positive for BUY, negative for SELL
    pub fn signed_quantity(&self) -> i64 {
        self.side.sign() * i64::from(self.quantity)
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }

    /// Price recorded on the order that can be executed against:
    /// the recorded fill price first, then the limit price. Non-positive
    /// values do not count.
    pub fn recorded_price(&self) -> Option<Decimal> {
        if self.average_fill_price > Decimal::ZERO {
            return Some(self.average_fill_price);
        }
        self.requested_price.filter(|p| *p > Decimal::ZERO)
    }

    /// Move PENDING -> EXECUTED
    pub fn mark_executed(
        &mut self,
        fill_price: Decimal,
        position_id: PositionId,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.ensure_pending(OrderStatus::Executed)?;
        if fill_price <= Decimal::ZERO {
            return Err(OrderError::InvalidPrice(fill_price.to_string()));
        }

        self.status = OrderStatus::Executed;
        self.filled_quantity = self.quantity;
        self.average_fill_price = fill_price;
        self.position_id = Some(position_id);
        self.executed_at = Some(timestamp);
        self.updated_at = timestamp;
        self.version += 1;
        Ok(())
    }

    /// Move PENDING -> CANCELLED
    pub fn mark_cancelled(
        &mut self,
        reason: CancelReason,
        timestamp: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        self.ensure_pending(OrderStatus::Cancelled)?;

        self.status = OrderStatus::Cancelled;
        self.cancel_reason = Some(reason);
        self.updated_at = timestamp;
        self.version += 1;
        Ok(())
    }

    fn ensure_pending(&self, to: OrderStatus) -> Result<(), OrderError> {
        if self.status.is_terminal() {
            return Err(OrderError::InvalidStateTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_order(side: Side, qty: u32) -> Order {
        Order::new(
            AccountId::new(),
            InstrumentRef::new("NSE:RELIANCE"),
            Segment::Equity,
            ProductType::Intraday,
            OrderType::Market,
            side,
            qty,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::BUY.opposite(), Side::SELL);
        assert_eq!(Side::SELL.opposite(), Side::BUY);
    }

    #[test]
    fn test_signed_quantity() {
        assert_eq!(make_order(Side::BUY, 10).signed_quantity(), 10);
        assert_eq!(make_order(Side::SELL, 10).signed_quantity(), -10);
    }

    #[test]
    fn test_order_creation() {
        let order = make_order(Side::BUY, 5);
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.is_pending());
        assert_eq!(order.filled_quantity, 0);
        assert!(order.position_id.is_none());
    }

    #[test]
    fn test_recorded_price_preference() {
        let mut order = make_order(Side::BUY, 5);
        assert_eq!(order.recorded_price(), None);

        order.requested_price = Some(Decimal::from(99));
        assert_eq!(order.recorded_price(), Some(Decimal::from(99)));

        order.average_fill_price = Decimal::from(101);
        assert_eq!(order.recorded_price(), Some(Decimal::from(101)));

        order.average_fill_price = Decimal::ZERO;
        order.requested_price = Some(Decimal::from(-1));
        assert_eq!(order.recorded_price(), None);
    }

    #[test]
    fn test_mark_executed() {
        let mut order = make_order(Side::BUY, 5);
        let pid = PositionId::new();
        order.mark_executed(Decimal::from(250), pid, Utc::now()).unwrap();

        assert_eq!(order.status, OrderStatus::Executed);
        assert_eq!(order.filled_quantity, 5);
        assert_eq!(order.average_fill_price, Decimal::from(250));
        assert_eq!(order.position_id, Some(pid));
        assert!(order.executed_at.is_some());
        assert_eq!(order.version, 1);
    }

    #[test]
    fn test_terminal_orders_never_reopen() {
        let mut order = make_order(Side::SELL, 1);
        order.mark_cancelled(CancelReason::InvalidPrice, Utc::now()).unwrap();
        assert!(order.status.is_terminal());

        let err = order
            .mark_executed(Decimal::from(10), PositionId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidStateTransition { .. }));

        let err = order.mark_cancelled(CancelReason::UserRequested, Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::InvalidStateTransition { .. }));
        assert_eq!(order.cancel_reason, Some(CancelReason::InvalidPrice));
    }

    #[test]
    fn test_execute_rejects_non_positive_price() {
        let mut order = make_order(Side::BUY, 1);
        let err = order
            .mark_executed(Decimal::ZERO, PositionId::new(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidPrice(_)));
        assert!(order.is_pending());
    }

    #[test]
    fn test_order_serialization() {
        let order = make_order(Side::SELL, 3);
        let json = serde_json::to_string(&order).unwrap();
        assert!(json.contains("\"PENDING\""));
        let deserialized: Order = serde_json::from_str(&json).unwrap();
        assert_eq!(order, deserialized);
    }
}
