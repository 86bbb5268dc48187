//! Position tracking types
//!
//! At most one open row per account and instrument. The signed quantity is
//! positive for long exposure, negative for short and zero for a booked
//! (closed) position. Booked rows are history and never take another fill;
//! exposure past zero starts a new row.

use crate::ids::{AccountId, InstrumentRef, PositionId};
use crate::instrument::ProductType;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Position direction derived from the signed quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    /// Profit when price increases
    LONG,
    /// Profit when price decreases
    SHORT,
    /// Quantity is zero
    FLAT,
}

/// What a single fill did to a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillEffect {
    pub previous_quantity: i64,
    /// Units of existing exposure that the fill closed
    pub closed_quantity: i64,
    /// Units of new exposure the fill added to this row
    pub opened_quantity: i64,
    /// Signed quantity this row did not absorb; opens a new position
    pub remainder: i64,
    /// P&L realized on the closed units
    pub realized_pnl: Decimal,
}

/// Position row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: PositionId,
    pub account_id: AccountId,
    pub instrument_ref: InstrumentRef,
    pub product_type: ProductType,
    pub signed_quantity: i64,
    pub average_price: Decimal,
    /// Margin currently held in the account's used bucket for this exposure
    pub blocked_margin: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub day_pnl: Decimal,
    day_realized_pnl: Decimal,
    day: NaiveDate,
    pub stop_loss: Option<Decimal>,
    pub target: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl Position {
    /// Create a position from its first fill
    pub fn open(
        account_id: AccountId,
        instrument_ref: InstrumentRef,
        product_type: ProductType,
        signed_quantity: i64,
        fill_price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            position_id: PositionId::new(),
            account_id,
            instrument_ref,
            product_type,
            signed_quantity,
            average_price: fill_price,
            blocked_margin: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            day_pnl: Decimal::ZERO,
            day_realized_pnl: Decimal::ZERO,
            day: timestamp.date_naive(),
            stop_loss: None,
            target: None,
            opened_at: timestamp,
            updated_at: timestamp,
            closed_at: None,
            version: 0,
        }
    }

    pub fn side(&self) -> PositionSide {
        match self.signed_quantity {
            q if q > 0 => PositionSide::LONG,
            q if q < 0 => PositionSide::SHORT,
            _ => PositionSide::FLAT,
        }
    }

    pub fn is_open(&self) -> bool {
        self.signed_quantity != 0
    }

    /// Zero-quantity rows are kept as booked history
    pub fn is_booked(&self) -> bool {
        self.signed_quantity == 0
    }

    /// Net a signed fill into the position.
    ///
    /// Same direction: quantity grows and the average price is re-weighted
    /// by absolute quantity. Opposite direction: quantity nets and P&L is
    /// realized on the closed units at the old average. The row stops at
    /// zero; any excess is returned as `remainder`. A booked row absorbs
    /// nothing.
    pub fn apply_fill(
        &mut self,
        signed_delta: i64,
        fill_price: Decimal,
        timestamp: DateTime<Utc>,
    ) -> FillEffect {
        let old_qty = self.signed_quantity;
        let old_abs = old_qty.abs();
        let delta_abs = signed_delta.abs();
        let mut effect = FillEffect {
            previous_quantity: old_qty,
            closed_quantity: 0,
            opened_quantity: 0,
            remainder: 0,
            realized_pnl: Decimal::ZERO,
        };

        if signed_delta == 0 {
            return effect;
        }
        if old_qty == 0 {
            effect.remainder = signed_delta;
            return effect;
        }

        if old_qty.signum() == signed_delta.signum() {
            let weighted = Decimal::from(old_abs) * self.average_price
                + Decimal::from(delta_abs) * fill_price;
            self.average_price = weighted / Decimal::from(old_abs + delta_abs);
            self.signed_quantity = old_qty + signed_delta;
            effect.opened_quantity = delta_abs;
        } else {
            let closed = delta_abs.min(old_abs);
            let realized = (fill_price - self.average_price)
                * Decimal::from(closed)
                * Decimal::from(old_qty.signum());
            effect.closed_quantity = closed;
            effect.realized_pnl = realized;
            effect.remainder = signed_delta.signum() * (delta_abs - closed);

            self.signed_quantity = old_qty + signed_delta.signum() * closed;
            if self.signed_quantity == 0 {
                self.closed_at = Some(timestamp);
                self.unrealized_pnl = Decimal::ZERO;
            }
            self.book_realized(realized, timestamp);
        }

        self.touch(timestamp);
        effect
    }

    /// Release the share of held margin that belongs to `closed` units of the
    /// previous exposure. Returns the amount taken off the position.
    pub fn release_margin_for(&mut self, closed: i64, previous_quantity: i64) -> Decimal {
        let prev_abs = previous_quantity.abs();
        if closed <= 0 || prev_abs == 0 {
            return Decimal::ZERO;
        }
        let share = if closed >= prev_abs {
            self.blocked_margin
        } else {
            (self.blocked_margin * Decimal::from(closed) / Decimal::from(prev_abs)).round_dp(2)
        };
        self.blocked_margin -= share;
        share
    }

    /// Re-value the position at `current_price`
    pub fn mark(&mut self, current_price: Decimal, timestamp: DateTime<Utc>) -> Decimal {
        self.roll_day(timestamp);
        self.unrealized_pnl =
            (current_price - self.average_price) * Decimal::from(self.signed_quantity);
        self.day_pnl = self.day_realized_pnl + self.unrealized_pnl;
        self.updated_at = timestamp;
        self.unrealized_pnl
    }

    /// Flatten the position at `exit_price`, returning the realized P&L
    pub fn close_at(&mut self, exit_price: Decimal, timestamp: DateTime<Utc>) -> FillEffect {
        self.apply_fill(-self.signed_quantity, exit_price, timestamp)
    }

    fn book_realized(&mut self, realized: Decimal, timestamp: DateTime<Utc>) {
        self.roll_day(timestamp);
        self.realized_pnl += realized;
        self.day_realized_pnl += realized;
        self.day_pnl = self.day_realized_pnl + self.unrealized_pnl;
    }

    fn roll_day(&mut self, timestamp: DateTime<Utc>) {
        let today = timestamp.date_naive();
        if today != self.day {
            self.day = today;
            self.day_realized_pnl = Decimal::ZERO;
        }
    }

    fn touch(&mut self, timestamp: DateTime<Utc>) {
        self.updated_at = timestamp;
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long(qty: i64, price: i64) -> Position {
        Position::open(
            AccountId::new(),
            InstrumentRef::new("NSE:SBIN"),
            ProductType::Intraday,
            qty,
            Decimal::from(price),
            Utc::now(),
        )
    }

    #[test]
    fn test_position_creation() {
        let pos = long(10, 100);
        assert_eq!(pos.side(), PositionSide::LONG);
        assert_eq!(pos.average_price, Decimal::from(100));
        assert!(pos.is_open());
    }

    #[test]
    fn test_same_direction_reaverages() {
        let mut pos = long(10, 100);
        let effect = pos.apply_fill(10, Decimal::from(110), Utc::now());

        assert_eq!(pos.signed_quantity, 20);
        assert_eq!(pos.average_price, Decimal::from(105));
        assert_eq!(effect.opened_quantity, 10);
        assert_eq!(effect.realized_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_partial_reduce_keeps_average() {
        let mut pos = long(10, 100);
        let effect = pos.apply_fill(-4, Decimal::from(90), Utc::now());

        assert_eq!(pos.signed_quantity, 6);
        assert_eq!(pos.average_price, Decimal::from(100));
        assert_eq!(effect.closed_quantity, 4);
        assert_eq!(effect.realized_pnl, Decimal::from(-40));
        assert_eq!(pos.realized_pnl, Decimal::from(-40));
    }

    #[test]
    fn test_cross_through_zero_books_and_returns_excess() {
        // +10 @ 100, then -15 @ 120: books +10 with 200 realized, -5 left over
        let mut pos = long(10, 100);
        let effect = pos.apply_fill(-15, Decimal::from(120), Utc::now());

        assert!(pos.is_booked());
        assert_eq!(pos.side(), PositionSide::FLAT);
        assert!(pos.closed_at.is_some());
        assert_eq!(pos.realized_pnl, Decimal::from(200));
        assert_eq!(effect.closed_quantity, 10);
        assert_eq!(effect.opened_quantity, 0);
        assert_eq!(effect.remainder, -5);
        assert_eq!(effect.realized_pnl, Decimal::from(200));
    }

    #[test]
    fn test_short_cover_realizes_inverse() {
        let mut pos = long(-10, 100);
        let effect = pos.apply_fill(10, Decimal::from(90), Utc::now());
        // short from 100 covered at 90: +10 per unit
        assert_eq!(effect.realized_pnl, Decimal::from(100));
        assert!(pos.is_booked());
        assert!(pos.closed_at.is_some());
    }

    #[test]
    fn test_booked_row_is_left_alone() {
        let mut pos = long(5, 100);
        pos.close_at(Decimal::from(105), Utc::now());
        assert!(pos.is_booked());
        assert_eq!(pos.realized_pnl, Decimal::from(25));
        let booked = pos.clone();

        let effect = pos.apply_fill(-3, Decimal::from(200), Utc::now());
        assert_eq!(effect.remainder, -3);
        assert_eq!(pos, booked);
    }

    #[test]
    fn test_release_margin_proportional() {
        let mut pos = long(10, 100);
        pos.blocked_margin = Decimal::from(500);

        let released = pos.release_margin_for(4, 10);
        assert_eq!(released, Decimal::from(200));
        assert_eq!(pos.blocked_margin, Decimal::from(300));

        let released = pos.release_margin_for(6, 6);
        assert_eq!(released, Decimal::from(300));
        assert_eq!(pos.blocked_margin, Decimal::ZERO);
    }

    #[test]
    fn test_mark_long_and_short() {
        let mut pos = long(2, 100);
        assert_eq!(pos.mark(Decimal::from(90), Utc::now()), Decimal::from(-20));

        let mut short = long(-2, 100);
        assert_eq!(short.mark(Decimal::from(90), Utc::now()), Decimal::from(20));
        assert_eq!(short.day_pnl, Decimal::from(20));
    }
}
