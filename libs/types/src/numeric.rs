//! Money and price helpers
//!
//! Uses rust_decimal for deterministic arithmetic (no floating-point errors).
//! Quantities are whole units (shares or contracts), money is `Decimal`.

use rust_decimal::prelude::*;
use rust_decimal::Decimal;

/// Smallest price increment used when rounding execution prices
pub const TICK_SIZE: &str = "0.05";

/// Tick size as a Decimal
pub fn tick_size() -> Decimal {
    Decimal::new(5, 2)
}

/// Floor a money amount to the whole currency unit.
pub fn floor_currency(value: Decimal) -> Decimal {
    value.floor()
}

/// Round a money amount to paise (two decimal places, HALF_UP).
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a price up to the next tick, never below one tick.
pub fn ceil_to_tick(price: Decimal) -> Decimal {
    snap_to_tick(price, RoundingStrategy::ToPositiveInfinity)
}

/// Round a price down to the previous tick, never below one tick.
pub fn floor_to_tick(price: Decimal) -> Decimal {
    snap_to_tick(price, RoundingStrategy::ToNegativeInfinity)
}

fn snap_to_tick(price: Decimal, strategy: RoundingStrategy) -> Decimal {
    let tick = tick_size();
    let rounded = (price / tick).round_dp_with_strategy(0, strategy) * tick;
    if rounded < tick {
        tick
    } else {
        rounded.normalize()
    }
}

/// Signed quantity as a Decimal
pub fn qty(value: i64) -> Decimal {
    Decimal::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_currency() {
        assert_eq!(floor_currency(Decimal::from_str_exact("12.99").unwrap()), Decimal::from(12));
        assert_eq!(floor_currency(Decimal::from(7)), Decimal::from(7));
    }

    #[test]
    fn test_round_money() {
        assert_eq!(
            round_money(Decimal::from_str_exact("10.005").unwrap()),
            Decimal::from_str_exact("10.01").unwrap()
        );
    }

    #[test]
    fn test_snap_to_tick() {
        let d = |s: &str| Decimal::from_str_exact(s).unwrap();
        assert_eq!(ceil_to_tick(d("100.12")), d("100.15"));
        assert_eq!(floor_to_tick(d("100.13")), d("100.1"));
        // on-grid prices stay put
        assert_eq!(ceil_to_tick(d("50.00")), Decimal::from(50));
        assert_eq!(floor_to_tick(d("50.00")), Decimal::from(50));
        assert_eq!(ceil_to_tick(d("50.0001")), d("50.05"));
        assert_eq!(floor_to_tick(d("49.9999")), d("49.95"));
    }

    #[test]
    fn test_never_below_one_tick() {
        assert_eq!(floor_to_tick(Decimal::from_str_exact("0.01").unwrap()), tick_size());
        assert_eq!(ceil_to_tick(Decimal::ZERO), tick_size());
    }

    #[test]
    fn test_tick_constant_matches() {
        assert_eq!(Decimal::from_str_exact(TICK_SIZE).unwrap(), tick_size());
    }
}
