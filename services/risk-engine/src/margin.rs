//! Margin and charges calculation
//!
//! Deterministic, no I/O. `required_margin = floor(turnover / leverage)` with
//! leverage picked by segment and product type, plus brokerage and statutory
//! charges on the turnover. All arithmetic is fixed-point Decimal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use types::instrument::{ProductType, Segment};
use types::numeric::{floor_currency, round_money};

/// Errors from margin calculation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarginError {
    #[error("Quantity must be positive")]
    NonPositiveQuantity,

    #[error("Price must be positive: {0}")]
    NonPositivePrice(String),

    #[error("Lot size must be positive")]
    ZeroLotSize,

    #[error("Quantity {quantity} is not a multiple of lot size {lot_size}")]
    NotLotMultiple { quantity: u32, lot_size: u32 },
}

// ── Leverage ─────────────────────────────────────────────────────────────

/// Built-in leverage by segment and product type
///
/// | Segment     | Product      | Leverage |
/// |-------------|--------------|----------|
/// | Equity      | Intraday     | 200x     |
/// | Equity      | Delivery/CF  | 50x      |
/// | Derivatives | any          | 100x     |
pub fn default_leverage(segment: Segment, product: ProductType) -> Decimal {
    match (segment, product) {
        (Segment::Equity, ProductType::Intraday) => Decimal::from(200),
        (Segment::Equity, _) => Decimal::from(50),
        (_, _) => Decimal::from(100),
    }
}

// ── Brokerage ────────────────────────────────────────────────────────────

/// Brokerage rule for one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrokerageRule {
    /// Lesser of `cap` and `percent` % of turnover
    PercentCapped { percent: Decimal, cap: Decimal },
    /// Flat fee per order
    Flat(Decimal),
}

impl BrokerageRule {
    pub fn charge(&self, turnover: Decimal) -> Decimal {
        match *self {
            BrokerageRule::PercentCapped { percent, cap } => {
                round_money((turnover * percent / Decimal::ONE_HUNDRED).min(cap))
            }
            BrokerageRule::Flat(fee) => fee,
        }
    }
}

/// Built-in brokerage: capped percentage on cash equity, flat on derivatives
pub fn default_brokerage(segment: Segment) -> BrokerageRule {
    match segment {
        Segment::Equity => BrokerageRule::PercentCapped {
            percent: Decimal::new(3, 2), // 0.03%
            cap: Decimal::from(20),
        },
        _ => BrokerageRule::Flat(Decimal::from(20)),
    }
}

// ── Statutory charges ────────────────────────────────────────────────────

/// Statutory rates in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatutoryRates {
    /// Securities/commodities transaction tax, % of turnover
    pub transaction_tax: Decimal,
    /// Exchange transaction fee, % of turnover
    pub exchange_fee: Decimal,
    /// Tax on brokerage plus exchange fee, %
    pub tax_on_tax: Decimal,
    /// Stamp duty, % of turnover
    pub stamp_duty: Decimal,
}

/// Built-in statutory rates per segment
pub fn default_statutory(segment: Segment) -> StatutoryRates {
    let gst = Decimal::from(18);
    match segment {
        Segment::Equity => StatutoryRates {
            transaction_tax: Decimal::new(25, 3),    // 0.025%
            exchange_fee: Decimal::new(345, 5),      // 0.00345%
            tax_on_tax: gst,
            stamp_duty: Decimal::new(3, 3),          // 0.003%
        },
        Segment::Futures => StatutoryRates {
            transaction_tax: Decimal::new(125, 4),   // 0.0125%
            exchange_fee: Decimal::new(2, 3),        // 0.002%
            tax_on_tax: gst,
            stamp_duty: Decimal::new(2, 3),          // 0.002%
        },
        Segment::Options => StatutoryRates {
            transaction_tax: Decimal::new(625, 4),   // 0.0625%
            exchange_fee: Decimal::new(53, 3),       // 0.053%
            tax_on_tax: gst,
            stamp_duty: Decimal::new(3, 3),          // 0.003%
        },
        Segment::Commodity => StatutoryRates {
            transaction_tax: Decimal::new(1, 2),     // 0.01%
            exchange_fee: Decimal::new(26, 4),       // 0.0026%
            tax_on_tax: gst,
            stamp_duty: Decimal::new(2, 3),          // 0.002%
        },
    }
}

// ── Configuration ────────────────────────────────────────────────────────

/// Margin calculator configuration: override tables take precedence over
/// the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarginConfig {
    pub leverage_overrides: HashMap<(Segment, ProductType), Decimal>,
    pub brokerage_overrides: HashMap<Segment, BrokerageRule>,
    pub statutory_overrides: HashMap<Segment, StatutoryRates>,
}

impl MarginConfig {
    /// Key for a leverage override, e.g. `margin.equity.intraday.leverage`
    pub fn leverage_key(segment: Segment, product: ProductType) -> String {
        format!("margin.{}.{}.leverage", segment.key(), product.key())
    }

    /// Key prefix for brokerage overrides, e.g. `brokerage.futures`
    pub fn brokerage_prefix(segment: Segment) -> String {
        format!("brokerage.{}", segment.key())
    }

    /// Environment variable carrying a setting key, e.g.
    /// `margin.equity.intraday.leverage` -> `MARGIN_EQUITY_INTRADAY_LEVERAGE`
    pub fn env_key(key: &str) -> String {
        key.replace('.', "_").to_ascii_uppercase()
    }

    /// Build overrides from a key/value lookup.
    ///
    /// Recognised keys:
    /// - `margin.<segment>.<product>.leverage`
    /// - `brokerage.<segment>.flat`
    /// - `brokerage.<segment>.percent` with optional `brokerage.<segment>.cap`
    ///
    /// Unparseable or non-positive values are ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = MarginConfig::default();
        let parse = |key: &str| -> Option<Decimal> {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<Decimal>().ok())
                .filter(|v| *v > Decimal::ZERO)
        };

        for segment in Segment::ALL {
            for product in ProductType::ALL {
                if let Some(lev) = parse(&Self::leverage_key(segment, product)) {
                    config.leverage_overrides.insert((segment, product), lev);
                }
            }

            let prefix = Self::brokerage_prefix(segment);
            if let Some(flat) = parse(&format!("{prefix}.flat")) {
                config.brokerage_overrides.insert(segment, BrokerageRule::Flat(flat));
            } else if let Some(percent) = parse(&format!("{prefix}.percent")) {
                let cap = parse(&format!("{prefix}.cap")).unwrap_or(Decimal::MAX);
                config
                    .brokerage_overrides
                    .insert(segment, BrokerageRule::PercentCapped { percent, cap });
            }
        }

        config
    }

    pub fn leverage(&self, segment: Segment, product: ProductType) -> Decimal {
        let key = if segment.is_derivative() {
            // derivatives are uniform across product types
            self.leverage_overrides
                .get(&(segment, product))
                .or_else(|| {
                    ProductType::ALL
                        .iter()
                        .find_map(|p| self.leverage_overrides.get(&(segment, *p)))
                })
        } else {
            self.leverage_overrides.get(&(segment, product))
        };
        key.copied()
            .unwrap_or_else(|| default_leverage(segment, product))
    }

    pub fn brokerage(&self, segment: Segment) -> BrokerageRule {
        self.brokerage_overrides
            .get(&segment)
            .copied()
            .unwrap_or_else(|| default_brokerage(segment))
    }

    pub fn statutory(&self, segment: Segment) -> StatutoryRates {
        self.statutory_overrides
            .get(&segment)
            .copied()
            .unwrap_or_else(|| default_statutory(segment))
    }
}

// ── Calculation ──────────────────────────────────────────────────────────

/// Result of a margin calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginBreakdown {
    pub turnover: Decimal,
    pub leverage: Decimal,
    pub required_margin: Decimal,
    pub brokerage: Decimal,
    pub statutory_charges: Decimal,
    /// brokerage + statutory_charges
    pub total_charges: Decimal,
}

/// Margin calculator
#[derive(Debug, Clone, Default)]
pub struct MarginCalculator {
    config: MarginConfig,
}

impl MarginCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MarginConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MarginConfig {
        &self.config
    }

    /// Required margin and charges for `quantity` units at `price`
    pub fn calculate(
        &self,
        segment: Segment,
        product: ProductType,
        quantity: u32,
        price: Decimal,
        lot_size: u32,
    ) -> Result<MarginBreakdown, MarginError> {
        if quantity == 0 {
            return Err(MarginError::NonPositiveQuantity);
        }
        if price <= Decimal::ZERO {
            return Err(MarginError::NonPositivePrice(price.to_string()));
        }
        if lot_size == 0 {
            return Err(MarginError::ZeroLotSize);
        }
        if quantity % lot_size != 0 {
            return Err(MarginError::NotLotMultiple { quantity, lot_size });
        }

        let turnover = Decimal::from(quantity) * price;
        let leverage = self.config.leverage(segment, product);
        let required_margin = floor_currency(turnover / leverage);

        let brokerage = self.config.brokerage(segment).charge(turnover);
        let statutory_charges = statutory_charges(self.config.statutory(segment), turnover, brokerage);

        Ok(MarginBreakdown {
            turnover,
            leverage,
            required_margin,
            brokerage,
            statutory_charges,
            total_charges: brokerage + statutory_charges,
        })
    }
}

/// Sum of statutory components, floored to the currency unit
pub fn statutory_charges(rates: StatutoryRates, turnover: Decimal, brokerage: Decimal) -> Decimal {
    let pct = |rate: Decimal, base: Decimal| base * rate / Decimal::ONE_HUNDRED;

    let transaction_tax = pct(rates.transaction_tax, turnover);
    let exchange_fee = pct(rates.exchange_fee, turnover);
    let tax_on_tax = pct(rates.tax_on_tax, brokerage + exchange_fee);
    let stamp_duty = pct(rates.stamp_duty, turnover);

    floor_currency(transaction_tax + exchange_fee + tax_on_tax + stamp_duty)
}

// ── Tests ────────────────────────────────────────────────────────────────
