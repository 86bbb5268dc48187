//! Instruments, market segments and product types

use crate::ids::InstrumentRef;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Market segment an instrument trades in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Segment {
    /// Cash equity
    Equity,
    /// Index and stock futures
    Futures,
    /// Index and stock options
    Options,
    /// Commodity derivatives
    Commodity,
}

impl Segment {
    pub const ALL: [Segment; 4] = [
        Segment::Equity,
        Segment::Futures,
        Segment::Options,
        Segment::Commodity,
    ];

    /// Derivative segments share one leverage regardless of product type
    pub fn is_derivative(&self) -> bool {
        !matches!(self, Segment::Equity)
    }

    /// Lower-case key used in configuration entries
    pub fn key(&self) -> &'static str {
        match self {
            Segment::Equity => "equity",
            Segment::Futures => "futures",
            Segment::Options => "options",
            Segment::Commodity => "commodity",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Segment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equity" | "cash" | "nse" | "bse" => Ok(Segment::Equity),
            "futures" | "fut" => Ok(Segment::Futures),
            "options" | "opt" => Ok(Segment::Options),
            "commodity" | "mcx" => Ok(Segment::Commodity),
            other => Err(format!("unknown segment: {other}")),
        }
    }
}

/// How long a position is meant to be held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    /// Squared off the same day (MIS)
    Intraday,
    /// Cash-and-carry equity holding (CNC)
    Delivery,
    /// Overnight derivative position (NRML)
    Carryforward,
}

impl ProductType {
    pub const ALL: [ProductType; 3] = [
        ProductType::Intraday,
        ProductType::Delivery,
        ProductType::Carryforward,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ProductType::Intraday => "intraday",
            ProductType::Delivery => "delivery",
            ProductType::Carryforward => "carryforward",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Tradable instrument with its last-known price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub instrument_ref: InstrumentRef,
    pub symbol: String,
    pub segment: Segment,
    pub lot_size: u32,
    /// Last traded price seen by the platform; zero when never priced
    pub last_price: Decimal,
}

impl Instrument {
    pub fn new(
        instrument_ref: impl Into<InstrumentRef>,
        symbol: impl Into<String>,
        segment: Segment,
        lot_size: u32,
        last_price: Decimal,
    ) -> Self {
        Self {
            instrument_ref: instrument_ref.into(),
            symbol: symbol.into(),
            segment,
            lot_size,
            last_price,
        }
    }

    /// Stored price usable as an execution fallback
    pub fn last_known_price(&self) -> Option<Decimal> {
        (self.last_price > Decimal::ZERO).then_some(self.last_price)
    }
}
