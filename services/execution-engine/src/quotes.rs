//! Quote lookup collaborator
//!
//! The engine only needs "last traded price for an instrument, or a
//! failure". Failures never abort a batch: the worker falls back to the
//! stored price and the valuation skips the instrument.

use persistence::Database;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use types::ids::InstrumentRef;
use types::instrument::Instrument;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuoteError {
    #[error("No quote for {0}")]
    NotFound(String),

    #[error("Quote source unavailable: {0}")]
    Unavailable(String),
}

/// Source of last traded prices
pub trait QuoteSource: Send + Sync {
    fn last_price(&self, instrument: &InstrumentRef) -> Result<Decimal, QuoteError>;
}

/// In-memory quotes, settable at runtime
#[derive(Debug, Default)]
pub struct StaticQuotes {
    prices: RwLock<HashMap<InstrumentRef, Result<Decimal, QuoteError>>>,
}

impl StaticQuotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, instrument: impl Into<InstrumentRef>, price: Decimal) {
        self.write().insert(instrument.into(), Ok(price));
    }

    /// Make lookups for `instrument` fail with `error`
    pub fn fail(&self, instrument: impl Into<InstrumentRef>, error: QuoteError) {
        self.write().insert(instrument.into(), Err(error));
    }

    pub fn remove(&self, instrument: &InstrumentRef) {
        self.write().remove(instrument);
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<InstrumentRef, Result<Decimal, QuoteError>>> {
        self.prices.write().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl QuoteSource for StaticQuotes {
    fn last_price(&self, instrument: &InstrumentRef) -> Result<Decimal, QuoteError> {
        let prices = self.prices.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        prices
            .get(instrument)
            .cloned()
            .unwrap_or_else(|| Err(QuoteError::NotFound(instrument.to_string())))
    }
}

/// Quotes served from the instruments table's stored last price
#[derive(Debug, Clone)]
pub struct StoredQuotes {
    db: Database,
}

impl StoredQuotes {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl QuoteSource for StoredQuotes {
    fn last_price(&self, instrument: &InstrumentRef) -> Result<Decimal, QuoteError> {
        self.db
            .get::<Instrument>(instrument)
            .and_then(|i| i.last_known_price())
            .ok_or_else(|| QuoteError::NotFound(instrument.to_string()))
    }
}
