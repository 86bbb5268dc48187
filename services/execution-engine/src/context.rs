//! Shared engine handle
//!
//! Everything the worker, the monitor and the operator surface need:
//! the store, the risk rules, and the two outside collaborators.

use persistence::Database;
use risk_engine::{MarginBreakdown, MarginError, RiskEngine};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use types::instrument::{ProductType, Segment};

use crate::notify::{Notification, Notifier};
use crate::quotes::QuoteSource;
use crate::settings::{SettingsCache, DEFAULT_MAX_AGE};

pub struct EngineContext {
    pub db: Database,
    pub risk: RiskEngine,
    pub quotes: Arc<dyn QuoteSource>,
    pub notifier: Arc<dyn Notifier>,
    pub settings: SettingsCache,
}

impl fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineContext")
            .field("db", &self.db)
            .field("risk", &self.risk)
            .field("settings", &self.settings)
            .finish()
    }
}

impl EngineContext {
    /// Context reading settings through the process environment
    pub fn new(db: Database, quotes: Arc<dyn QuoteSource>, notifier: Arc<dyn Notifier>) -> Self {
        let settings = SettingsCache::new(db.clone(), DEFAULT_MAX_AGE);
        Self {
            db,
            risk: RiskEngine::new(),
            quotes,
            notifier,
            settings,
        }
    }

    pub fn with_settings(mut self, settings: SettingsCache) -> Self {
        self.settings = settings;
        self
    }

    /// Margin and charges for an order under the current overrides
    pub fn compute_order_margin(
        &self,
        segment: Segment,
        product: ProductType,
        quantity: u32,
        price: Decimal,
        lot_size: u32,
    ) -> Result<MarginBreakdown, MarginError> {
        self.settings
            .margin_calculator()
            .calculate(segment, product, quantity, price, lot_size)
    }

    /// Publish a notification; failures are logged and dropped
    pub fn publish(&self, notification: Notification) {
        if let Err(e) = self.notifier.publish(notification) {
            warn!(error = %e, "Notification failed");
        }
    }
}
