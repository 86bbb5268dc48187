//! Risk Engine: orchestrator
//!
//! Ties together margin, realism, exposure, health classification and
//! alert construction behind one handle the execution engine holds.

use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use types::account::TradingAccount;
use types::instrument::{ProductType, Segment};
use types::order::Side;
use types::risk::RiskAlert;

use crate::events;
use crate::exposure;
use crate::liquidation::{self, HealthLevel};
use crate::margin::{MarginBreakdown, MarginCalculator, MarginConfig, MarginError};
use crate::realism::{MarketRealism, RealismConfig, RealisticPrice};
use crate::thresholds::RiskThresholds;

/// Risk engine configuration
#[derive(Debug, Clone, Default)]
pub struct RiskEngineConfig {
    pub margin: MarginConfig,
    pub realism: RealismConfig,
}

/// Outcome of evaluating one account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub total_unrealized_pnl: Decimal,
    pub utilization: Decimal,
    pub level: HealthLevel,
}

/// Risk engine service
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    calculator: MarginCalculator,
    realism: MarketRealism,
}

impl RiskEngine {
    /// Create a new risk engine with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new risk engine with custom configuration
    pub fn with_config(config: RiskEngineConfig) -> Self {
        Self {
            calculator: MarginCalculator::with_config(config.margin),
            realism: MarketRealism::with_config(config.realism),
        }
    }

    pub fn calculator(&self) -> &MarginCalculator {
        &self.calculator
    }

    pub fn realism(&self) -> &MarketRealism {
        &self.realism
    }

    /// Margin and charges for an order.
    pub fn compute_order_margin(
        &self,
        segment: Segment,
        product: ProductType,
        quantity: u32,
        price: Decimal,
        lot_size: u32,
    ) -> Result<MarginBreakdown, MarginError> {
        self.calculator.calculate(segment, product, quantity, price, lot_size)
    }

    /// Simulated execution price for an order.
    pub fn price_order<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        base_price: Decimal,
        side: Side,
        segment: Segment,
        quantity: u32,
        lot_size: u32,
    ) -> RealisticPrice {
        self.realism.apply(rng, base_price, side, segment, quantity, lot_size)
    }

    /// Evaluate an account's loss utilization against the thresholds.
    pub fn assess(
        &self,
        account: &TradingAccount,
        total_unrealized_pnl: Decimal,
        thresholds: &RiskThresholds,
    ) -> Assessment {
        let utilization = exposure::loss_utilization(
            total_unrealized_pnl,
            account.available_margin,
            account.balance,
        );
        Assessment {
            total_unrealized_pnl,
            utilization,
            level: liquidation::health_status(utilization, thresholds),
        }
    }

    /// Alert for a warning-band assessment, `None` otherwise.
    pub fn warning_alert(
        &self,
        account: &TradingAccount,
        assessment: &Assessment,
        thresholds: &RiskThresholds,
        timestamp: DateTime<Utc>,
    ) -> Option<RiskAlert> {
        (assessment.level == HealthLevel::Warning).then(|| {
            events::margin_warning(
                account.account_id,
                assessment.utilization,
                thresholds.warning,
                timestamp,
            )
        })
    }
}
