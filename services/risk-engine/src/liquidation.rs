//! Health classification and auto-close ordering
//!
//! Deterministic pieces of the risk backstop: which band an account's loss
//! utilization falls into, and in what order its positions may be closed.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use types::position::Position;

use crate::thresholds::RiskThresholds;

// ── Health levels ────────────────────────────────────────────────────────

/// Account health classification by loss utilization
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthLevel {
    /// utilization < warning
    Healthy,
    /// warning <= utilization < auto_close: alert only
    Warning,
    /// utilization >= auto_close: close losing positions
    AutoClose,
}

/// Classify loss utilization against the thresholds
pub fn health_status(utilization: Decimal, thresholds: &RiskThresholds) -> HealthLevel {
    if utilization >= thresholds.auto_close {
        HealthLevel::AutoClose
    } else if utilization >= thresholds.warning {
        HealthLevel::Warning
    } else {
        HealthLevel::Healthy
    }
}

/// Whether closing should continue at this utilization
pub fn should_auto_close(utilization: Decimal, thresholds: &RiskThresholds) -> bool {
    utilization >= thresholds.auto_close
}

// ── Close ordering ───────────────────────────────────────────────────────

/// Open losing positions, worst loss first.
///
/// Profitable and flat positions are never candidates. Ties break on
/// `opened_at` so the order is stable between sweeps.
pub fn auto_close_candidates(positions: &[Position]) -> Vec<&Position> {
    let mut losers: Vec<&Position> = positions
        .iter()
        .filter(|p| p.is_open() && p.unrealized_pnl < Decimal::ZERO)
        .collect();

    losers.sort_by(|a, b| match a.unrealized_pnl.cmp(&b.unrealized_pnl) {
        Ordering::Equal => a.opened_at.cmp(&b.opened_at),
        other => other,
    });
    losers
}
