//! Risk alert construction
//!
//! Builds the alert rows the risk monitor records and publishes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use types::ids::AccountId;
use types::risk::{AlertType, RiskAlert, Severity};

fn as_percent(ratio: Decimal) -> Decimal {
    (ratio * Decimal::ONE_HUNDRED).round_dp(2)
}

/// HIGH alert for an account in the warning band
pub fn margin_warning(
    account_id: AccountId,
    utilization: Decimal,
    threshold: Decimal,
    timestamp: DateTime<Utc>,
) -> RiskAlert {
    RiskAlert::new(
        account_id,
        AlertType::MarginWarning,
        Severity::HIGH,
        format!(
            "Loss utilization at {}% (warning threshold {}%)",
            as_percent(utilization),
            as_percent(threshold)
        ),
        timestamp,
    )
}

/// CRITICAL alert summarising an auto-close run
pub fn auto_close(
    account_id: AccountId,
    positions_closed: usize,
    total_loss: Decimal,
    utilization: Decimal,
    timestamp: DateTime<Utc>,
) -> RiskAlert {
    RiskAlert::new(
        account_id,
        AlertType::AutoClose,
        Severity::CRITICAL,
        format!(
            "Auto-closed {} position(s) with total loss {} at loss utilization {}%",
            positions_closed,
            total_loss.round_dp(2),
            as_percent(utilization)
        ),
        timestamp,
    )
}
