//! Risk Monitor
//!
//! Periodic sweep over every account with an open position. Each account
//! is checked in one transaction under the advisory lock
//! `account-risk:<id>`; a contended lock skips the account for this sweep.
//!
//! Auto-close runs worst loss first and re-checks utilization after every
//! close, so it stops as soon as the account is back under the threshold.

use chrono::{Duration as ChronoDuration, Utc};
use persistence::Transaction;
use risk_engine::exposure;
use risk_engine::liquidation::{auto_close_candidates, should_auto_close};
use risk_engine::{events, HealthLevel, RiskThresholds};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use types::account::TradingAccount;
use types::errors::AccountError;
use types::ids::{AccountId, PositionId};
use types::position::Position;
use types::risk::{AlertType, RiskAlert};

use crate::close::{close_position, CloseReason};
use crate::context::EngineContext;
use crate::error::Result;
use crate::ledger::account_lock_key;
use crate::notify::Notification;
use crate::positions;

/// Advisory-lock key guarding one account's risk check
pub fn risk_lock_key(account_id: AccountId) -> String {
    format!("account-risk:{account_id}")
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// An unresolved alert younger than this suppresses a repeat of the same type
    pub alert_cooldown: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            alert_cooldown: Duration::from_secs(15 * 60),
        }
    }
}

/// What one account check did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AccountCheck {
    Skipped,
    Healthy,
    Warned,
    WarningSuppressed,
    AutoClosed {
        positions_closed: usize,
        total_loss: Decimal,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub accounts_checked: usize,
    pub warnings: usize,
    pub warnings_suppressed: usize,
    pub auto_closures: usize,
    pub positions_closed: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl SweepReport {
    fn record(&mut self, check: &AccountCheck) {
        match check {
            AccountCheck::Skipped => {
                self.skipped += 1;
                return;
            }
            AccountCheck::Healthy => {}
            AccountCheck::Warned => self.warnings += 1,
            AccountCheck::WarningSuppressed => self.warnings_suppressed += 1,
            AccountCheck::AutoClosed { positions_closed, .. } => {
                self.auto_closures += 1;
                self.positions_closed += positions_closed;
            }
        }
        self.accounts_checked += 1;
    }
}

#[derive(Clone)]
pub struct RiskMonitor {
    ctx: Arc<EngineContext>,
    config: MonitorConfig,
}

impl RiskMonitor {
    pub fn new(ctx: Arc<EngineContext>, config: MonitorConfig) -> Self {
        Self { ctx, config }
    }

    /// Check every account that holds an open position
    pub fn run_sweep(&self) -> SweepReport {
        let thresholds = self.ctx.settings.thresholds();
        let mut report = SweepReport::default();

        for account_id in positions::accounts_with_open_positions(&self.ctx.db) {
            match self.check_account(account_id, &thresholds) {
                Ok(check) => report.record(&check),
                Err(e) => {
                    error!(account_id = %account_id, error = %e, "Risk check failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            accounts = report.accounts_checked,
            warnings = report.warnings,
            auto_closures = report.auto_closures,
            positions_closed = report.positions_closed,
            skipped = report.skipped,
            errors = report.errors,
            "Risk sweep finished"
        );
        report
    }

    /// Evaluate one account, closing positions if it is over the auto-close
    /// threshold.
    pub fn check_account(&self, account_id: AccountId, thresholds: &RiskThresholds) -> Result<AccountCheck> {
        let mut txn = self.ctx.db.begin();
        if !txn.try_advisory_lock(&risk_lock_key(account_id)) {
            debug!(account_id = %account_id, "Risk check running elsewhere");
            return Ok(AccountCheck::Skipped);
        }
        txn.lock_row(&account_lock_key(account_id))?;

        let account = load_account(&mut txn, account_id)?;
        let valuation = positions::calculate_unrealized_pnl(&mut txn, account_id, self.ctx.quotes.as_ref());
        if !valuation.skipped.is_empty() {
            warn!(
                account_id = %account_id,
                skipped = valuation.skipped.len(),
                "Some positions could not be priced"
            );
        }
        let assessment = self.ctx.risk.assess(&account, valuation.total_unrealized_pnl, thresholds);
        debug!(
            account_id = %account_id,
            unrealized = %assessment.total_unrealized_pnl,
            utilization = %assessment.utilization,
            "Account assessed"
        );

        let (check, alert) = match assessment.level {
            HealthLevel::Healthy => (AccountCheck::Healthy, None),
            HealthLevel::Warning => {
                if self.recently_alerted(&mut txn, account_id, AlertType::MarginWarning) {
                    (AccountCheck::WarningSuppressed, None)
                } else {
                    let alert = self
                        .ctx
                        .risk
                        .warning_alert(&account, &assessment, thresholds, Utc::now());
                    (AccountCheck::Warned, alert)
                }
            }
            HealthLevel::AutoClose => self.auto_close(
                &mut txn,
                account_id,
                valuation.marked,
                assessment.utilization,
                thresholds,
            )?,
        };

        if let Some(alert) = &alert {
            txn.put(alert.clone());
        }
        // Marks are staged even for healthy accounts
        txn.commit()?;

        if let Some(alert) = alert {
            warn!(
                account_id = %account_id,
                alert_type = ?alert.alert_type,
                severity = ?alert.severity,
                message = %alert.message,
                "Risk alert raised"
            );
            self.ctx.publish(Notification::RiskAlert {
                user_id: account.user_id,
                alert,
            });
        }
        Ok(check)
    }

    fn auto_close(
        &self,
        txn: &mut Transaction,
        account_id: AccountId,
        marked: Vec<Position>,
        initial_utilization: Decimal,
        thresholds: &RiskThresholds,
    ) -> Result<(AccountCheck, Option<RiskAlert>)> {
        let order: Vec<PositionId> = auto_close_candidates(&marked)
            .into_iter()
            .map(|p| p.position_id)
            .collect();
        let mut remaining = marked;
        let mut closed = 0usize;
        let mut total_loss = Decimal::ZERO;

        for position_id in order {
            let account = load_account(txn, account_id)?;
            let utilization = exposure::loss_utilization(
                exposure::total_unrealized_pnl(&remaining),
                account.available_margin,
                account.balance,
            );
            if !should_auto_close(utilization, thresholds) {
                break;
            }

            let outcome = close_position(&self.ctx, txn, position_id, CloseReason::AutoClose)?;
            remaining.retain(|p| p.position_id != position_id);
            closed += 1;
            total_loss -= outcome.realized_pnl;
        }

        if closed == 0 {
            warn!(account_id = %account_id, "Over auto-close threshold with no losing position to close");
            return Ok((AccountCheck::Healthy, None));
        }

        let account = load_account(txn, account_id)?;
        let after = exposure::loss_utilization(
            exposure::total_unrealized_pnl(&remaining),
            account.available_margin,
            account.balance,
        );
        info!(
            account_id = %account_id,
            closed,
            total_loss = %total_loss,
            utilization_before = %initial_utilization,
            utilization_after = %after,
            "Auto-close finished"
        );
        let alert = events::auto_close(account_id, closed, total_loss, initial_utilization, Utc::now());
        Ok((
            AccountCheck::AutoClosed {
                positions_closed: closed,
                total_loss,
            },
            Some(alert),
        ))
    }

    fn recently_alerted(&self, txn: &mut Transaction, account_id: AccountId, alert_type: AlertType) -> bool {
        let now = Utc::now();
        let cooldown = ChronoDuration::from_std(self.config.alert_cooldown).unwrap_or_else(|_| ChronoDuration::zero());
        txn.scan::<RiskAlert>(|a| a.account_id == account_id && a.alert_type == alert_type)
            .iter()
            .any(|a| a.suppresses_repeat(now, cooldown))
    }
}

fn load_account(txn: &mut Transaction, account_id: AccountId) -> Result<TradingAccount> {
    txn.get::<TradingAccount>(&account_id).ok_or_else(|| {
        AccountError::NotFound {
            account_id: account_id.to_string(),
        }
        .into()
    })
}
