//! Operator surface
//!
//! Manual actions outside the schedule: close one position, run a sweep
//! now, read or change the risk thresholds, resolve an alert.

use chrono::Utc;
use risk_engine::RiskThresholds;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use types::errors::PositionError;
use types::ids::{AlertId, PositionId};
use types::position::Position;
use types::risk::RiskAlert;

use crate::close::{self, CloseOutcome, CloseReason};
use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::monitor::{risk_lock_key, RiskMonitor, SweepReport};

pub struct Operator {
    ctx: Arc<EngineContext>,
    monitor: RiskMonitor,
}

impl Operator {
    pub fn new(ctx: Arc<EngineContext>, monitor: RiskMonitor) -> Self {
        Self { ctx, monitor }
    }

    /// Close a position now. Refused while the account's risk check runs.
    pub fn close_position(&self, position_id: PositionId) -> Result<CloseOutcome> {
        let account_id = self
            .ctx
            .db
            .get::<Position>(&position_id)
            .map(|p| p.account_id)
            .ok_or_else(|| PositionError::NotFound {
                position_id: position_id.to_string(),
            })?;

        let mut txn = self.ctx.db.begin();
        let key = risk_lock_key(account_id);
        if !txn.try_advisory_lock(&key) {
            return Err(EngineError::Busy(key));
        }
        let outcome = close::close_position(&self.ctx, &mut txn, position_id, CloseReason::Manual)?;
        txn.commit()?;
        Ok(outcome)
    }

    pub fn run_sweep(&self) -> SweepReport {
        self.monitor.run_sweep()
    }

    pub fn thresholds(&self) -> RiskThresholds {
        self.ctx.settings.thresholds()
    }

    /// Store new thresholds. Percent-style inputs are accepted; auto-close
    /// is raised to the warning level if set below it.
    pub fn set_thresholds(&self, warning: Decimal, auto_close: Decimal) -> Result<RiskThresholds> {
        let thresholds = RiskThresholds::new(warning, auto_close)
            .ok_or_else(|| EngineError::InvalidThresholds {
                warning: warning.to_string(),
                auto_close: auto_close.to_string(),
            })?;
        self.ctx.settings.store_thresholds(thresholds)?;
        Ok(thresholds)
    }

    /// Mark an alert resolved so it no longer suppresses new ones
    pub fn resolve_alert(&self, alert_id: AlertId) -> Result<RiskAlert> {
        let mut txn = self.ctx.db.begin();
        let mut alert = txn
            .get::<RiskAlert>(&alert_id)
            .ok_or_else(|| EngineError::AlertNotFound(alert_id.to_string()))?;
        alert.resolve(Utc::now());
        txn.put(alert.clone());
        txn.commit()?;
        info!(alert_id = %alert_id, account_id = %alert.account_id, "Alert resolved");
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger;
    use crate::monitor::MonitorConfig;
    use crate::notify::ChannelNotifier;
    use crate::positions;
    use crate::quotes::StaticQuotes;
    use crate::settings::SettingsCache;
    use persistence::Database;
    use types::ids::{AccountId, InstrumentRef, UserId};
    use types::instrument::{Instrument, ProductType, Segment};
    use types::risk::{AlertType, Severity};

    fn operator() -> (Operator, Arc<EngineContext>, Arc<StaticQuotes>) {
        let db = Database::in_memory();
        let quotes = Arc::new(StaticQuotes::new());
        let (notifier, _rx) = ChannelNotifier::new();
        let settings = SettingsCache::with_env(db.clone(), std::time::Duration::from_secs(60), |_| None);
        let ctx = Arc::new(EngineContext::new(db, quotes.clone(), Arc::new(notifier)).with_settings(settings));
        let monitor = RiskMonitor::new(ctx.clone(), MonitorConfig::default());
        (Operator::new(ctx.clone(), monitor), ctx, quotes)
    }

    fn holding(ctx: &EngineContext) -> (AccountId, PositionId) {
        let mut txn = ctx.db.begin();
        txn.put(Instrument::new("NSE:SBIN", "SBIN", Segment::Equity, 1, Decimal::from(100)));
        let account = ledger::open_account(&mut txn, UserId::new(), Decimal::from(1_000)).unwrap();
        let out = positions::upsert(
            &mut txn,
            account.account_id,
            &InstrumentRef::new("NSE:SBIN"),
            ProductType::Delivery,
            5,
            Decimal::from(100),
            Utc::now(),
        )
        .unwrap();
        txn.commit().unwrap();
        (account.account_id, out.position.position_id)
    }

    #[test]
    fn test_manual_close() {
        let (op, ctx, quotes) = operator();
        let (_, position_id) = holding(&ctx);
        quotes.set("NSE:SBIN", Decimal::from(120));

        let out = op.close_position(position_id).unwrap();
        assert_eq!(out.realized_pnl, Decimal::from(100));
        assert!(!ctx.db.get::<Position>(&position_id).unwrap().is_open());
    }

    #[test]
    fn test_manual_close_refused_during_risk_check() {
        let (op, ctx, _) = operator();
        let (account_id, position_id) = holding(&ctx);
        let holder = ctx.db.begin();
        assert!(holder.try_advisory_lock(&risk_lock_key(account_id)));

        assert!(matches!(op.close_position(position_id), Err(EngineError::Busy(_))));
        assert!(ctx.db.get::<Position>(&position_id).unwrap().is_open());
    }

    #[test]
    fn test_set_thresholds_accepts_percent() {
        let (op, _, _) = operator();
        let t = op.set_thresholds(Decimal::from(70), Decimal::from(85)).unwrap();
        assert_eq!(t.warning, Decimal::new(70, 2));
        assert_eq!(op.thresholds(), t);
    }

    #[test]
    fn test_set_thresholds_rejects_out_of_range() {
        let (op, _, _) = operator();
        let err = op.set_thresholds(Decimal::from(150), Decimal::from(90)).unwrap_err();
        assert!(matches!(err, EngineError::InvalidThresholds { .. }));
        assert_eq!(op.thresholds(), RiskThresholds::default());
    }

    #[test]
    fn test_resolve_alert() {
        let (op, ctx, _) = operator();
        let alert = RiskAlert::new(AccountId::new(), AlertType::MarginWarning, Severity::HIGH, "x", Utc::now());
        let mut txn = ctx.db.begin();
        txn.put(alert.clone());
        txn.commit().unwrap();

        let resolved = op.resolve_alert(alert.alert_id).unwrap();
        assert!(resolved.resolved);
        assert!(matches!(op.resolve_alert(AlertId::new()), Err(EngineError::AlertNotFound(_))));
    }
}
