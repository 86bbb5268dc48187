//! Order Execution Worker
//!
//! Claims pending orders and settles each in its own transaction under the
//! advisory lock `order:<id>`. Any number of workers may run the same batch:
//! the lock plus the PENDING re-check make each order settle once.
//!
//! A failure after the lock is taken rolls the transaction back and runs a
//! second, compensating transaction that cancels the order and returns
//! what submission reserved.

use chrono::Utc;
use persistence::Transaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use types::account::TradingAccount;
use types::ids::{OrderId, UserId};
use types::instrument::Instrument;
use types::ledger::EntryType;
use types::order::{CancelReason, Order};

use crate::context::EngineContext;
use crate::error::{EngineError, Result};
use crate::ledger::{self, EntryContext};
use crate::notify::Notification;
use crate::positions;

/// Advisory-lock key claiming one order
pub fn order_lock_key(order_id: OrderId) -> String {
    format!("order:{order_id}")
}

/// Runs after the fill has been staged and before commit. An error aborts
/// the settlement and triggers compensation.
pub trait ExecutionHook: Send + Sync {
    fn before_commit(&self, order: &Order) -> std::result::Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Most orders claimed per batch
    pub batch_size: usize,
    /// Orders younger than this are left for a later batch
    pub min_age: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            min_age: Duration::ZERO,
        }
    }
}

/// What happened to one order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderOutcome {
    Executed,
    /// Cancelled before any fill was staged
    Cancelled(CancelReason),
    /// Locked elsewhere, or no longer pending
    Skipped,
    /// Settlement failed; the order was cancelled and its funds returned
    Compensated,
    /// Settlement and compensation both failed; the order is still pending
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub executed: usize,
    pub cancelled: usize,
    pub skipped: usize,
    /// Compensated or unrecoverable failures
    pub failed: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: OrderOutcome) {
        match outcome {
            OrderOutcome::Executed => self.executed += 1,
            OrderOutcome::Cancelled(_) => self.cancelled += 1,
            OrderOutcome::Skipped => self.skipped += 1,
            OrderOutcome::Compensated | OrderOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.executed + self.cancelled + self.skipped + self.failed
    }
}

enum Settled {
    Skipped,
    Cancelled(CancelReason),
    Executed {
        order: Order,
        symbol: String,
        user_id: Option<UserId>,
    },
}

pub struct ExecutionWorker {
    ctx: Arc<EngineContext>,
    config: WorkerConfig,
    hook: Option<Arc<dyn ExecutionHook>>,
}

impl ExecutionWorker {
    pub fn new(ctx: Arc<EngineContext>, config: WorkerConfig) -> Self {
        Self {
            ctx,
            config,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn ExecutionHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Oldest pending orders, at most `batch_size`
    pub fn pending_orders(&self) -> Vec<OrderId> {
        let min_age = chrono::Duration::from_std(self.config.min_age).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - min_age;
        let mut pending = self
            .ctx
            .db
            .scan::<Order>(|o| o.is_pending() && o.created_at <= cutoff);
        pending.sort_by_key(|o| (o.created_at, o.order_id));
        pending
            .into_iter()
            .take(self.config.batch_size)
            .map(|o| o.order_id)
            .collect()
    }

    /// Settle one batch. A failing order never stops the others.
    pub fn process_batch(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for order_id in self.pending_orders() {
            report.record(self.process_order(order_id));
        }
        if report.total() > 0 {
            info!(
                executed = report.executed,
                cancelled = report.cancelled,
                skipped = report.skipped,
                failed = report.failed,
                "Execution batch finished"
            );
        }
        report
    }

    /// Settle one order
    pub fn process_order(&self, order_id: OrderId) -> OrderOutcome {
        let mut txn = self.ctx.db.begin();
        if !txn.try_advisory_lock(&order_lock_key(order_id)) {
            debug!(order_id = %order_id, "Order claimed elsewhere");
            return OrderOutcome::Skipped;
        }

        match self.settle(&mut txn, order_id) {
            Ok(Settled::Skipped) => {
                txn.rollback();
                OrderOutcome::Skipped
            }
            Ok(settled) => match txn.commit() {
                Ok(_) => self.after_commit(order_id, settled),
                Err(e) => self.compensate(order_id, &e.into()),
            },
            Err(e) => {
                txn.rollback();
                self.compensate(order_id, &e)
            }
        }
    }

    fn settle(&self, txn: &mut Transaction, order_id: OrderId) -> Result<Settled> {
        let Some(mut order) = txn.get::<Order>(&order_id) else {
            return Ok(Settled::Skipped);
        };
        if !order.is_pending() {
            return Ok(Settled::Skipped);
        }

        let instrument = if order.instrument_ref.is_valid() {
            txn.get::<Instrument>(&order.instrument_ref)
        } else {
            None
        };
        let Some(instrument) = instrument else {
            return self.cancel(txn, order, CancelReason::MissingInstrument);
        };
        let Some(price) = self.execution_price(&order, &instrument) else {
            return self.cancel(txn, order, CancelReason::InvalidPrice);
        };

        let now = Utc::now();
        let filled = positions::upsert(
            txn,
            order.account_id,
            &order.instrument_ref,
            order.product_type,
            order.signed_quantity(),
            price,
            now,
        )?;
        let effect = filled.effect;
        let mut position = filled.position;
        let position_id = position.position_id;

        // Margin for units that closed existing exposure comes back from the
        // reduced row; margin for units that opened exposure moves onto the
        // row now holding it.
        let (from_position, reduced_id) = match filled.booked {
            Some(mut booked) => {
                let share = booked.release_margin_for(effect.closed_quantity, effect.previous_quantity);
                let id = booked.position_id;
                txn.put(booked);
                (share, id)
            }
            None => (position.release_margin_for(effect.closed_quantity, effect.previous_quantity), position_id),
        };
        let quantity = i64::from(order.quantity);
        let from_order = if effect.closed_quantity >= quantity {
            order.blocked_margin
        } else {
            (order.blocked_margin * Decimal::from(effect.closed_quantity) / Decimal::from(quantity)).round_dp(2)
        };
        position.blocked_margin += order.blocked_margin - from_order;
        txn.put(position);

        let release = from_position + from_order;
        if release > Decimal::ZERO {
            ledger::release_margin(
                txn,
                order.account_id,
                release,
                EntryContext::new(format!("Margin released on {} fill", instrument.symbol))
                    .order(order_id)
                    .position(reduced_id),
            )?;
        }
        if !effect.realized_pnl.is_zero() {
            ledger::settle_pnl(
                txn,
                order.account_id,
                effect.realized_pnl,
                EntryContext::new(format!("Realized P&L on {}", instrument.symbol))
                    .order(order_id)
                    .position(reduced_id),
            )?;
        }

        order.mark_executed(price, position_id, now)?;
        txn.put(order.clone());

        if let Some(hook) = &self.hook {
            hook.before_commit(&order).map_err(EngineError::Aborted)?;
        }

        let user_id = txn.get::<TradingAccount>(&order.account_id).map(|a| a.user_id);
        Ok(Settled::Executed {
            order,
            symbol: instrument.symbol,
            user_id,
        })
    }

    /// Recorded fill or limit price, then the live quote, then the stored price
    fn execution_price(&self, order: &Order, instrument: &Instrument) -> Option<Decimal> {
        if let Some(price) = order.recorded_price() {
            return Some(price);
        }
        match self.ctx.quotes.last_price(&order.instrument_ref) {
            Ok(price) if price > Decimal::ZERO => return Some(price),
            Ok(_) => {}
            Err(e) => warn!(order_id = %order.order_id, error = %e, "Quote failed; using stored price"),
        }
        instrument.last_known_price()
    }

    fn cancel(&self, txn: &mut Transaction, mut order: Order, reason: CancelReason) -> Result<Settled> {
        order.mark_cancelled(reason, Utc::now())?;
        self.return_reservation(txn, &order)?;
        txn.put(order);
        Ok(Settled::Cancelled(reason))
    }

    /// Release the order's reserved margin and refund its charges
    fn return_reservation(&self, txn: &mut Transaction, order: &Order) -> Result<()> {
        let margin = self.reserved_margin(txn, order);
        if margin > Decimal::ZERO {
            ledger::release_margin(
                txn,
                order.account_id,
                margin,
                EntryContext::new("Margin released on cancel").order(order.order_id),
            )?;
        }
        if order.charges > Decimal::ZERO {
            ledger::credit(
                txn,
                order.account_id,
                order.charges,
                EntryType::Charges,
                EntryContext::new("Charges refunded on cancel").order(order.order_id),
            )?;
        }
        Ok(())
    }

    /// Margin recorded at submission; recomputed when none was recorded
    fn reserved_margin(&self, txn: &mut Transaction, order: &Order) -> Decimal {
        let lot_size = txn
            .get::<Instrument>(&order.instrument_ref)
            .map_or(1, |i| i.lot_size);
        let recomputed = order.recorded_price().and_then(|price| {
            self.ctx
                .compute_order_margin(order.segment, order.product_type, order.quantity, price, lot_size)
                .ok()
                .map(|b| b.required_margin)
        });

        match recomputed {
            Some(computed) if order.blocked_margin > Decimal::ZERO => {
                if computed != order.blocked_margin {
                    warn!(
                        order_id = %order.order_id,
                        recorded = %order.blocked_margin,
                        recomputed = %computed,
                        "Recorded margin differs from recomputed margin; releasing recorded"
                    );
                }
                order.blocked_margin
            }
            Some(computed) => computed,
            None => order.blocked_margin,
        }
    }

    fn compensate(&self, order_id: OrderId, cause: &EngineError) -> OrderOutcome {
        error!(order_id = %order_id, error = %cause, "Order settlement failed; compensating");

        let mut txn = self.ctx.db.begin();
        if !txn.try_advisory_lock(&order_lock_key(order_id)) {
            debug!(order_id = %order_id, "Compensation claimed elsewhere");
            return OrderOutcome::Skipped;
        }

        match self.cancel_failed(&mut txn, order_id) {
            Ok(false) => {
                txn.rollback();
                OrderOutcome::Skipped
            }
            Ok(true) => match txn.commit() {
                Ok(_) => {
                    warn!(order_id = %order_id, "Order cancelled after failed execution");
                    OrderOutcome::Compensated
                }
                Err(e) => {
                    error!(order_id = %order_id, error = %e, "Compensation commit failed; order left pending");
                    OrderOutcome::Failed
                }
            },
            Err(e) => {
                error!(order_id = %order_id, error = %e, "Compensation failed; order left pending");
                OrderOutcome::Failed
            }
        }
    }

    fn cancel_failed(&self, txn: &mut Transaction, order_id: OrderId) -> Result<bool> {
        let Some(mut order) = txn.get::<Order>(&order_id) else {
            return Ok(false);
        };
        if !order.is_pending() {
            return Ok(false);
        }
        order.mark_cancelled(CancelReason::ExecutionFailed, Utc::now())?;
        self.return_reservation(txn, &order)?;
        txn.put(order);
        Ok(true)
    }

    fn after_commit(&self, order_id: OrderId, settled: Settled) -> OrderOutcome {
        match settled {
            Settled::Skipped => OrderOutcome::Skipped,
            Settled::Cancelled(reason) => {
                warn!(order_id = %order_id, reason = ?reason, "Order cancelled");
                OrderOutcome::Cancelled(reason)
            }
            Settled::Executed { order, symbol, user_id } => {
                info!(
                    order_id = %order_id,
                    side = %order.side,
                    quantity = order.quantity,
                    price = %order.average_fill_price,
                    "Order executed"
                );
                if let Some(user_id) = user_id {
                    self.ctx.publish(Notification::OrderExecuted {
                        user_id,
                        symbol,
                        quantity: order.quantity,
                        side: order.side,
                        avg_price: order.average_fill_price,
                    });
                }
                OrderOutcome::Executed
            }
        }
    }
}
