//! Position close path
//!
//! Flattens one position at the live price inside the caller's
//! transaction. Shared by the risk monitor's auto-close and the operator's
//! manual close.

use chrono::Utc;
use persistence::Transaction;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use types::errors::PositionError;
use types::ids::PositionId;
use types::instrument::Instrument;
use types::position::Position;

use crate::context::EngineContext;
use crate::error::Result;
use crate::ledger::{self, account_lock_key, EntryContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseReason {
    AutoClose,
    Manual,
}

impl CloseReason {
    fn label(&self) -> &'static str {
        match self {
            CloseReason::AutoClose => "auto-close",
            CloseReason::Manual => "manual close",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloseOutcome {
    pub position: Position,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
    pub margin_released: Decimal,
    /// Part of a loss the account could not cover
    pub shortfall: Decimal,
}

/// Close `position_id` at the live quote, falling back to the stored price.
pub fn close_position(
    ctx: &EngineContext,
    txn: &mut Transaction,
    position_id: PositionId,
    reason: CloseReason,
) -> Result<CloseOutcome> {
    let account_id = txn
        .get::<Position>(&position_id)
        .map(|p| p.account_id)
        .ok_or_else(|| PositionError::NotFound {
            position_id: position_id.to_string(),
        })?;
    txn.lock_row(&account_lock_key(account_id))?;

    let mut position = txn
        .get::<Position>(&position_id)
        .ok_or_else(|| PositionError::NotFound {
            position_id: position_id.to_string(),
        })?;
    if !position.is_open() {
        return Err(PositionError::AlreadyBooked {
            position_id: position_id.to_string(),
        }
        .into());
    }

    let instrument = txn.get::<Instrument>(&position.instrument_ref);
    let exit_price = exit_price(ctx, &position, instrument.as_ref())?;
    // never release more than the account holds
    let held = ledger::balances(txn, account_id)?.used_margin;
    let margin = margin_to_release(ctx, &position, instrument.as_ref()).min(held);

    let effect = position.close_at(exit_price, Utc::now());
    position.blocked_margin = Decimal::ZERO;
    txn.put(position.clone());

    let entry = || {
        EntryContext::new(format!("{} of {}", reason.label(), position.instrument_ref)).position(position_id)
    };
    if margin > Decimal::ZERO {
        ledger::release_margin(txn, account_id, margin, entry())?;
    }
    let shortfall = ledger::settle_pnl(txn, account_id, effect.realized_pnl, entry())?;

    info!(
        position_id = %position_id,
        account_id = %account_id,
        reason = ?reason,
        quantity = effect.closed_quantity,
        exit_price = %exit_price,
        realized = %effect.realized_pnl,
        margin_released = %margin,
        "Position closed"
    );

    Ok(CloseOutcome {
        position,
        exit_price,
        realized_pnl: effect.realized_pnl,
        margin_released: margin,
        shortfall,
    })
}

fn exit_price(ctx: &EngineContext, position: &Position, instrument: Option<&Instrument>) -> Result<Decimal> {
    match ctx.quotes.last_price(&position.instrument_ref) {
        Ok(price) if price > Decimal::ZERO => return Ok(price),
        Ok(_) => {}
        Err(e) => warn!(instrument = %position.instrument_ref, error = %e, "Quote failed; using stored price"),
    }
    instrument
        .and_then(Instrument::last_known_price)
        .ok_or_else(|| {
            PositionError::NoExitPrice {
                instrument: position.instrument_ref.to_string(),
            }
            .into()
        })
}

/// Margin held for the position; recomputed from its size when none was
/// recorded.
fn margin_to_release(ctx: &EngineContext, position: &Position, instrument: Option<&Instrument>) -> Decimal {
    if position.blocked_margin > Decimal::ZERO {
        return position.blocked_margin;
    }
    let Some(instrument) = instrument else {
        return Decimal::ZERO;
    };
    let quantity = u32::try_from(position.signed_quantity.unsigned_abs()).unwrap_or(u32::MAX);
    match ctx.compute_order_margin(
        instrument.segment,
        position.product_type,
        quantity,
        position.average_price,
        1,
    ) {
        Ok(breakdown) => breakdown.required_margin,
        Err(e) => {
            warn!(position_id = %position.position_id, error = %e, "Could not recompute position margin");
            Decimal::ZERO
        }
    }
}
