//! Position Store
//!
//! At most one open row per account and instrument. Fills net into the
//! open row; a row that reaches zero is kept as booked history, and
//! exposure past zero (or after a booked row) starts a new row at the fill
//! price.

use chrono::{DateTime, Utc};
use persistence::{Database, Transaction};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::{debug, warn};
use types::ids::{AccountId, InstrumentRef};
use types::instrument::ProductType;
use types::position::{FillEffect, Position};

use crate::error::Result;
use crate::ledger::account_lock_key;
use crate::quotes::QuoteSource;

/// Result of netting a fill into the store
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// Row holding the fill's exposure; the booked row itself when the fill
    /// flattened it exactly
    pub position: Position,
    /// Row a crossing fill booked on its way past zero
    pub booked: Option<Position>,
    /// Effect of the whole fill: units closed on the old row, units opened
    pub effect: FillEffect,
    /// Whether a new row was created
    pub created: bool,
}

impl UpsertOutcome {
    /// Row whose exposure the fill reduced, if any
    pub fn reduced(&self) -> &Position {
        self.booked.as_ref().unwrap_or(&self.position)
    }
}

/// Net a signed fill into the account's position for `instrument_ref`.
///
/// Takes the account row lock so concurrent fills for one account apply
/// one after another.
pub fn upsert(
    txn: &mut Transaction,
    account_id: AccountId,
    instrument_ref: &InstrumentRef,
    product_type: ProductType,
    signed_quantity: i64,
    fill_price: Decimal,
    timestamp: DateTime<Utc>,
) -> Result<UpsertOutcome> {
    txn.lock_row(&account_lock_key(account_id))?;

    let open_row = txn
        .scan::<Position>(|p| p.account_id == account_id && &p.instrument_ref == instrument_ref && p.is_open())
        .into_iter()
        .max_by_key(|p| p.opened_at);
    let open_new = |quantity: i64| {
        Position::open(account_id, instrument_ref.clone(), product_type, quantity, fill_price, timestamp)
    };

    let outcome = match open_row {
        Some(mut position) => {
            let mut effect = position.apply_fill(signed_quantity, fill_price, timestamp);
            if effect.remainder == 0 {
                UpsertOutcome {
                    position,
                    booked: None,
                    effect,
                    created: false,
                }
            } else {
                let fresh = open_new(effect.remainder);
                effect.opened_quantity = effect.remainder.abs();
                effect.remainder = 0;
                UpsertOutcome {
                    position: fresh,
                    booked: Some(position),
                    effect,
                    created: true,
                }
            }
        }
        None => UpsertOutcome {
            position: open_new(signed_quantity),
            booked: None,
            effect: FillEffect {
                previous_quantity: 0,
                closed_quantity: 0,
                opened_quantity: signed_quantity.abs(),
                remainder: 0,
                realized_pnl: Decimal::ZERO,
            },
            created: true,
        },
    };

    if let Some(booked) = &outcome.booked {
        debug!(
            account_id = %account_id,
            position_id = %booked.position_id,
            instrument = %instrument_ref,
            realized = %outcome.effect.realized_pnl,
            "Position booked by crossing fill"
        );
        txn.put(booked.clone());
    }
    debug!(
        account_id = %account_id,
        position_id = %outcome.position.position_id,
        instrument = %instrument_ref,
        quantity = outcome.position.signed_quantity,
        average_price = %outcome.position.average_price,
        realized = %outcome.effect.realized_pnl,
        "Position updated"
    );
    txn.put(outcome.position.clone());
    Ok(outcome)
}

/// Open positions of an account as seen by `txn`
pub fn open_positions(txn: &mut Transaction, account_id: AccountId) -> Vec<Position> {
    txn.scan::<Position>(|p| p.account_id == account_id && p.is_open())
}

/// Accounts holding at least one open position
pub fn accounts_with_open_positions(db: &Database) -> Vec<AccountId> {
    db.scan::<Position>(Position::is_open)
        .into_iter()
        .map(|p| p.account_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Open positions re-marked at live quotes
#[derive(Debug, Clone, Default)]
pub struct Valuation {
    /// Sum of unrealized P&L over the priced positions
    pub total_unrealized_pnl: Decimal,
    /// Positions that were priced, with fresh unrealized P&L
    pub marked: Vec<Position>,
    /// Instruments whose quote failed; they contribute nothing
    pub skipped: Vec<InstrumentRef>,
}

/// Re-mark every open position of the account and sum unrealized P&L.
///
/// A failed quote skips that position; the rest are still valued. Marked
/// rows are staged in `txn`.
pub fn calculate_unrealized_pnl(
    txn: &mut Transaction,
    account_id: AccountId,
    quotes: &dyn QuoteSource,
) -> Valuation {
    let now = Utc::now();
    let mut valuation = Valuation::default();

    for mut position in open_positions(txn, account_id) {
        match quotes.last_price(&position.instrument_ref) {
            Ok(price) if price > Decimal::ZERO => {
                valuation.total_unrealized_pnl += position.mark(price, now);
                txn.put(position.clone());
                valuation.marked.push(position);
            }
            Ok(price) => {
                warn!(instrument = %position.instrument_ref, price = %price, "Non-positive quote; position skipped");
                valuation.skipped.push(position.instrument_ref);
            }
            Err(e) => {
                warn!(instrument = %position.instrument_ref, error = %e, "Quote failed; position skipped");
                valuation.skipped.push(position.instrument_ref);
            }
        }
    }
    valuation
}
