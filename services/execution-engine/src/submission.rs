//! Order submission
//!
//! Reserves margin and takes charges up front, then records the order as
//! PENDING for the execution worker. All in one transaction: a rejected
//! order leaves no trace.

use chrono::Utc;
use rand::Rng;
use risk_engine::validator::{check_collateral, validate_order, ValidationError};
use risk_engine::{MarginBreakdown, RealisticPrice};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use types::account::TradingAccount;
use types::errors::{AccountError, OrderError};
use types::ids::{AccountId, InstrumentRef};
use types::instrument::{Instrument, ProductType};
use types::ledger::EntryType;
use types::order::{Order, OrderType, Side};

use crate::context::EngineContext;
use crate::error::Result;
use crate::ledger::{self, account_lock_key, EntryContext};

/// Incoming order from a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: AccountId,
    pub instrument_ref: InstrumentRef,
    pub product_type: ProductType,
    pub order_type: OrderType,
    pub side: Side,
    pub quantity: u32,
    pub limit_price: Option<Decimal>,
}

/// Accepted order with the numbers it was accepted on
#[derive(Debug, Clone)]
pub struct Submission {
    pub order: Order,
    pub margin: MarginBreakdown,
    /// Simulated fill for market orders
    pub pricing: Option<RealisticPrice>,
}

/// Validate, price and reserve funds for an order, then insert it PENDING.
pub fn submit_order<R: Rng + ?Sized>(
    ctx: &EngineContext,
    rng: &mut R,
    request: &OrderRequest,
) -> Result<Submission> {
    let mut txn = ctx.db.begin();
    txn.lock_row(&account_lock_key(request.account_id))?;

    let account = txn
        .get::<TradingAccount>(&request.account_id)
        .ok_or_else(|| AccountError::NotFound {
            account_id: request.account_id.to_string(),
        })?;
    let instrument = txn.get::<Instrument>(&request.instrument_ref);

    validate_order(
        &account,
        instrument.as_ref(),
        request.instrument_ref.as_str(),
        request.order_type,
        request.quantity,
        request.limit_price,
    )?;
    let instrument = instrument
        .ok_or_else(|| ValidationError::UnknownInstrument(request.instrument_ref.to_string()))?;

    let (fill_price, pricing) = match request.order_type {
        OrderType::Limit => {
            let limit = request.limit_price.ok_or(ValidationError::MissingLimitPrice)?;
            (limit, None)
        }
        OrderType::Market => {
            let base = market_price(ctx, &instrument)?;
            let priced = ctx.risk.price_order(
                rng,
                base,
                request.side,
                instrument.segment,
                request.quantity,
                instrument.lot_size,
            );
            for w in &priced.warnings {
                warn!(instrument = %instrument.instrument_ref, warning = %w, "Pricing warning");
            }
            (priced.execution_price, Some(priced))
        }
    };

    let margin = ctx.compute_order_margin(
        instrument.segment,
        request.product_type,
        request.quantity,
        fill_price,
        instrument.lot_size,
    )?;
    check_collateral(account.available_margin, &margin)?;

    let now = Utc::now();
    let mut order = Order::new(
        request.account_id,
        request.instrument_ref.clone(),
        instrument.segment,
        request.product_type,
        request.order_type,
        request.side,
        request.quantity,
        request.limit_price,
        now,
    );
    if request.order_type == OrderType::Market {
        order.average_fill_price = fill_price;
    }
    order.blocked_margin = margin.required_margin;
    order.charges = margin.total_charges;

    if margin.required_margin > Decimal::ZERO {
        ledger::block_margin(
            &mut txn,
            order.account_id,
            margin.required_margin,
            EntryContext::new(format!("Margin blocked for {} {}", order.side, instrument.symbol))
                .order(order.order_id),
        )?;
    }
    if margin.total_charges > Decimal::ZERO {
        ledger::debit(
            &mut txn,
            order.account_id,
            margin.total_charges,
            EntryType::Charges,
            EntryContext::new(format!("Charges for {} {}", order.side, instrument.symbol))
                .order(order.order_id),
        )?;
    }

    txn.put(order.clone());
    txn.commit()?;

    info!(
        order_id = %order.order_id,
        account_id = %order.account_id,
        instrument = %order.instrument_ref,
        side = %order.side,
        quantity = order.quantity,
        price = %fill_price,
        margin = %margin.required_margin,
        charges = %margin.total_charges,
        "Order accepted"
    );

    Ok(Submission {
        order,
        margin,
        pricing,
    })
}

fn market_price(ctx: &EngineContext, instrument: &Instrument) -> Result<Decimal> {
    match ctx.quotes.last_price(&instrument.instrument_ref) {
        Ok(price) if price > Decimal::ZERO => return Ok(price),
        Ok(_) => {}
        Err(e) => {
            warn!(instrument = %instrument.instrument_ref, error = %e, "Quote failed; using stored price");
        }
    }
    instrument
        .last_known_price()
        .ok_or_else(|| OrderError::InvalidPrice(format!("no price for {}", instrument.instrument_ref)).into())
}
