//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::Utc;
use execution_engine::ledger;
use execution_engine::{
    submit_order, ChannelNotifier, EngineContext, Notification, OrderRequest, SettingsCache, StaticQuotes,
};
use persistence::Database;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use types::account::TradingAccount;
use types::ids::{AccountId, InstrumentRef, OrderId, UserId};
use types::instrument::{Instrument, ProductType, Segment};
use types::ledger::{net_amount, Transaction as LedgerEntry};
use types::order::{OrderType, Side};

pub struct Harness {
    pub ctx: Arc<EngineContext>,
    pub quotes: Arc<StaticQuotes>,
    pub rx: UnboundedReceiver<Notification>,
    rng: ChaCha8Rng,
}

impl Harness {
    pub fn new() -> Self {
        let db = Database::in_memory();
        let quotes = Arc::new(StaticQuotes::new());
        let (notifier, rx) = ChannelNotifier::new();
        let settings = SettingsCache::with_env(db.clone(), Duration::ZERO, |_| None);
        let ctx = EngineContext::new(db, quotes.clone(), Arc::new(notifier)).with_settings(settings);
        Self {
            ctx: Arc::new(ctx),
            quotes,
            rx,
            rng: ChaCha8Rng::seed_from_u64(42),
        }
    }

    pub fn db(&self) -> &Database {
        &self.ctx.db
    }

    pub fn instrument(&self, reference: &str, price: i64) {
        let symbol = reference.rsplit(':').next().unwrap_or(reference);
        let mut txn = self.db().begin();
        txn.put(Instrument::new(reference, symbol, Segment::Equity, 1, Decimal::from(price)));
        txn.commit().unwrap();
    }

    pub fn account(&self, funds: i64) -> AccountId {
        let mut txn = self.db().begin();
        let account = ledger::open_account(&mut txn, UserId::new(), Decimal::from(funds)).unwrap();
        txn.commit().unwrap();
        account.account_id
    }

    pub fn limit_order(&mut self, account_id: AccountId, instrument: &str, side: Side, qty: u32, price: i64) -> OrderId {
        let request = OrderRequest {
            account_id,
            instrument_ref: InstrumentRef::new(instrument),
            product_type: ProductType::Intraday,
            order_type: OrderType::Limit,
            side,
            quantity: qty,
            limit_price: Some(Decimal::from(price)),
        };
        submit_order(&self.ctx, &mut self.rng, &request).unwrap().order.order_id
    }

    pub fn balances(&self, account_id: AccountId) -> TradingAccount {
        self.db().get::<TradingAccount>(&account_id).unwrap()
    }

    /// Signed sum of every ledger entry linked to the order
    pub fn order_net(&self, order_id: OrderId) -> Decimal {
        let entries = self.db().scan::<LedgerEntry>(|t| t.order_id == Some(order_id));
        net_amount(&entries)
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.rx.try_recv() {
            out.push(n);
        }
        out
    }

    pub fn now() -> chrono::DateTime<Utc> {
        Utc::now()
    }
}
