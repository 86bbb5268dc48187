//! Money is conserved through ledger operations and order round trips.

mod common;

use chrono::Utc;
use common::Harness;
use execution_engine::ledger::{self, EntryContext};
use execution_engine::{positions, ExecutionWorker, WorkerConfig};
use proptest::prelude::*;
use rust_decimal::Decimal;
use types::account::TradingAccount;
use types::ids::{AccountId, InstrumentRef, UserId};
use types::instrument::ProductType;
use types::ledger::{net_amount, EntryType, Transaction as LedgerEntry};
use types::order::Side;

#[derive(Debug, Clone)]
enum Op {
    Block(i64),
    Release(i64),
    Debit(i64),
    Credit(i64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..500).prop_map(Op::Block),
        (1i64..500).prop_map(Op::Release),
        (1i64..500).prop_map(Op::Debit),
        (1i64..500).prop_map(Op::Credit),
    ]
}

fn funded(h: &Harness, funds: i64) -> AccountId {
    let mut txn = h.db().begin();
    let account = ledger::open_account(&mut txn, UserId::new(), Decimal::from(funds)).unwrap();
    txn.commit().unwrap();
    account.account_id
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn ledger_preserves_account_invariant(funds in 0i64..2_000, ops in prop::collection::vec(op(), 1..40)) {
        let h = Harness::new();
        let id = funded(&h, funds);

        for op in ops {
            let mut txn = h.db().begin();
            let ctx = EntryContext::new("prop");
            let result = match op {
                Op::Block(n) => ledger::block_margin(&mut txn, id, Decimal::from(n), ctx),
                Op::Release(n) => {
                    // stay within what is held so the clamp never applies
                    let used = ledger::balances(&mut txn, id).unwrap().used_margin;
                    ledger::release_margin(&mut txn, id, Decimal::from(n).min(used), ctx)
                }
                Op::Debit(n) => ledger::debit(&mut txn, id, Decimal::from(n), EntryType::Adjustment, ctx),
                Op::Credit(n) => ledger::credit(&mut txn, id, Decimal::from(n), EntryType::Adjustment, ctx),
            };
            if result.is_ok() {
                txn.commit().unwrap();
            }

            let account = h.db().get::<TradingAccount>(&id).unwrap();
            prop_assert!(account.check_invariant());
            prop_assert_eq!(account.available_margin + account.used_margin, account.balance);
        }

        // balance is the sum of the money-moving entries
        let entries = h.db().scan::<LedgerEntry>(|t| {
            t.account_id == id && !matches!(t.entry_type, EntryType::MarginBlock | EntryType::MarginRelease)
        });
        let account = h.db().get::<TradingAccount>(&id).unwrap();
        prop_assert_eq!(net_amount(&entries), account.balance);
    }

    #[test]
    fn fills_net_into_signed_sum(fills in prop::collection::vec((-20i64..20, 50i64..150), 1..20)) {
        let h = Harness::new();
        let account = AccountId::new();
        let mut txn = h.db().begin();
        let mut expected_qty = 0i64;
        let mut realized = Decimal::ZERO;

        for (delta, price) in fills.into_iter().filter(|(d, _)| *d != 0) {
            let out = positions::upsert(
                &mut txn,
                account,
                &InstrumentRef::new("NSE:SBIN"),
                ProductType::Intraday,
                delta,
                Decimal::from(price),
                Utc::now(),
            )
            .unwrap();
            expected_qty += delta;
            realized += out.effect.realized_pnl;
            prop_assert_eq!(out.position.signed_quantity, expected_qty);
            if let Some(booked) = &out.booked {
                prop_assert!(booked.is_booked());
            }
        }

        // open exposure plus booked history account for every fill
        txn.commit().unwrap();
        let rows = h.db().scan::<types::position::Position>(|p| p.account_id == account);
        prop_assert!(rows.iter().filter(|p| p.is_open()).count() <= 1);
        let net: i64 = rows.iter().map(|p| p.signed_quantity).sum();
        prop_assert_eq!(net, expected_qty);
        let booked: Decimal = rows.iter().map(|p| p.realized_pnl).sum();
        prop_assert_eq!(booked, realized);
    }
}

#[test]
fn test_netting_example() {
    let h = Harness::new();
    let account = AccountId::new();
    let sbin = InstrumentRef::new("NSE:SBIN");
    let mut txn = h.db().begin();
    positions::upsert(&mut txn, account, &sbin, ProductType::Intraday, 10, Decimal::from(100), Utc::now()).unwrap();
    let out =
        positions::upsert(&mut txn, account, &sbin, ProductType::Intraday, -15, Decimal::from(120), Utc::now()).unwrap();

    assert_eq!(out.position.signed_quantity, -5);
    assert_eq!(out.position.average_price, Decimal::from(120));
    assert_eq!(out.effect.realized_pnl, Decimal::from(200));

    let booked = out.booked.unwrap();
    assert_ne!(booked.position_id, out.position.position_id);
    assert_eq!(booked.signed_quantity, 0);
    assert_eq!(booked.realized_pnl, Decimal::from(200));
    txn.commit().unwrap();
    assert_eq!(h.db().scan::<types::position::Position>(|p| p.account_id == account).len(), 2);
}

#[test]
fn test_round_trip_costs_only_charges_and_pnl() {
    let mut h = Harness::new();
    h.instrument("NSE:SBIN", 100);
    let account = h.account(50_000);
    let buy = h.limit_order(account, "NSE:SBIN", Side::BUY, 20, 100);
    let sell = h.limit_order(account, "NSE:SBIN", Side::SELL, 20, 95);

    let worker = ExecutionWorker::new(h.ctx.clone(), WorkerConfig::default());
    assert_eq!(worker.process_batch().executed, 2);

    let charges: Decimal = [buy, sell]
        .iter()
        .map(|id| h.db().get::<types::order::Order>(id).unwrap().charges)
        .sum();
    let after = h.balances(account);
    assert_eq!(after.used_margin, Decimal::ZERO);
    assert_eq!(after.balance, Decimal::from(50_000) - Decimal::from(100) - charges);
    assert_eq!(h.order_net(buy) + h.order_net(sell), after.balance - Decimal::from(50_000));
}
