//! Auto-close only closes losers, worst first, and stops once the account
//! is back under the threshold.

mod common;

use chrono::Utc;
use common::Harness;
use execution_engine::{ledger, positions, MonitorConfig, RiskMonitor};
use proptest::prelude::*;
use risk_engine::exposure::loss_utilization;
use risk_engine::RiskThresholds;
use rust_decimal::Decimal;
use std::collections::HashMap;
use types::ids::{InstrumentRef, PositionId, UserId};
use types::instrument::ProductType;
use types::position::Position;
use types::risk::{AlertType, RiskAlert};

/// (average price, quantity, price move in percent)
type Holding = (i64, i64, i64);

fn holding() -> impl Strategy<Value = Holding> {
    (50i64..500, 1i64..50, -90i64..20)
}

struct Book {
    h: Harness,
    account: types::ids::AccountId,
    /// Expected unrealized P&L per position at the quoted prices
    unrealized: HashMap<PositionId, Decimal>,
}

fn book(funds: i64, holdings: &[Holding]) -> Book {
    let h = Harness::new();
    let mut txn = h.db().begin();
    let account = ledger::open_account(&mut txn, UserId::new(), Decimal::from(funds)).unwrap();
    let mut unrealized = HashMap::new();

    for (i, (avg, qty, moved)) in holdings.iter().enumerate() {
        let instrument = format!("NSE:I{i}");
        let out = positions::upsert(
            &mut txn,
            account.account_id,
            &InstrumentRef::new(instrument.as_str()),
            ProductType::Delivery,
            *qty,
            Decimal::from(*avg),
            Utc::now(),
        )
        .unwrap();
        let price = Decimal::from(avg * (100 + moved)) / Decimal::ONE_HUNDRED;
        h.quotes.set(instrument.as_str(), price);
        unrealized.insert(out.position.position_id, (price - Decimal::from(*avg)) * Decimal::from(*qty));
    }
    txn.commit().unwrap();

    Book {
        h,
        account: account.account_id,
        unrealized,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn auto_close_is_monotonic(
        funds in 100i64..20_000,
        holdings in prop::collection::vec(holding(), 1..6),
    ) {
        let b = book(funds, &holdings);
        let thresholds = RiskThresholds::default();
        let total: Decimal = b.unrealized.values().copied().sum();
        let before = loss_utilization(total, Decimal::from(funds), Decimal::from(funds));

        let monitor = RiskMonitor::new(b.h.ctx.clone(), MonitorConfig::default());
        let report = monitor.run_sweep();
        prop_assert_eq!(report.errors, 0);

        let rows = b.h.db().scan::<Position>(|p| p.account_id == b.account);
        let closed: Vec<&Position> = rows.iter().filter(|p| !p.is_open()).collect();
        let open: Vec<&Position> = rows.iter().filter(|p| p.is_open()).collect();
        prop_assert_eq!(closed.len(), report.positions_closed);

        // only losers are ever closed
        for p in &closed {
            prop_assert!(b.unrealized[&p.position_id] < Decimal::ZERO);
        }

        // worst first: no open loser is worse than any closed position
        if let Some(best_closed) = closed.iter().map(|p| b.unrealized[&p.position_id]).max() {
            for p in &open {
                let u = b.unrealized[&p.position_id];
                if u < Decimal::ZERO {
                    prop_assert!(u >= best_closed);
                }
            }
        }

        if closed.is_empty() {
            let any_loser = b.unrealized.values().any(|u| *u < Decimal::ZERO);
            prop_assert!(before < thresholds.auto_close || !any_loser);
        } else {
            prop_assert!(before >= thresholds.auto_close);
            let account = b.h.balances(b.account);
            prop_assert!(account.check_invariant());

            // stopped early only because utilization dropped under the threshold
            let remaining: Decimal = open.iter().map(|p| b.unrealized[&p.position_id]).sum();
            let after = loss_utilization(remaining, account.available_margin, account.balance);
            let losers_left = open.iter().any(|p| b.unrealized[&p.position_id] < Decimal::ZERO);
            if losers_left {
                prop_assert!(after < thresholds.auto_close);
            }

            let critical = b.h.db().scan::<RiskAlert>(|a| a.alert_type == AlertType::AutoClose);
            prop_assert_eq!(critical.len(), 1);
        }
    }
}

#[test]
fn test_profitable_positions_survive_auto_close() {
    // net loss 800 over 400 + 400
    let b = book(400, &[(100, 10, -90), (100, 10, 10)]);
    let report = RiskMonitor::new(b.h.ctx.clone(), MonitorConfig::default()).run_sweep();
    assert_eq!(report.positions_closed, 1);

    let open = b.h.db().scan::<Position>(|p| p.is_open());
    assert_eq!(open.len(), 1);
    assert!(b.unrealized[&open[0].position_id] > Decimal::ZERO);
}
