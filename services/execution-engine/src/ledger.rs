//! Fund Ledger
//!
//! Every mutation takes the account row lock, re-reads the account inside
//! the caller's transaction, applies the change and appends exactly one
//! ledger entry. Nothing here commits; callers decide the unit of work.

use chrono::Utc;
use persistence::Transaction;
use rust_decimal::Decimal;
use tracing::{debug, warn};
use types::account::{Balances, TradingAccount};
use types::errors::AccountError;
use types::ids::{AccountId, OrderId, PositionId, UserId};
use types::ledger::{EntryType, Transaction as LedgerEntry, TransactionKind};

use crate::error::LedgerError;

/// Row-lock key serializing every balance and position change of an account
pub fn account_lock_key(account_id: AccountId) -> String {
    format!("account:{account_id}")
}

/// Description and links for the ledger entry a mutation appends
#[derive(Debug, Clone, Default)]
pub struct EntryContext {
    pub description: String,
    pub order_id: Option<OrderId>,
    pub position_id: Option<PositionId>,
}

impl EntryContext {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn position(mut self, position_id: PositionId) -> Self {
        self.position_id = Some(position_id);
        self
    }

    pub fn maybe_position(mut self, position_id: Option<PositionId>) -> Self {
        self.position_id = position_id;
        self
    }
}

/// Create a funded account. Initial funds are recorded as a deposit.
pub fn open_account(
    txn: &mut Transaction,
    user_id: UserId,
    initial_funds: Decimal,
) -> Result<TradingAccount, LedgerError> {
    let account = TradingAccount::new(user_id, Utc::now());
    let account_id = account.account_id;
    txn.put(account.clone());
    if initial_funds > Decimal::ZERO {
        deposit(txn, account_id, initial_funds, EntryContext::new("Initial deposit"))?;
        return locked_account(txn, account_id);
    }
    Ok(account)
}

/// Move `amount` from available to used margin.
pub fn block_margin(
    txn: &mut Transaction,
    account_id: AccountId,
    amount: Decimal,
    ctx: EntryContext,
) -> Result<Balances, LedgerError> {
    let mut account = locked_account(txn, account_id)?;
    account.block_margin(amount, Utc::now())?;
    record(txn, account, amount, TransactionKind::DEBIT, EntryType::MarginBlock, ctx)
}

/// Move `amount` back from used to available margin.
///
/// Releasing more than is held clamps used margin at zero and logs the
/// excess instead of failing.
pub fn release_margin(
    txn: &mut Transaction,
    account_id: AccountId,
    amount: Decimal,
    ctx: EntryContext,
) -> Result<Balances, LedgerError> {
    let mut account = locked_account(txn, account_id)?;
    let excess = account.release_margin(amount, Utc::now())?;
    if excess > Decimal::ZERO {
        warn!(
            account_id = %account_id,
            amount = %amount,
            excess = %excess,
            "Released more margin than was held; used margin clamped at zero"
        );
    }
    record(txn, account, amount, TransactionKind::CREDIT, EntryType::MarginRelease, ctx)
}

/// Take `amount` out of balance and available funds.
pub fn debit(
    txn: &mut Transaction,
    account_id: AccountId,
    amount: Decimal,
    entry_type: EntryType,
    ctx: EntryContext,
) -> Result<Balances, LedgerError> {
    let mut account = locked_account(txn, account_id)?;
    account.debit(amount, Utc::now())?;
    record(txn, account, amount, TransactionKind::DEBIT, entry_type, ctx)
}

/// Add `amount` to balance and available funds.
pub fn credit(
    txn: &mut Transaction,
    account_id: AccountId,
    amount: Decimal,
    entry_type: EntryType,
    ctx: EntryContext,
) -> Result<Balances, LedgerError> {
    let mut account = locked_account(txn, account_id)?;
    account.credit(amount, Utc::now())?;
    record(txn, account, amount, TransactionKind::CREDIT, entry_type, ctx)
}

pub fn deposit(
    txn: &mut Transaction,
    account_id: AccountId,
    amount: Decimal,
    ctx: EntryContext,
) -> Result<Balances, LedgerError> {
    credit(txn, account_id, amount, EntryType::Deposit, ctx)
}

pub fn withdraw(
    txn: &mut Transaction,
    account_id: AccountId,
    amount: Decimal,
    ctx: EntryContext,
) -> Result<Balances, LedgerError> {
    debit(txn, account_id, amount, EntryType::Withdrawal, ctx)
}

/// Current balances as seen by `txn`
pub fn balances(txn: &mut Transaction, account_id: AccountId) -> Result<Balances, LedgerError> {
    txn.get::<TradingAccount>(&account_id)
        .map(|a| a.balances())
        .ok_or_else(|| not_found(account_id))
}

/// Settle a realized P&L amount: profits are credited, losses debited up to
/// what is available. Returns the uncovered part of a loss.
pub fn settle_pnl(
    txn: &mut Transaction,
    account_id: AccountId,
    pnl: Decimal,
    ctx: EntryContext,
) -> Result<Decimal, LedgerError> {
    if pnl > Decimal::ZERO {
        credit(txn, account_id, pnl, EntryType::RealizedPnl, ctx)?;
        return Ok(Decimal::ZERO);
    }
    let loss = -pnl;
    if loss.is_zero() {
        return Ok(Decimal::ZERO);
    }

    let available = balances(txn, account_id)?.available_margin;
    let covered = loss.min(available);
    if covered > Decimal::ZERO {
        debit(txn, account_id, covered, EntryType::RealizedPnl, ctx)?;
    }
    let shortfall = loss - covered;
    if shortfall > Decimal::ZERO {
        warn!(
            account_id = %account_id,
            loss = %loss,
            shortfall = %shortfall,
            "Realized loss exceeds available funds; debit capped"
        );
    }
    Ok(shortfall)
}

fn locked_account(txn: &mut Transaction, account_id: AccountId) -> Result<TradingAccount, LedgerError> {
    txn.lock_row(&account_lock_key(account_id))?;
    txn.get::<TradingAccount>(&account_id)
        .ok_or_else(|| not_found(account_id))
}

fn record(
    txn: &mut Transaction,
    account: TradingAccount,
    amount: Decimal,
    kind: TransactionKind,
    entry_type: EntryType,
    ctx: EntryContext,
) -> Result<Balances, LedgerError> {
    let mut entry = LedgerEntry::new(
        account.account_id,
        amount,
        kind,
        entry_type,
        ctx.description,
        Utc::now(),
    );
    entry.order_id = ctx.order_id;
    entry.position_id = ctx.position_id;

    debug!(
        account_id = %account.account_id,
        entry_type = ?entry_type,
        amount = %amount,
        "Ledger entry"
    );

    let balances = account.balances();
    txn.put(account);
    txn.put(entry);
    Ok(balances)
}

fn not_found(account_id: AccountId) -> LedgerError {
    LedgerError::Account(AccountError::NotFound {
        account_id: account_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistence::Database;
    use types::ledger::net_amount;

    fn funded(db: &Database, funds: i64) -> AccountId {
        let mut txn = db.begin();
        let account = open_account(&mut txn, UserId::new(), Decimal::from(funds)).unwrap();
        txn.commit().unwrap();
        account.account_id
    }

    fn entries(db: &Database, account_id: AccountId) -> Vec<LedgerEntry> {
        db.scan::<LedgerEntry>(|t| t.account_id == account_id)
    }

    #[test]
    fn test_open_account_records_deposit() {
        let db = Database::in_memory();
        let id = funded(&db, 10_000);
        let account = db.get::<TradingAccount>(&id).unwrap();
        assert_eq!(account.balance, Decimal::from(10_000));
        assert_eq!(account.available_margin, Decimal::from(10_000));

        let entries = entries(&db, id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry_type, EntryType::Deposit);
    }

    #[test]
    fn test_block_then_release_is_neutral() {
        let db = Database::in_memory();
        let id = funded(&db, 1_000);

        let mut txn = db.begin();
        let b = block_margin(&mut txn, id, Decimal::from(300), EntryContext::new("block")).unwrap();
        assert_eq!(b.available_margin, Decimal::from(700));
        assert_eq!(b.used_margin, Decimal::from(300));
        let b = release_margin(&mut txn, id, Decimal::from(300), EntryContext::new("release")).unwrap();
        assert_eq!(b.available_margin, Decimal::from(1_000));
        assert_eq!(b.used_margin, Decimal::ZERO);
        txn.commit().unwrap();

        let all = entries(&db, id);
        assert_eq!(all.len(), 3);
        let margin: Vec<_> = all.iter().filter(|t| t.entry_type != EntryType::Deposit).collect();
        assert_eq!(net_amount(margin), Decimal::ZERO);
    }

    #[test]
    fn test_block_insufficient_changes_nothing() {
        let db = Database::in_memory();
        let id = funded(&db, 100);

        let mut txn = db.begin();
        let err = block_margin(&mut txn, id, Decimal::from(101), EntryContext::new("block")).unwrap_err();
        assert!(matches!(err, LedgerError::Account(AccountError::InsufficientMargin { .. })));
        txn.commit().unwrap();

        assert_eq!(db.get::<TradingAccount>(&id).unwrap().available_margin, Decimal::from(100));
        assert_eq!(entries(&db, id).len(), 1);
    }

    #[test]
    fn test_release_clamps_used_margin() {
        let db = Database::in_memory();
        let id = funded(&db, 1_000);

        let mut txn = db.begin();
        block_margin(&mut txn, id, Decimal::from(50), EntryContext::new("block")).unwrap();
        let b = release_margin(&mut txn, id, Decimal::from(80), EntryContext::new("release")).unwrap();
        assert_eq!(b.used_margin, Decimal::ZERO);
        assert_eq!(b.available_margin, Decimal::from(1_030));
    }

    #[test]
    fn test_debit_requires_available_funds() {
        let db = Database::in_memory();
        let id = funded(&db, 100);
        let mut txn = db.begin();
        block_margin(&mut txn, id, Decimal::from(60), EntryContext::new("block")).unwrap();
        let err = withdraw(&mut txn, id, Decimal::from(50), EntryContext::new("withdraw")).unwrap_err();
        assert!(matches!(err, LedgerError::Account(AccountError::InsufficientFunds { .. })));
    }

    #[test]
    fn test_negative_amount_rejected() {
        let db = Database::in_memory();
        let id = funded(&db, 100);
        let mut txn = db.begin();
        let err = credit(&mut txn, id, Decimal::from(-1), EntryType::Adjustment, EntryContext::new("x"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Account(AccountError::InvalidAmount(_))));
    }

    #[test]
    fn test_unknown_account() {
        let db = Database::in_memory();
        let mut txn = db.begin();
        let err = deposit(&mut txn, AccountId::new(), Decimal::ONE, EntryContext::new("x")).unwrap_err();
        assert!(matches!(err, LedgerError::Account(AccountError::NotFound { .. })));
    }

    #[test]
    fn test_settle_loss_capped_at_available() {
        let db = Database::in_memory();
        let id = funded(&db, 100);
        let mut txn = db.begin();
        let shortfall = settle_pnl(&mut txn, id, Decimal::from(-130), EntryContext::new("loss")).unwrap();
        assert_eq!(shortfall, Decimal::from(30));
        let b = balances(&mut txn, id).unwrap();
        assert_eq!(b.balance, Decimal::ZERO);
        assert_eq!(b.available_margin, Decimal::ZERO);
    }

    #[test]
    fn test_entries_carry_links() {
        let db = Database::in_memory();
        let id = funded(&db, 1_000);
        let order_id = OrderId::new();
        let mut txn = db.begin();
        debit(
            &mut txn,
            id,
            Decimal::from(20),
            EntryType::Charges,
            EntryContext::new("charges").order(order_id),
        )
        .unwrap();
        txn.commit().unwrap();

        let charged = db.scan::<LedgerEntry>(|t| t.order_id == Some(order_id));
        assert_eq!(charged.len(), 1);
        assert_eq!(charged[0].kind, TransactionKind::DEBIT);
    }
}
