//! Ledger entries
//!
//! Append-only audit trail of every balance or margin mutation. Amounts are
//! always non-negative; direction is carried by `kind`.

use crate::ids::{AccountId, OrderId, PositionId, TransactionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a ledger entry from the account's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    DEBIT,
    CREDIT,
}

/// What the entry documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// available -> used
    MarginBlock,
    /// used -> available
    MarginRelease,
    /// Brokerage and statutory charges
    Charges,
    /// Profit or loss booked on a closing fill
    RealizedPnl,
    Deposit,
    Withdrawal,
    Adjustment,
}

/// Ledger entry row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub entry_type: EntryType,
    pub description: String,
    pub order_id: Option<OrderId>,
    pub position_id: Option<PositionId>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        account_id: AccountId,
        amount: Decimal,
        kind: TransactionKind,
        entry_type: EntryType,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_id: TransactionId::new(),
            account_id,
            amount,
            kind,
            entry_type,
            description: description.into(),
            order_id: None,
            position_id: None,
            created_at: timestamp,
        }
    }

    pub fn for_order(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn for_position(mut self, position_id: PositionId) -> Self {
        self.position_id = Some(position_id);
        self
    }

    /// Amount with sign: credits positive, debits negative
    pub fn signed_amount(&self) -> Decimal {
        match self.kind {
            TransactionKind::CREDIT => self.amount,
            TransactionKind::DEBIT => -self.amount,
        }
    }
}

/// Net signed amount of a set of entries
pub fn net_amount<'a>(entries: impl IntoIterator<Item = &'a Transaction>) -> Decimal {
    entries
        .into_iter()
        .fold(Decimal::ZERO, |acc, t| acc + t.signed_amount())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_amount() {
        let account = AccountId::new();
        let debit = Transaction::new(
            account,
            Decimal::from(125),
            TransactionKind::DEBIT,
            EntryType::MarginBlock,
            "block",
            Utc::now(),
        );
        let credit = Transaction::new(
            account,
            Decimal::from(125),
            TransactionKind::CREDIT,
            EntryType::MarginRelease,
            "release",
            Utc::now(),
        );
        assert_eq!(debit.signed_amount(), Decimal::from(-125));
        assert_eq!(net_amount([&debit, &credit]), Decimal::ZERO);
    }

    #[test]
    fn test_links() {
        let order_id = OrderId::new();
        let position_id = PositionId::new();
        let t = Transaction::new(
            AccountId::new(),
            Decimal::ONE,
            TransactionKind::DEBIT,
            EntryType::Charges,
            "charges",
            Utc::now(),
        )
        .for_order(order_id)
        .for_position(position_id);
        assert_eq!(t.order_id, Some(order_id));
        assert_eq!(t.position_id, Some(position_id));
    }
}
