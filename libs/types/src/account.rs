//! Trading account and margin buckets
//!
//! Invariant: available_margin + used_margin <= balance, both buckets >= 0.
//! Block and release move money between the buckets; only debit and credit
//! change the sum.

use crate::errors::AccountError;
use crate::ids::{AccountId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    /// Active and can trade
    ACTIVE,
    /// Temporarily suspended
    SUSPENDED,
    /// Permanently closed
    CLOSED,
}

/// Snapshot of the three money fields after a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    pub balance: Decimal,
    pub available_margin: Decimal,
    pub used_margin: Decimal,
}

/// Trading account row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingAccount {
    pub account_id: AccountId,
    pub user_id: UserId,
    pub status: AccountStatus,
    pub balance: Decimal,
    pub available_margin: Decimal,
    pub used_margin: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

impl TradingAccount {
    /// Create an empty account for a user
    pub fn new(user_id: UserId, timestamp: DateTime<Utc>) -> Self {
        Self {
            account_id: AccountId::new(),
            user_id,
            status: AccountStatus::ACTIVE,
            balance: Decimal::ZERO,
            available_margin: Decimal::ZERO,
            used_margin: Decimal::ZERO,
            created_at: timestamp,
            updated_at: timestamp,
            version: 0,
        }
    }

    pub fn balances(&self) -> Balances {
        Balances {
            balance: self.balance,
            available_margin: self.available_margin,
            used_margin: self.used_margin,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, AccountStatus::ACTIVE)
    }

    /// Check both buckets are non-negative and fit inside the balance
    pub fn check_invariant(&self) -> bool {
        self.available_margin >= Decimal::ZERO
            && self.used_margin >= Decimal::ZERO
            && self.available_margin + self.used_margin <= self.balance
    }

    /// Move `amount` from available to used
    pub fn block_margin(&mut self, amount: Decimal, timestamp: DateTime<Utc>) -> Result<(), AccountError> {
        ensure_amount(amount)?;
        if self.available_margin < amount {
            return Err(AccountError::InsufficientMargin {
                required: amount.to_string(),
                available: self.available_margin.to_string(),
            });
        }
        self.available_margin -= amount;
        self.used_margin += amount;
        self.touch(timestamp);
        Ok(())
    }

    /// Move `amount` from used back to available.
    ///
    /// Used margin is clamped at zero instead of failing; returns the part of
    /// `amount` that exceeded the used bucket.
    pub fn release_margin(&mut self, amount: Decimal, timestamp: DateTime<Utc>) -> Result<Decimal, AccountError> {
        ensure_amount(amount)?;
        let excess = (amount - self.used_margin).max(Decimal::ZERO);
        self.available_margin += amount;
        self.used_margin = (self.used_margin - amount).max(Decimal::ZERO);
        self.touch(timestamp);
        Ok(excess)
    }

    /// Take `amount` out of available funds
    pub fn debit(&mut self, amount: Decimal, timestamp: DateTime<Utc>) -> Result<(), AccountError> {
        ensure_amount(amount)?;
        if self.available_margin < amount {
            return Err(AccountError::InsufficientFunds {
                required: amount.to_string(),
                available: self.available_margin.to_string(),
            });
        }
        self.available_margin -= amount;
        self.balance -= amount;
        self.touch(timestamp);
        Ok(())
    }

    /// Add `amount` to available funds
    pub fn credit(&mut self, amount: Decimal, timestamp: DateTime<Utc>) -> Result<(), AccountError> {
        ensure_amount(amount)?;
        self.available_margin += amount;
        self.balance += amount;
        self.touch(timestamp);
        Ok(())
    }

    fn touch(&mut self, timestamp: DateTime<Utc>) {
        self.updated_at = timestamp;
        self.version += 1;
    }
}

fn ensure_amount(amount: Decimal) -> Result<(), AccountError> {
    if amount < Decimal::ZERO {
        return Err(AccountError::InvalidAmount(amount.to_string()));
    }
    Ok(())
}
