//! Account aggregate.
//!
//! The account is a derived cache over the entry history, never the source
//! of truth: its balance always equals the sum of applied entry amounts and
//! can be rebuilt from them at any time (the reconciliation contract). The
//! version counter increments on every applied entry and drives optimistic
//! concurrency at the store layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pointbrew_shared::types::AccountId;

/// Derived balance and concurrency metadata for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Identity bound to the external authenticated user.
    pub account_id: AccountId,
    /// Non-negative point balance; sum of applied entry amounts.
    pub balance: i64,
    /// Monotonically increasing counter, +1 per applied entry. Version 0
    /// means the account has no applied entries yet.
    pub version: i64,
    /// Timestamp of the last successful reconciliation.
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl Account {
    /// A fresh account, created lazily on first ledger activity.
    #[must_use]
    pub const fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            balance: 0,
            version: 0,
            last_reconciled_at: None,
        }
    }

    /// Balance after applying `amount`, or `None` if it would go negative
    /// (or overflow). A `None` here means the entry must be rejected, not
    /// applied.
    #[must_use]
    pub fn balance_after(&self, amount: i64) -> Option<i64> {
        let next = self.balance.checked_add(amount)?;
        (next >= 0).then_some(next)
    }

    /// Version the account will carry after the next applied entry.
    #[must_use]
    pub const fn next_version(&self) -> i64 {
        self.version + 1
    }
}
