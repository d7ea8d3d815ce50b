//! Ledger entry domain types.
//!
//! Entries are pure data plus construction-time validation. Once an entry
//! reaches a terminal status (applied or rejected) it is immutable forever;
//! the ledger is append-only and the account balance is derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pointbrew_shared::types::{AccountId, EntryId, IdempotencyKey};

use super::error::LedgerError;
use crate::policy::DenyCode;

/// Kind of point-affecting event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Credits points to an account. Amount is always positive.
    Accrual,
    /// Debits points in exchange for a reward. Amount is always negative.
    Redemption,
    /// Correction entry; either sign, written by reconciliation or staff.
    Adjustment,
}

impl EntryKind {
    /// Stable string form used for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accrual => "accrual",
            Self::Redemption => "redemption",
            Self::Adjustment => "adjustment",
        }
    }

    /// Parses the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "accrual" => Some(Self::Accrual),
            "redemption" => Some(Self::Redemption),
            "adjustment" => Some(Self::Adjustment),
            _ => None,
        }
    }

    /// Returns true if `amount` has the sign this kind requires.
    #[must_use]
    pub const fn allows_amount(self, amount: i64) -> bool {
        match self {
            Self::Accrual => amount > 0,
            Self::Redemption => amount < 0,
            Self::Adjustment => amount != 0,
        }
    }
}

/// Enumerated cause of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryReason {
    /// Points earned from a purchase.
    Purchase,
    /// Points granted by a promotion.
    Promotion,
    /// Points redeemed against a reward code.
    RewardCode,
    /// Manual or reconciliation correction.
    ManualCorrection,
}

impl EntryReason {
    /// Stable string form used for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Promotion => "promotion",
            Self::RewardCode => "reward-code",
            Self::ManualCorrection => "manual-correction",
        }
    }

    /// Parses the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "purchase" => Some(Self::Purchase),
            "promotion" => Some(Self::Promotion),
            "reward-code" => Some(Self::RewardCode),
            "manual-correction" => Some(Self::ManualCorrection),
            _ => None,
        }
    }
}

/// Lifecycle status of an entry.
///
/// This engine writes terminal entries in a single atomic commit, so it
/// never produces `Pending` itself; the state exists for data written
/// before adoption or by degraded writers, and the idempotency guard must
/// handle it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// In flight; a concurrent attempt for the same key must back off.
    Pending,
    /// Counted in the account balance. Immutable.
    Applied,
    /// Recorded for audit, never counted. Immutable.
    Rejected,
}

impl EntryStatus {
    /// Stable string form used for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }

    /// Parses the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "applied" => Some(Self::Applied),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// Returns true for applied or rejected entries.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Rejected)
    }
}

/// A validated, not-yet-persisted point-affecting event.
///
/// Construction performs all caller-input validation; everything past this
/// point deals with well-formed data.
#[derive(Debug, Clone)]
pub struct CandidateEntry {
    /// Owning account (relation only, no ownership).
    pub account_id: AccountId,
    /// Caller-supplied retry token, unique per logical action.
    pub idempotency_key: IdempotencyKey,
    /// Kind of event.
    pub kind: EntryKind,
    /// Signed point delta. Never zero.
    pub amount: i64,
    /// Enumerated cause.
    pub reason: EntryReason,
    /// Reward code, present on redemption candidates only.
    pub reward_code: Option<String>,
}

impl CandidateEntry {
    /// Constructs a candidate, validating caller input.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the amount is zero, the sign is
    /// inconsistent with the kind, or the account ID or idempotency key is
    /// empty. Validation failures never reach storage.
    pub fn new(
        account_id: AccountId,
        idempotency_key: IdempotencyKey,
        kind: EntryKind,
        amount: i64,
        reason: EntryReason,
    ) -> Result<Self, LedgerError> {
        if account_id.is_empty() {
            return Err(LedgerError::EmptyAccountId);
        }
        if idempotency_key.is_empty() {
            return Err(LedgerError::EmptyIdempotencyKey);
        }
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if !kind.allows_amount(amount) {
            return Err(LedgerError::KindSignMismatch { kind, amount });
        }

        Ok(Self {
            account_id,
            idempotency_key,
            kind,
            amount,
            reason,
            reward_code: None,
        })
    }

    /// Constructs an accrual candidate (positive amount).
    pub fn accrual(
        account_id: AccountId,
        idempotency_key: IdempotencyKey,
        amount: i64,
        reason: EntryReason,
    ) -> Result<Self, LedgerError> {
        Self::new(
            account_id,
            idempotency_key,
            EntryKind::Accrual,
            amount,
            reason,
        )
    }

    /// Constructs a redemption candidate debiting `cost` points against a
    /// reward code.
    pub fn redemption(
        account_id: AccountId,
        idempotency_key: IdempotencyKey,
        reward_code: impl Into<String>,
        cost: i64,
    ) -> Result<Self, LedgerError> {
        let mut candidate = Self::new(
            account_id,
            idempotency_key,
            EntryKind::Redemption,
            -cost,
            EntryReason::RewardCode,
        )?;
        candidate.reward_code = Some(reward_code.into());
        Ok(candidate)
    }

    /// Constructs a correction candidate (either sign, nonzero).
    pub fn adjustment(
        account_id: AccountId,
        idempotency_key: IdempotencyKey,
        amount: i64,
    ) -> Result<Self, LedgerError> {
        Self::new(
            account_id,
            idempotency_key,
            EntryKind::Adjustment,
            amount,
            EntryReason::ManualCorrection,
        )
    }
}

/// An immutable record of a single point-affecting event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Globally unique identifier, never reused.
    pub id: EntryId,
    /// Owning account.
    pub account_id: AccountId,
    /// Caller-supplied retry token; `(account_id, idempotency_key)` is unique.
    pub idempotency_key: IdempotencyKey,
    /// Kind of event.
    pub kind: EntryKind,
    /// Signed point delta. Never zero.
    pub amount: i64,
    /// Enumerated cause.
    pub reason: EntryReason,
    /// Lifecycle status; terminal statuses are immutable.
    pub status: EntryStatus,
    /// Rejection cause, present on rejected entries.
    pub denied: Option<DenyCode>,
    /// Assigned at write time by the coordinator, never client-supplied.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Materializes an applied entry from a candidate.
    #[must_use]
    pub fn applied(candidate: &CandidateEntry, now: DateTime<Utc>) -> Self {
        Self::from_candidate(candidate, EntryStatus::Applied, None, now)
    }

    /// Materializes a rejected entry from a candidate, recording the
    /// rejection cause for audit.
    #[must_use]
    pub fn rejected(candidate: &CandidateEntry, denied: DenyCode, now: DateTime<Utc>) -> Self {
        Self::from_candidate(candidate, EntryStatus::Rejected, Some(denied), now)
    }

    fn from_candidate(
        candidate: &CandidateEntry,
        status: EntryStatus,
        denied: Option<DenyCode>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntryId::new(),
            account_id: candidate.account_id.clone(),
            idempotency_key: candidate.idempotency_key.clone(),
            kind: candidate.kind,
            amount: candidate.amount,
            reason: candidate.reason,
            status,
            denied,
            created_at: now,
        }
    }

    /// Returns true if this entry counts toward the account balance.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self.status, EntryStatus::Applied)
    }
}
