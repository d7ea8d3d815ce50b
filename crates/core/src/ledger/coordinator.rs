//! Transaction coordinator.
//!
//! The single write path for the ledger. Every balance-affecting operation
//! goes through `apply`: snapshot the account, consult the idempotency
//! guard, evaluate policy for redemptions, then commit one entry and the
//! account update in a single conditional write. Lost races show up as
//! version conflicts and are retried with exponential backoff; the entry
//! plus its balance effect land atomically or not at all.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};

use pointbrew_shared::config::RetryConfig;
use pointbrew_shared::types::{AccountId, IdempotencyKey, PageCursor};

use super::entry::{CandidateEntry, EntryKind, EntryReason, EntryStatus, LedgerEntry};
use super::error::LedgerError;
use super::store::{CommitRequest, EntryPage, IdempotencyState, LedgerStore, StoreError};
use crate::policy::{self, DenyCode, DenyReason, PolicyDecision, RewardCatalog};

/// Backoff schedule for version-conflict retries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts before giving up with a contention error.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Builds the policy from configuration.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Delay before retrying after the given 1-based failed attempt.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Result of a successful apply: the entry as persisted and the balance
/// after it.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    /// The persisted entry (applied or rejected).
    pub entry: LedgerEntry,
    /// Account balance after this operation. Unchanged for rejected
    /// entries and replays.
    pub balance: i64,
    /// True when the idempotency guard replayed a previously recorded
    /// result instead of writing a new entry.
    pub replayed: bool,
}

/// How a single attempt ended, before retry classification.
enum AttemptError {
    /// Lost a race; snapshot again and retry.
    Retry,
    /// Not recoverable by retrying inside the coordinator.
    Fatal(LedgerError),
}

impl From<StoreError> for AttemptError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict | StoreError::DuplicateIdempotencyKey => Self::Retry,
            StoreError::Unavailable(msg) => Self::Fatal(LedgerError::StoreUnavailable(msg)),
        }
    }
}

/// Serializes balance-affecting operations per account.
pub struct Coordinator {
    store: Arc<dyn LedgerStore>,
    catalog: RewardCatalog,
    retry: RetryPolicy,
}

impl Coordinator {
    /// Creates a coordinator over the given store and reward catalog.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, catalog: RewardCatalog, retry: RetryPolicy) -> Self {
        Self {
            store,
            catalog,
            retry,
        }
    }

    /// Credits points to an account.
    ///
    /// # Errors
    ///
    /// Validation errors for bad input, [`LedgerError::DuplicateInFlight`]
    /// when the key is held by a pending entry, and
    /// [`LedgerError::Contention`] when retries are exhausted.
    pub async fn earn(
        &self,
        account_id: AccountId,
        key: IdempotencyKey,
        amount: i64,
        reason: EntryReason,
    ) -> Result<ApplyOutcome, LedgerError> {
        let candidate = CandidateEntry::accrual(account_id, key, amount, reason)?;
        self.apply(candidate).await
    }

    /// Redeems a reward, debiting its cost if policy allows.
    ///
    /// A policy denial with a known cost is recorded as a rejected entry
    /// and returned as a successful outcome carrying it; an unknown reward
    /// code cannot be priced, so it fails without persisting anything.
    ///
    /// # Errors
    ///
    /// [`LedgerError::PolicyDenied`] for unknown reward codes, plus the
    /// same validation and concurrency errors as [`Coordinator::earn`].
    pub async fn redeem(
        &self,
        account_id: AccountId,
        key: IdempotencyKey,
        reward_code: &str,
    ) -> Result<ApplyOutcome, LedgerError> {
        let Some(reward) = self.catalog.get(reward_code) else {
            return Err(LedgerError::PolicyDenied(DenyReason::UnknownReward {
                code: reward_code.to_string(),
            }));
        };
        let candidate =
            CandidateEntry::redemption(account_id, key, reward.code.clone(), reward.cost)?;
        self.apply(candidate).await
    }

    /// Applies a validated candidate through the retry loop.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Contention`] after `max_attempts` lost races;
    /// otherwise whatever the attempt surfaced as fatal.
    pub async fn apply(&self, candidate: CandidateEntry) -> Result<ApplyOutcome, LedgerError> {
        for attempt in 1..=self.retry.max_attempts {
            match self.attempt(&candidate).await {
                Ok(outcome) => return Ok(outcome),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Retry) => {
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.delay_for(attempt)).await;
                    }
                }
            }
        }
        Err(LedgerError::Contention {
            attempts: self.retry.max_attempts,
        })
    }

    /// One snapshot-decide-commit attempt.
    async fn attempt(&self, candidate: &CandidateEntry) -> Result<ApplyOutcome, AttemptError> {
        let now = Utc::now();
        let snapshot = self
            .store
            .snapshot(&candidate.account_id, &candidate.idempotency_key, day_start(now))
            .await?;

        // Idempotency guard: a terminal entry replays, a pending one backs
        // the caller off.
        match snapshot.idempotency {
            IdempotencyState::NotSeen => {}
            IdempotencyState::Seen { entry_id, status } => {
                if !status.is_terminal() {
                    return Err(AttemptError::Fatal(LedgerError::DuplicateInFlight {
                        entry_id,
                    }));
                }
                let entry = self.store.entry(entry_id).await?.ok_or_else(|| {
                    AttemptError::Fatal(LedgerError::Internal(format!(
                        "idempotency index points at missing entry {entry_id}"
                    )))
                })?;
                return Ok(ApplyOutcome {
                    entry,
                    balance: snapshot.account.balance,
                    replayed: true,
                });
            }
        }

        let account = &snapshot.account;

        // Policy gate for redemptions, against the snapshot balance.
        if candidate.kind == EntryKind::Redemption {
            let code = candidate.reward_code.as_deref().unwrap_or_default();
            if let PolicyDecision::Deny(reason) = policy::evaluate(
                &self.catalog,
                code,
                account.balance,
                snapshot.redemptions_today,
                now,
            ) {
                return self
                    .commit_rejected(candidate, account.version, account.balance, reason.code(), now)
                    .await;
            }
        }

        // Balance floor: applies to every kind, catches negative
        // adjustments and overflow.
        let Some(new_balance) = account.balance_after(candidate.amount) else {
            return self
                .commit_rejected(
                    candidate,
                    account.version,
                    account.balance,
                    DenyCode::InsufficientBalance,
                    now,
                )
                .await;
        };

        let entry = LedgerEntry::applied(candidate, now);
        self.store
            .commit(CommitRequest {
                entry: entry.clone(),
                expected_version: account.version,
                new_balance: Some(new_balance),
                reconciled_at: None,
            })
            .await?;

        Ok(ApplyOutcome {
            entry,
            balance: new_balance,
            replayed: false,
        })
    }

    /// Records a rejected entry for audit; balance and version stay put.
    async fn commit_rejected(
        &self,
        candidate: &CandidateEntry,
        expected_version: i64,
        balance: i64,
        denied: DenyCode,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, AttemptError> {
        let entry = LedgerEntry::rejected(candidate, denied, now);
        self.store
            .commit(CommitRequest {
                entry: entry.clone(),
                expected_version,
                new_balance: None,
                reconciled_at: None,
            })
            .await?;

        Ok(ApplyOutcome {
            entry,
            balance,
            replayed: false,
        })
    }

    /// Applies a reconciliation adjustment in a single attempt, pinning the
    /// resulting balance and the account version it corrects.
    ///
    /// No retry loop: the adjustment was computed from a specific version,
    /// and a conflict means the account moved and must be re-reconciled.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Contention`] when the version moved, otherwise store
    /// and replay errors as in [`Coordinator::apply`].
    pub(crate) async fn apply_adjustment_to(
        &self,
        candidate: CandidateEntry,
        target_balance: i64,
        expected_version: i64,
        reconciled_at: DateTime<Utc>,
    ) -> Result<ApplyOutcome, LedgerError> {
        let entry = LedgerEntry::applied(&candidate, reconciled_at);
        let result = self
            .store
            .commit(CommitRequest {
                entry: entry.clone(),
                expected_version,
                new_balance: Some(target_balance),
                reconciled_at: Some(reconciled_at),
            })
            .await;

        match result {
            Ok(()) => Ok(ApplyOutcome {
                entry,
                balance: target_balance,
                replayed: false,
            }),
            Err(StoreError::VersionConflict) => Err(LedgerError::Contention { attempts: 1 }),
            // The deterministic key was already written for this version:
            // a previous run got here first, replay its entry.
            Err(StoreError::DuplicateIdempotencyKey) => {
                let snapshot = self
                    .store
                    .snapshot(
                        &candidate.account_id,
                        &candidate.idempotency_key,
                        day_start(reconciled_at),
                    )
                    .await?;
                match snapshot.idempotency {
                    IdempotencyState::Seen { entry_id, status } if status == EntryStatus::Applied => {
                        let entry = self.store.entry(entry_id).await?.ok_or_else(|| {
                            LedgerError::Internal(format!(
                                "idempotency index points at missing entry {entry_id}"
                            ))
                        })?;
                        Ok(ApplyOutcome {
                            entry,
                            balance: snapshot.account.balance,
                            replayed: true,
                        })
                    }
                    _ => Err(LedgerError::Internal(
                        "adjustment key recorded without an applied entry".to_string(),
                    )),
                }
            }
            Err(err @ StoreError::Unavailable(_)) => Err(err.into()),
        }
    }

    /// Current balance; zero for accounts with no history.
    ///
    /// # Errors
    ///
    /// [`LedgerError::StoreUnavailable`] when the store fails.
    pub async fn balance(&self, account_id: &AccountId) -> Result<i64, LedgerError> {
        let account = self.store.load_account(account_id).await?;
        Ok(account.map_or(0, |a| a.balance))
    }

    /// Entry history, newest first, cursor-paginated.
    ///
    /// # Errors
    ///
    /// [`LedgerError::StoreUnavailable`] when the store fails.
    pub async fn history(
        &self,
        account_id: &AccountId,
        cursor: Option<PageCursor>,
        limit: u64,
    ) -> Result<EntryPage, LedgerError> {
        Ok(self.store.history(account_id, cursor, limit).await?)
    }

    /// The store this coordinator writes through.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// The catalog redemptions are priced against.
    #[must_use]
    pub fn catalog(&self) -> &RewardCatalog {
        &self.catalog
    }
}

/// Start of the UTC day containing `now`; the boundary for daily caps.
fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}
