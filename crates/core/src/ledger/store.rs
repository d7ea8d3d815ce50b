//! Storage abstraction for the ledger.
//!
//! The coordinator is written against this trait, never against a concrete
//! database. The contract is deliberately small: one consistent read
//! (`snapshot`) and one conditional write (`commit`) carry the whole
//! concurrency story; everything else is plain queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use pointbrew_shared::types::{AccountId, EntryId, IdempotencyKey, PageCursor};

use super::account::Account;
use super::entry::{EntryStatus, LedgerEntry};

/// Errors a store implementation may surface.
///
/// Conflicts are part of the protocol, not failures: the coordinator
/// resolves both conflict variants by re-reading and retrying.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The conditional write lost the race: the account version moved
    /// between snapshot and commit.
    #[error("account version changed since snapshot")]
    VersionConflict,

    /// Another writer inserted an entry with the same (account,
    /// idempotency key) pair first.
    #[error("idempotency key already recorded for this account")]
    DuplicateIdempotencyKey,

    /// The store itself failed (connectivity, timeout, corruption).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// What the store knows about an idempotency key at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyState {
    /// No entry carries this key for the account.
    NotSeen,
    /// An entry with this key exists.
    Seen {
        /// The entry holding the key.
        entry_id: EntryId,
        /// Its status at snapshot time.
        status: EntryStatus,
    },
}

/// One consistent read of everything the coordinator needs to decide.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    /// The account row, or a fresh zero-balance account (version 0) if the
    /// account has never been written. Version 0 tells `commit` to create
    /// it.
    pub account: Account,
    /// State of the candidate's idempotency key.
    pub idempotency: IdempotencyState,
    /// Applied redemptions counted since the given day start, for the
    /// daily-cap policy rule.
    pub redemptions_today: u64,
}

/// One atomic conditional write.
///
/// The store must apply the whole request or none of it, and must fail with
/// [`StoreError::VersionConflict`] if the account's stored version is not
/// `expected_version` at write time.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    /// The entry to insert.
    pub entry: LedgerEntry,
    /// Account version observed at snapshot time. 0 means the account row
    /// does not exist yet and must be created.
    pub expected_version: i64,
    /// `Some(balance)` applies the entry: set the account balance and bump
    /// the version to `expected_version + 1`. `None` records a rejected
    /// entry without touching balance or version (the account row is still
    /// created at version 0 if absent, so the rejection is attributable).
    pub new_balance: Option<i64>,
    /// When set, also stamp the account's `last_reconciled_at`.
    pub reconciled_at: Option<DateTime<Utc>>,
}

/// A page of entries plus the cursor for the next one.
#[derive(Debug, Clone)]
pub struct EntryPage {
    /// Entries in this page.
    pub entries: Vec<LedgerEntry>,
    /// Cursor to resume from, `None` when this is the last page.
    pub next_cursor: Option<PageCursor>,
}

/// Persistence contract the transaction coordinator drives.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Reads the account, the idempotency state for `key`, and the count of
    /// applied redemptions since `day_start`, all from one consistent view.
    async fn snapshot(
        &self,
        account_id: &AccountId,
        key: &IdempotencyKey,
        day_start: DateTime<Utc>,
    ) -> Result<AccountSnapshot, StoreError>;

    /// Atomically inserts the entry and updates the account, conditional on
    /// the account version. See [`CommitRequest`] for the exact semantics.
    async fn commit(&self, request: CommitRequest) -> Result<(), StoreError>;

    /// Fetches one entry by ID.
    async fn entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, StoreError>;

    /// Loads the account row, `None` if it has never been written.
    async fn load_account(&self, account_id: &AccountId) -> Result<Option<Account>, StoreError>;

    /// Applied entries for an account, oldest first, keyed by
    /// `(created_at, id)`. Used by reconciliation to replay history.
    async fn applied_entries(
        &self,
        account_id: &AccountId,
        cursor: Option<PageCursor>,
        limit: u64,
    ) -> Result<EntryPage, StoreError>;

    /// All entries for an account, newest first. Used by the history API.
    async fn history(
        &self,
        account_id: &AccountId,
        cursor: Option<PageCursor>,
        limit: u64,
    ) -> Result<EntryPage, StoreError>;

    /// Accounts whose `last_reconciled_at` is missing or older than
    /// `cutoff`, capped at `limit`.
    async fn accounts_due_for_reconciliation(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<AccountId>, StoreError>;

    /// Stamps `last_reconciled_at` without writing an entry, conditional on
    /// the account version. Used when reconciliation finds zero drift.
    async fn mark_reconciled(
        &self,
        account_id: &AccountId,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}
