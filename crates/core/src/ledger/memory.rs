//! In-memory [`LedgerStore`] for tests and local development.
//!
//! A single mutex around all state gives every operation the atomicity the
//! store contract requires. Not suitable for production, but it implements
//! the contract exactly, including both conflict variants, so the
//! coordinator and reconciler can be tested against it.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use pointbrew_shared::types::{AccountId, EntryId, IdempotencyKey, PageCursor};

use super::account::Account;
use super::entry::{EntryKind, EntryStatus, LedgerEntry};
use super::store::{
    AccountSnapshot, CommitRequest, EntryPage, IdempotencyState, LedgerStore, StoreError,
};

#[derive(Default)]
struct Inner {
    accounts: HashMap<AccountId, Account>,
    entries: Vec<LedgerEntry>,
    keys: HashMap<(AccountId, IdempotencyKey), EntryId>,
    injected_conflicts: u32,
}

/// Mutex-backed store holding everything in process memory.
#[derive(Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

/// Sort key matching the storage index: microsecond timestamp, then ID.
fn sort_key(entry: &LedgerEntry) -> (i64, Uuid) {
    (entry.created_at.timestamp_micros(), entry.id.into_inner())
}

fn cursor_key(cursor: PageCursor) -> (i64, Uuid) {
    (cursor.created_at.timestamp_micros(), cursor.entry_id)
}

impl MemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` commits fail with a version conflict, regardless
    /// of the expected version. Test support for exercising retry paths.
    pub async fn inject_commit_conflicts(&self, n: u32) {
        self.inner.lock().await.injected_conflicts = n;
    }

    /// Overwrites an account balance without writing an entry, creating
    /// drift between the aggregate and its history. Test support for
    /// reconciliation.
    pub async fn set_balance_unchecked(&self, account_id: &AccountId, balance: i64) {
        let mut inner = self.inner.lock().await;
        if let Some(account) = inner.accounts.get_mut(account_id) {
            account.balance = balance;
        } else {
            let mut account = Account::new(account_id.clone());
            account.balance = balance;
            inner.accounts.insert(account_id.clone(), account);
        }
    }

    /// Number of entries stored, across all accounts.
    pub async fn entry_count(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    fn page(
        mut entries: Vec<LedgerEntry>,
        cursor: Option<PageCursor>,
        limit: u64,
        ascending: bool,
    ) -> EntryPage {
        entries.sort_by_key(sort_key);
        if !ascending {
            entries.reverse();
        }
        if let Some(cursor) = cursor {
            let key = cursor_key(cursor);
            entries.retain(|e| {
                if ascending {
                    sort_key(e) > key
                } else {
                    sort_key(e) < key
                }
            });
        }

        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        let has_more = entries.len() > limit;
        entries.truncate(limit);
        let next_cursor = if has_more {
            entries
                .last()
                .map(|e| PageCursor::new(e.created_at, e.id.into_inner()))
        } else {
            None
        };

        EntryPage {
            entries,
            next_cursor,
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn snapshot(
        &self,
        account_id: &AccountId,
        key: &IdempotencyKey,
        day_start: DateTime<Utc>,
    ) -> Result<AccountSnapshot, StoreError> {
        let inner = self.inner.lock().await;

        let account = inner
            .accounts
            .get(account_id)
            .cloned()
            .unwrap_or_else(|| Account::new(account_id.clone()));

        let idempotency = match inner.keys.get(&(account_id.clone(), key.clone())) {
            None => IdempotencyState::NotSeen,
            Some(entry_id) => {
                let status = inner
                    .entries
                    .iter()
                    .find(|e| e.id == *entry_id)
                    .map_or(EntryStatus::Pending, |e| e.status);
                IdempotencyState::Seen {
                    entry_id: *entry_id,
                    status,
                }
            }
        };

        let redemptions_today = inner
            .entries
            .iter()
            .filter(|e| {
                e.account_id == *account_id
                    && e.kind == EntryKind::Redemption
                    && e.status == EntryStatus::Applied
                    && e.created_at >= day_start
            })
            .count() as u64;

        Ok(AccountSnapshot {
            account,
            idempotency,
            redemptions_today,
        })
    }

    async fn commit(&self, request: CommitRequest) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;

        if inner.injected_conflicts > 0 {
            inner.injected_conflicts -= 1;
            return Err(StoreError::VersionConflict);
        }

        let account_id = request.entry.account_id.clone();
        let key = (account_id.clone(), request.entry.idempotency_key.clone());
        if inner.keys.contains_key(&key) {
            return Err(StoreError::DuplicateIdempotencyKey);
        }

        let current_version = inner.accounts.get(&account_id).map_or(0, |a| a.version);
        if current_version != request.expected_version {
            return Err(StoreError::VersionConflict);
        }

        let account = inner
            .accounts
            .entry(account_id)
            .or_insert_with_key(|id| Account::new(id.clone()));
        if let Some(balance) = request.new_balance {
            account.balance = balance;
            account.version = request.expected_version + 1;
        }
        if let Some(at) = request.reconciled_at {
            account.last_reconciled_at = Some(at);
        }

        inner.keys.insert(key, request.entry.id);
        inner.entries.push(request.entry);
        Ok(())
    }

    async fn entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.iter().find(|e| e.id == entry_id).cloned())
    }

    async fn load_account(&self, account_id: &AccountId) -> Result<Option<Account>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.accounts.get(account_id).cloned())
    }

    async fn applied_entries(
        &self,
        account_id: &AccountId,
        cursor: Option<PageCursor>,
        limit: u64,
    ) -> Result<EntryPage, StoreError> {
        let inner = self.inner.lock().await;
        let entries: Vec<_> = inner
            .entries
            .iter()
            .filter(|e| e.account_id == *account_id && e.is_applied())
            .cloned()
            .collect();
        Ok(Self::page(entries, cursor, limit, true))
    }

    async fn history(
        &self,
        account_id: &AccountId,
        cursor: Option<PageCursor>,
        limit: u64,
    ) -> Result<EntryPage, StoreError> {
        let inner = self.inner.lock().await;
        let entries: Vec<_> = inner
            .entries
            .iter()
            .filter(|e| e.account_id == *account_id)
            .cloned()
            .collect();
        Ok(Self::page(entries, cursor, limit, false))
    }

    async fn accounts_due_for_reconciliation(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<AccountId>, StoreError> {
        let inner = self.inner.lock().await;
        let mut due: Vec<_> = inner
            .accounts
            .values()
            .filter(|a| a.last_reconciled_at.is_none_or(|at| at < cutoff))
            .map(|a| a.account_id.clone())
            .collect();
        due.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        due.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn mark_reconciled(
        &self,
        account_id: &AccountId,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(account) = inner.accounts.get_mut(account_id) else {
            return Err(StoreError::VersionConflict);
        };
        if account.version != expected_version {
            return Err(StoreError::VersionConflict);
        }
        account.last_reconciled_at = Some(at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::entry::{CandidateEntry, EntryReason};

    fn account() -> AccountId {
        AccountId::new("acct-1")
    }

    fn applied_accrual(key: &str, amount: i64) -> LedgerEntry {
        let candidate = CandidateEntry::accrual(
            account(),
            IdempotencyKey::new(key),
            amount,
            EntryReason::Purchase,
        )
        .unwrap();
        LedgerEntry::applied(&candidate, Utc::now())
    }

    async fn seed(store: &MemoryLedgerStore, n: i64) {
        for i in 0..n {
            store
                .commit(CommitRequest {
                    entry: applied_accrual(&format!("key-{i}"), 10),
                    expected_version: i,
                    new_balance: Some((i + 1) * 10),
                    reconciled_at: None,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_snapshot_of_unknown_account_is_fresh() {
        let store = MemoryLedgerStore::new();
        let snap = store
            .snapshot(&account(), &IdempotencyKey::new("k"), Utc::now())
            .await
            .unwrap();
        assert_eq!(snap.account.version, 0);
        assert_eq!(snap.account.balance, 0);
        assert_eq!(snap.idempotency, IdempotencyState::NotSeen);
        assert_eq!(snap.redemptions_today, 0);
    }

    #[tokio::test]
    async fn test_commit_applies_balance_and_version() {
        let store = MemoryLedgerStore::new();
        seed(&store, 1).await;

        let acct = store.load_account(&account()).await.unwrap().unwrap();
        assert_eq!(acct.balance, 10);
        assert_eq!(acct.version, 1);
    }

    #[tokio::test]
    async fn test_commit_detects_version_conflict() {
        let store = MemoryLedgerStore::new();
        seed(&store, 1).await;

        let err = store
            .commit(CommitRequest {
                entry: applied_accrual("stale", 10),
                expected_version: 0,
                new_balance: Some(10),
                reconciled_at: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::VersionConflict);
    }

    #[tokio::test]
    async fn test_commit_detects_duplicate_key() {
        let store = MemoryLedgerStore::new();
        seed(&store, 1).await;

        let err = store
            .commit(CommitRequest {
                entry: applied_accrual("key-0", 10),
                expected_version: 1,
                new_balance: Some(20),
                reconciled_at: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateIdempotencyKey);
    }

    #[tokio::test]
    async fn test_rejected_commit_checks_version() {
        let store = MemoryLedgerStore::new();
        seed(&store, 1).await;

        // A rejection decided against version 0 must not land once a
        // concurrent writer has moved the account to version 1.
        let candidate = CandidateEntry::redemption(
            account(),
            IdempotencyKey::new("stale-denial"),
            "FREE-COFFEE",
            80,
        )
        .unwrap();
        let entry = LedgerEntry::rejected(
            &candidate,
            crate::policy::DenyCode::InsufficientBalance,
            Utc::now(),
        );
        let err = store
            .commit(CommitRequest {
                entry,
                expected_version: 0,
                new_balance: None,
                reconciled_at: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::VersionConflict);
        assert_eq!(store.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_rejected_commit_leaves_account_untouched() {
        let store = MemoryLedgerStore::new();
        seed(&store, 1).await;

        let candidate = CandidateEntry::redemption(
            account(),
            IdempotencyKey::new("denied"),
            "FREE-COFFEE",
            80,
        )
        .unwrap();
        let entry = LedgerEntry::rejected(
            &candidate,
            crate::policy::DenyCode::InsufficientBalance,
            Utc::now(),
        );
        store
            .commit(CommitRequest {
                entry,
                expected_version: 1,
                new_balance: None,
                reconciled_at: None,
            })
            .await
            .unwrap();

        let acct = store.load_account(&account()).await.unwrap().unwrap();
        assert_eq!(acct.balance, 10);
        assert_eq!(acct.version, 1);
    }

    #[tokio::test]
    async fn test_snapshot_sees_recorded_key() {
        let store = MemoryLedgerStore::new();
        seed(&store, 1).await;

        let snap = store
            .snapshot(&account(), &IdempotencyKey::new("key-0"), Utc::now())
            .await
            .unwrap();
        assert!(matches!(
            snap.idempotency,
            IdempotencyState::Seen {
                status: EntryStatus::Applied,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_history_pages_newest_first() {
        let store = MemoryLedgerStore::new();
        seed(&store, 5).await;

        let first = store.history(&account(), None, 2).await.unwrap();
        assert_eq!(first.entries.len(), 2);
        let cursor = first.next_cursor.expect("more pages");
        assert!(first.entries[0].created_at >= first.entries[1].created_at);

        let second = store.history(&account(), Some(cursor), 2).await.unwrap();
        assert_eq!(second.entries.len(), 2);
        // no overlap between pages
        for e in &second.entries {
            assert!(!first.entries.iter().any(|f| f.id == e.id));
        }

        let third = store
            .history(&account(), second.next_cursor, 2)
            .await
            .unwrap();
        assert_eq!(third.entries.len(), 1);
        assert!(third.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_applied_entries_oldest_first() {
        let store = MemoryLedgerStore::new();
        seed(&store, 3).await;

        let page = store.applied_entries(&account(), None, 10).await.unwrap();
        assert_eq!(page.entries.len(), 3);
        assert!(page.entries[0].created_at <= page.entries[2].created_at);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn test_due_for_reconciliation() {
        let store = MemoryLedgerStore::new();
        seed(&store, 1).await;

        let due = store
            .accounts_due_for_reconciliation(Utc::now(), 10)
            .await
            .unwrap();
        assert_eq!(due, vec![account()]);

        store
            .mark_reconciled(&account(), 1, Utc::now())
            .await
            .unwrap();
        let due = store
            .accounts_due_for_reconciliation(Utc::now() - chrono::Duration::hours(1), 10)
            .await
            .unwrap();
        assert!(due.is_empty());
    }

    #[tokio::test]
    async fn test_mark_reconciled_checks_version() {
        let store = MemoryLedgerStore::new();
        seed(&store, 1).await;

        let err = store
            .mark_reconciled(&account(), 0, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::VersionConflict);
    }
}
