//! Reconciliation job.
//!
//! Replays an account's applied entries and compares the sum against the
//! stored balance. Drift means the aggregate and its history disagree;
//! reconciliation amends the history with a correcting adjustment so the
//! entries once again sum to the user-visible balance. The stored balance
//! is treated as authoritative for the user and is never silently changed
//! here; the adjustment documents the discrepancy in the audit trail.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use pointbrew_shared::types::{AccountId, EntryId, IdempotencyKey};

use crate::ledger::{
    CandidateEntry, Coordinator, LedgerError, LedgerStore, StoreError,
};

/// Outcome of reconciling one account.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationReport {
    /// The reconciled account.
    pub account_id: AccountId,
    /// Sum of applied entry amounts.
    pub computed_balance: i64,
    /// Balance the account row carried before reconciliation.
    pub stored_balance: i64,
    /// `stored_balance - computed_balance`; zero when consistent.
    pub drift: i64,
    /// Correcting adjustment entry, written only when drift was found.
    pub adjustment: Option<EntryId>,
    /// When this reconciliation ran.
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    /// True when the account was consistent and nothing was written.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.drift == 0
    }
}

/// Outcome of one scheduler pass over due accounts.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Reports for accounts reconciled this pass.
    pub reports: Vec<ReconciliationReport>,
    /// Accounts that failed, with the error; the pass continues past them.
    pub failures: Vec<(AccountId, LedgerError)>,
}

impl RunReport {
    /// Number of accounts where drift was found and corrected.
    #[must_use]
    pub fn drift_count(&self) -> usize {
        self.reports.iter().filter(|r| !r.is_clean()).count()
    }
}

/// Verifies account aggregates against their entry history.
pub struct Reconciler {
    store: Arc<dyn LedgerStore>,
    coordinator: Arc<Coordinator>,
    page_size: u64,
}

impl Reconciler {
    /// Creates a reconciler reading from `store` and correcting through
    /// `coordinator`.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, coordinator: Arc<Coordinator>, page_size: u64) -> Self {
        Self {
            store,
            coordinator,
            page_size: page_size.max(1),
        }
    }

    /// Reconciles a single account.
    ///
    /// Zero drift stamps `last_reconciled_at` and writes nothing. Non-zero
    /// drift writes one adjustment entry under a deterministic idempotency
    /// key tied to the account version, so a crashed or duplicated run
    /// cannot correct twice.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Contention`] when the account changed mid-run (it
    /// will be reconciled again on a later pass), or store errors.
    pub async fn reconcile(
        &self,
        account_id: &AccountId,
    ) -> Result<ReconciliationReport, LedgerError> {
        let now = Utc::now();

        let Some(account) = self.store.load_account(account_id).await? else {
            // Never written: vacuously consistent, nothing to stamp.
            return Ok(ReconciliationReport {
                account_id: account_id.clone(),
                computed_balance: 0,
                stored_balance: 0,
                drift: 0,
                adjustment: None,
                reconciled_at: now,
            });
        };

        let computed = self.computed_balance(account_id).await?;
        let drift = account.balance - computed;

        if drift == 0 {
            match self
                .store
                .mark_reconciled(account_id, account.version, now)
                .await
            {
                // A concurrent write moved the version; the account is
                // active and will come due again.
                Ok(()) | Err(StoreError::VersionConflict) => {}
                Err(err) => return Err(err.into()),
            }
            return Ok(ReconciliationReport {
                account_id: account_id.clone(),
                computed_balance: computed,
                stored_balance: account.balance,
                drift: 0,
                adjustment: None,
                reconciled_at: now,
            });
        }

        let key = IdempotencyKey::new(format!("reconcile-{account_id}-v{}", account.version));
        let candidate = CandidateEntry::adjustment(account_id.clone(), key, drift)?;
        let outcome = self
            .coordinator
            .apply_adjustment_to(candidate, account.balance, account.version, now)
            .await?;

        Ok(ReconciliationReport {
            account_id: account_id.clone(),
            computed_balance: computed,
            stored_balance: account.balance,
            drift,
            adjustment: Some(outcome.entry.id),
            reconciled_at: now,
        })
    }

    /// Reconciles every account whose last reconciliation is older than
    /// `stale_after`, up to `limit` accounts. Per-account failures are
    /// collected, not fatal to the pass.
    ///
    /// # Errors
    ///
    /// Only when listing due accounts fails; individual account errors are
    /// returned in the report.
    pub async fn run_due(&self, stale_after: Duration, limit: u64) -> Result<RunReport, LedgerError> {
        let cutoff = Utc::now() - stale_after;
        let due = self
            .store
            .accounts_due_for_reconciliation(cutoff, limit)
            .await?;

        let mut report = RunReport::default();
        for account_id in due {
            match self.reconcile(&account_id).await {
                Ok(r) => report.reports.push(r),
                Err(err) => report.failures.push((account_id, err)),
            }
        }
        Ok(report)
    }

    /// Sum of applied entry amounts, folded page by page.
    async fn computed_balance(&self, account_id: &AccountId) -> Result<i64, LedgerError> {
        let mut sum: i64 = 0;
        let mut cursor = None;
        loop {
            let page = self
                .store
                .applied_entries(account_id, cursor, self.page_size)
                .await?;
            for entry in &page.entries {
                sum = sum.checked_add(entry.amount).ok_or_else(|| {
                    LedgerError::Internal(format!("balance overflow replaying {account_id}"))
                })?;
            }
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(sum),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{EntryKind, EntryReason, MemoryLedgerStore, RetryPolicy};
    use crate::policy::{Reward, RewardCatalog};

    fn account() -> AccountId {
        AccountId::new("acct-1")
    }

    fn setup() -> (Arc<MemoryLedgerStore>, Arc<Coordinator>, Reconciler) {
        let store = Arc::new(MemoryLedgerStore::new());
        let mut catalog = RewardCatalog::new();
        catalog.insert(Reward::new("FREE-COFFEE", 80).unwrap());
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            catalog,
            RetryPolicy::default(),
        ));
        let reconciler = Reconciler::new(store.clone(), coordinator.clone(), 2);
        (store, coordinator, reconciler)
    }

    async fn earn(coordinator: &Coordinator, key: &str, amount: i64) {
        coordinator
            .earn(
                account(),
                IdempotencyKey::new(key),
                amount,
                EntryReason::Purchase,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_clean_account_reports_zero_drift() {
        let (store, coordinator, reconciler) = setup();
        earn(&coordinator, "rcpt-1", 100).await;
        earn(&coordinator, "rcpt-2", 50).await;

        let report = reconciler.reconcile(&account()).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.computed_balance, 150);
        assert_eq!(report.stored_balance, 150);
        assert!(report.adjustment.is_none());

        let acct = store.load_account(&account()).await.unwrap().unwrap();
        assert!(acct.last_reconciled_at.is_some());
        // No adjustment entry was written.
        assert_eq!(store.entry_count().await, 2);
    }

    #[tokio::test]
    async fn test_unknown_account_is_vacuously_clean() {
        let (_, _, reconciler) = setup();
        let report = reconciler.reconcile(&account()).await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.stored_balance, 0);
    }

    #[tokio::test]
    async fn test_drift_corrected_with_adjustment() {
        let (store, coordinator, reconciler) = setup();
        earn(&coordinator, "rcpt-1", 100).await;
        // History says 100 but the aggregate says 130.
        store.set_balance_unchecked(&account(), 130).await;

        let report = reconciler.reconcile(&account()).await.unwrap();
        assert_eq!(report.drift, 30);
        let adjustment_id = report.adjustment.expect("adjustment written");

        // The user-visible balance is preserved and the history now sums
        // to it.
        let acct = store.load_account(&account()).await.unwrap().unwrap();
        assert_eq!(acct.balance, 130);

        let entry = store.entry(adjustment_id).await.unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Adjustment);
        assert_eq!(entry.amount, 30);
        assert_eq!(entry.reason, EntryReason::ManualCorrection);

        let after = reconciler.reconcile(&account()).await.unwrap();
        assert!(after.is_clean());
        assert_eq!(after.computed_balance, 130);
    }

    #[tokio::test]
    async fn test_negative_drift_corrected() {
        let (store, coordinator, reconciler) = setup();
        earn(&coordinator, "rcpt-1", 100).await;
        store.set_balance_unchecked(&account(), 60).await;

        let report = reconciler.reconcile(&account()).await.unwrap();
        assert_eq!(report.drift, -40);

        let acct = store.load_account(&account()).await.unwrap().unwrap();
        assert_eq!(acct.balance, 60);
        let after = reconciler.reconcile(&account()).await.unwrap();
        assert!(after.is_clean());
    }

    #[tokio::test]
    async fn test_pagination_covers_long_histories() {
        // page_size is 2; write 5 entries to force multiple pages.
        let (_, coordinator, reconciler) = setup();
        for i in 0..5 {
            earn(&coordinator, &format!("rcpt-{i}"), 10).await;
        }

        let report = reconciler.reconcile(&account()).await.unwrap();
        assert_eq!(report.computed_balance, 50);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_adjustment_key_is_deterministic_per_version() {
        let (store, coordinator, reconciler) = setup();
        earn(&coordinator, "rcpt-1", 100).await;
        store.set_balance_unchecked(&account(), 130).await;

        let report = reconciler.reconcile(&account()).await.unwrap();

        // A duplicated run replays the recorded correction instead of
        // correcting twice.
        let key = IdempotencyKey::new(format!("reconcile-{}-v1", account()));
        let candidate = CandidateEntry::adjustment(account(), key, 30).unwrap();
        let outcome = coordinator.apply(candidate).await.unwrap();
        assert!(outcome.replayed);
        assert_eq!(Some(outcome.entry.id), report.adjustment);
        assert_eq!(outcome.balance, 130);
    }

    #[tokio::test]
    async fn test_run_due_reconciles_stale_accounts() {
        let (store, coordinator, reconciler) = setup();
        earn(&coordinator, "rcpt-1", 100).await;
        store.set_balance_unchecked(&account(), 120).await;

        let run = reconciler.run_due(Duration::zero(), 10).await.unwrap();
        assert_eq!(run.reports.len(), 1);
        assert_eq!(run.drift_count(), 1);
        assert!(run.failures.is_empty());
    }

    #[tokio::test]
    async fn test_run_due_skips_recently_reconciled() {
        let (_, coordinator, reconciler) = setup();
        earn(&coordinator, "rcpt-1", 100).await;

        reconciler.reconcile(&account()).await.unwrap();
        let run = reconciler
            .run_due(Duration::hours(1), 10)
            .await
            .unwrap();
        assert!(run.reports.is_empty());
    }
}
