//! Property-based tests for the transaction coordinator.
//!
//! The invariants exercised here hold for any sequence of operations:
//! balances never go negative, the balance always equals the sum of
//! applied entry amounts, and an idempotency key has at most one effect.

use std::sync::Arc;

use proptest::prelude::*;
use tokio::runtime::Runtime;

use pointbrew_shared::types::{AccountId, IdempotencyKey};

use super::coordinator::{Coordinator, RetryPolicy};
use super::entry::EntryReason;
use super::memory::MemoryLedgerStore;
use super::store::LedgerStore;
use crate::policy::{Reward, RewardCatalog};

/// One client operation against a single account.
#[derive(Debug, Clone)]
enum Op {
    Earn(i64),
    Redeem(&'static str),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..500).prop_map(Op::Earn),
        Just(Op::Redeem("SMALL")),
        Just(Op::Redeem("LARGE")),
        Just(Op::Redeem("NO-SUCH-REWARD")),
    ]
}

fn catalog() -> RewardCatalog {
    let mut catalog = RewardCatalog::new();
    catalog.insert(Reward::new("SMALL", 30).unwrap());
    catalog.insert(Reward::new("LARGE", 250).unwrap());
    catalog
}

fn coordinator() -> (Arc<MemoryLedgerStore>, Coordinator) {
    let store = Arc::new(MemoryLedgerStore::new());
    let coordinator = Coordinator::new(store.clone(), catalog(), RetryPolicy::default());
    (store, coordinator)
}

fn account() -> AccountId {
    AccountId::new("acct-props")
}

/// Runs a sequence of operations, each with a distinct idempotency key.
async fn run_ops(coordinator: &Coordinator, ops: &[Op]) {
    for (i, op) in ops.iter().enumerate() {
        let key = IdempotencyKey::new(format!("op-{i}"));
        match op {
            Op::Earn(amount) => {
                coordinator
                    .earn(account(), key, *amount, EntryReason::Purchase)
                    .await
                    .expect("earn never fails on an uncontended store");
            }
            Op::Redeem(code) => {
                // Unknown rewards fail without persisting; everything else
                // lands as applied or rejected.
                let _ = coordinator.redeem(account(), key, code).await;
            }
        }
    }
}

/// Sum of applied entry amounts across the account's full history.
async fn applied_sum(coordinator: &Coordinator) -> i64 {
    let mut sum = 0;
    let mut cursor = None;
    loop {
        let page = coordinator
            .store()
            .applied_entries(&account(), cursor, 10)
            .await
            .unwrap();
        sum += page.entries.iter().map(|e| e.amount).sum::<i64>();
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => return sum,
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For any operation sequence, the balance never goes negative and
    /// always equals the sum of applied entry amounts.
    #[test]
    fn prop_balance_equals_applied_sum(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (_, coordinator) = coordinator();
            run_ops(&coordinator, &ops).await;

            let balance = coordinator.balance(&account()).await.unwrap();
            prop_assert!(balance >= 0, "balance went negative: {balance}");
            prop_assert_eq!(balance, applied_sum(&coordinator).await);
            Ok(())
        })?;
    }

    /// Replaying every operation with its original key changes nothing:
    /// same balance, same entry count.
    #[test]
    fn prop_replay_has_no_effect(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (store, coordinator) = coordinator();
            run_ops(&coordinator, &ops).await;

            let balance_before = coordinator.balance(&account()).await.unwrap();
            let entries_before = store.entry_count().await;

            run_ops(&coordinator, &ops).await;

            prop_assert_eq!(coordinator.balance(&account()).await.unwrap(), balance_before);
            prop_assert_eq!(store.entry_count().await, entries_before);
            Ok(())
        })?;
    }

    /// The account version counts exactly the applied entries.
    #[test]
    fn prop_version_counts_applied_entries(ops in prop::collection::vec(op_strategy(), 1..30)) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (_, coordinator) = coordinator();
            run_ops(&coordinator, &ops).await;

            let account_row = coordinator
                .store()
                .load_account(&account())
                .await
                .unwrap();
            let Some(account_row) = account_row else {
                // No operation persisted anything; nothing to check.
                return Ok(());
            };

            let mut applied = 0i64;
            let mut cursor = None;
            loop {
                let page = coordinator
                    .store()
                    .applied_entries(&account(), cursor, 10)
                    .await
                    .unwrap();
                applied += i64::try_from(page.entries.len()).unwrap();
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            prop_assert_eq!(account_row.version, applied);
            Ok(())
        })?;
    }
}
