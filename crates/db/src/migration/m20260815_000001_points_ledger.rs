//! Initial points-ledger schema.
//!
//! Creates the accounts aggregate table and the append-only ledger entries
//! table. The unique `(account_id, idempotency_key)` index is what makes
//! the idempotency guard safe under concurrency; the engine relies on the
//! database enforcing it, not on application checks.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(LEDGER_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS ledger_entries CASCADE; DROP TABLE IF EXISTS accounts CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const LEDGER_SQL: &str = r"
-- Account aggregates: derived balance plus the optimistic-concurrency
-- version. Rebuildable from ledger_entries.
CREATE TABLE accounts (
    account_id VARCHAR(128) PRIMARY KEY,
    balance BIGINT NOT NULL DEFAULT 0,
    version BIGINT NOT NULL DEFAULT 0,
    last_reconciled_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_balance_non_negative CHECK (balance >= 0),
    CONSTRAINT chk_version_non_negative CHECK (version >= 0)
);

-- Append-only ledger entries: the source of truth for balances.
CREATE TABLE ledger_entries (
    id UUID PRIMARY KEY,
    account_id VARCHAR(128) NOT NULL REFERENCES accounts(account_id),
    idempotency_key VARCHAR(256) NOT NULL,
    kind VARCHAR(16) NOT NULL,
    amount BIGINT NOT NULL,
    reason VARCHAR(32) NOT NULL,
    status VARCHAR(16) NOT NULL,
    deny_code VARCHAR(32),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_amount_nonzero CHECK (amount <> 0),
    CONSTRAINT chk_kind CHECK (kind IN ('accrual', 'redemption', 'adjustment')),
    CONSTRAINT chk_status CHECK (status IN ('pending', 'applied', 'rejected'))
);

-- The idempotency guard: at most one entry per (account, key).
CREATE UNIQUE INDEX uq_ledger_entries_account_key
    ON ledger_entries(account_id, idempotency_key);

-- History reads and reconciliation replay, keyed like the page cursor.
CREATE INDEX idx_ledger_entries_account_created
    ON ledger_entries(account_id, created_at, id);

-- Daily-cap counting: applied redemptions in a time window.
CREATE INDEX idx_ledger_entries_redemptions
    ON ledger_entries(account_id, created_at)
    WHERE kind = 'redemption' AND status = 'applied';

-- Reconciliation scheduling: stalest accounts first.
CREATE INDEX idx_accounts_reconciled ON accounts(last_reconciled_at NULLS FIRST);
";
