//! Postgres implementation of the ledger store contract.
//!
//! Atomicity comes from one database transaction per `commit`, and the
//! optimistic-concurrency check is a conditional `UPDATE ... WHERE version
//! = expected`: zero rows affected means the account moved and the caller
//! lost the race. The unique `(account_id, idempotency_key)` index enforces
//! the idempotency guard at the storage layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionError,
    TransactionTrait,
};

use pointbrew_core::ledger::{
    Account, AccountSnapshot, CommitRequest, EntryKind, EntryPage, EntryReason, EntryStatus,
    IdempotencyState, LedgerEntry, LedgerStore, StoreError,
};
use pointbrew_core::policy::DenyCode;
use pointbrew_shared::types::{AccountId, EntryId, IdempotencyKey, PageCursor};

use crate::entities::{accounts, ledger_entries};

/// `LedgerStore` backed by Postgres through `SeaORM`.
pub struct PgLedgerStore {
    db: DatabaseConnection,
}

impl PgLedgerStore {
    /// Wraps an established connection pool.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn unavailable(err: DbErr) -> StoreError {
    StoreError::Unavailable(err.to_string())
}

fn unwrap_txn_err(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Connection(db) => StoreError::Unavailable(db.to_string()),
        TransactionError::Transaction(e) => e,
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn account_from_model(model: accounts::Model) -> Account {
    Account {
        account_id: AccountId::new(model.account_id),
        balance: model.balance,
        version: model.version,
        last_reconciled_at: model.last_reconciled_at.map(|at| at.with_timezone(&Utc)),
    }
}

fn entry_to_model(entry: &LedgerEntry) -> ledger_entries::ActiveModel {
    ledger_entries::ActiveModel {
        id: Set(entry.id.into_inner()),
        account_id: Set(entry.account_id.as_str().to_owned()),
        idempotency_key: Set(entry.idempotency_key.as_str().to_owned()),
        kind: Set(entry.kind.as_str().to_owned()),
        amount: Set(entry.amount),
        reason: Set(entry.reason.as_str().to_owned()),
        status: Set(entry.status.as_str().to_owned()),
        deny_code: Set(entry.denied.map(|d| d.as_str().to_owned())),
        created_at: Set(entry.created_at.into()),
    }
}

fn entry_from_model(model: ledger_entries::Model) -> Result<LedgerEntry, StoreError> {
    let corrupt = |field: &str, value: &str| {
        StoreError::Unavailable(format!(
            "corrupt entry row {}: bad {field} {value:?}",
            model.id
        ))
    };

    let kind = EntryKind::parse(&model.kind).ok_or_else(|| corrupt("kind", &model.kind))?;
    let reason =
        EntryReason::parse(&model.reason).ok_or_else(|| corrupt("reason", &model.reason))?;
    let status =
        EntryStatus::parse(&model.status).ok_or_else(|| corrupt("status", &model.status))?;
    let denied = match &model.deny_code {
        None => None,
        Some(code) => Some(DenyCode::parse(code).ok_or_else(|| corrupt("deny_code", code))?),
    };

    Ok(LedgerEntry {
        id: EntryId::from_uuid(model.id),
        account_id: AccountId::new(model.account_id),
        idempotency_key: IdempotencyKey::new(model.idempotency_key),
        kind,
        amount: model.amount,
        reason,
        status,
        denied,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

/// Keyset filter matching the `(created_at, id)` index order.
fn cursor_condition(cursor: PageCursor, ascending: bool) -> Condition {
    let ts = cursor.created_at;
    if ascending {
        Condition::any()
            .add(ledger_entries::Column::CreatedAt.gt(ts))
            .add(
                Condition::all()
                    .add(ledger_entries::Column::CreatedAt.eq(ts))
                    .add(ledger_entries::Column::Id.gt(cursor.entry_id)),
            )
    } else {
        Condition::any()
            .add(ledger_entries::Column::CreatedAt.lt(ts))
            .add(
                Condition::all()
                    .add(ledger_entries::Column::CreatedAt.eq(ts))
                    .add(ledger_entries::Column::Id.lt(cursor.entry_id)),
            )
    }
}

fn page_from_models(
    models: Vec<ledger_entries::Model>,
    limit: u64,
) -> Result<EntryPage, StoreError> {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let has_more = models.len() > limit;
    let mut entries = models
        .into_iter()
        .map(entry_from_model)
        .collect::<Result<Vec<_>, _>>()?;
    entries.truncate(limit);

    let next_cursor = if has_more {
        entries
            .last()
            .map(|e| PageCursor::new(e.created_at, e.id.into_inner()))
    } else {
        None
    };

    Ok(EntryPage {
        entries,
        next_cursor,
    })
}

/// Applies the account-side effect of a commit inside `txn`.
async fn write_account(txn: &DatabaseTransaction, request: &CommitRequest) -> Result<(), StoreError> {
    let entry = &request.entry;
    let account_id = entry.account_id.as_str().to_owned();
    let now = entry.created_at;

    if let Some(balance) = request.new_balance {
        let mut update = accounts::Entity::update_many()
            .col_expr(accounts::Column::Balance, Expr::value(balance))
            .col_expr(
                accounts::Column::Version,
                Expr::value(request.expected_version + 1),
            )
            .col_expr(accounts::Column::UpdatedAt, Expr::value(now))
            .filter(accounts::Column::AccountId.eq(account_id.clone()))
            .filter(accounts::Column::Version.eq(request.expected_version));
        if let Some(at) = request.reconciled_at {
            update = update.col_expr(accounts::Column::LastReconciledAt, Expr::value(at));
        }

        let result = update.exec(txn).await.map_err(unavailable)?;
        if result.rows_affected == 1 {
            return Ok(());
        }
        if request.expected_version != 0 {
            return Err(StoreError::VersionConflict);
        }

        // First applied entry for this account: create the row at
        // version 1. A unique violation means a concurrent writer created
        // it first, which is just a lost race.
        let model = accounts::ActiveModel {
            account_id: Set(account_id),
            balance: Set(balance),
            version: Set(1),
            last_reconciled_at: Set(request.reconciled_at.map(Into::into)),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };
        accounts::Entity::insert(model)
            .exec(txn)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    StoreError::VersionConflict
                } else {
                    unavailable(err)
                }
            })?;
        return Ok(());
    }

    // Rejected entry: balance and version stay put, but the decision must
    // have been made against the current version. A conditional no-op
    // update on the same `version =` filter as the applied path surfaces a
    // concurrent writer as zero rows affected and row-locks the account
    // until this transaction commits.
    let result = accounts::Entity::update_many()
        .col_expr(accounts::Column::UpdatedAt, Expr::value(now))
        .filter(accounts::Column::AccountId.eq(account_id.clone()))
        .filter(accounts::Column::Version.eq(request.expected_version))
        .exec(txn)
        .await
        .map_err(unavailable)?;
    if result.rows_affected == 1 {
        return Ok(());
    }
    if request.expected_version != 0 {
        return Err(StoreError::VersionConflict);
    }

    // First activity on this account is a rejection: create the row at
    // version 0 so the entry has a parent and the guard has a home.
    let model = accounts::ActiveModel {
        account_id: Set(account_id),
        balance: Set(0),
        version: Set(0),
        last_reconciled_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    accounts::Entity::insert(model)
        .exec(txn)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::VersionConflict
            } else {
                unavailable(err)
            }
        })?;
    Ok(())
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn snapshot(
        &self,
        account_id: &AccountId,
        key: &IdempotencyKey,
        day_start: DateTime<Utc>,
    ) -> Result<AccountSnapshot, StoreError> {
        let account_id = account_id.clone();
        let key = key.clone();

        self.db
            .transaction::<_, AccountSnapshot, StoreError>(move |txn| {
                Box::pin(async move {
                    let account = accounts::Entity::find_by_id(account_id.as_str().to_owned())
                        .one(txn)
                        .await
                        .map_err(unavailable)?
                        .map_or_else(|| Account::new(account_id.clone()), account_from_model);

                    let existing = ledger_entries::Entity::find()
                        .filter(ledger_entries::Column::AccountId.eq(account_id.as_str()))
                        .filter(ledger_entries::Column::IdempotencyKey.eq(key.as_str()))
                        .one(txn)
                        .await
                        .map_err(unavailable)?;
                    let idempotency = match existing {
                        None => IdempotencyState::NotSeen,
                        Some(model) => {
                            let status = EntryStatus::parse(&model.status).ok_or_else(|| {
                                StoreError::Unavailable(format!(
                                    "corrupt entry row {}: bad status {:?}",
                                    model.id, model.status
                                ))
                            })?;
                            IdempotencyState::Seen {
                                entry_id: EntryId::from_uuid(model.id),
                                status,
                            }
                        }
                    };

                    let redemptions_today = ledger_entries::Entity::find()
                        .filter(ledger_entries::Column::AccountId.eq(account_id.as_str()))
                        .filter(ledger_entries::Column::Kind.eq(EntryKind::Redemption.as_str()))
                        .filter(ledger_entries::Column::Status.eq(EntryStatus::Applied.as_str()))
                        .filter(ledger_entries::Column::CreatedAt.gte(day_start))
                        .count(txn)
                        .await
                        .map_err(unavailable)?;

                    Ok(AccountSnapshot {
                        account,
                        idempotency,
                        redemptions_today,
                    })
                })
            })
            .await
            .map_err(unwrap_txn_err)
    }

    async fn commit(&self, request: CommitRequest) -> Result<(), StoreError> {
        self.db
            .transaction::<_, (), StoreError>(move |txn| {
                Box::pin(async move {
                    // Account first: version conflicts must surface before
                    // the entry insert, and the FK needs the row to exist.
                    write_account(txn, &request).await?;

                    ledger_entries::Entity::insert(entry_to_model(&request.entry))
                        .exec(txn)
                        .await
                        .map_err(|err| {
                            if is_unique_violation(&err) {
                                StoreError::DuplicateIdempotencyKey
                            } else {
                                unavailable(err)
                            }
                        })?;
                    Ok(())
                })
            })
            .await
            .map_err(unwrap_txn_err)
    }

    async fn entry(&self, entry_id: EntryId) -> Result<Option<LedgerEntry>, StoreError> {
        let model = ledger_entries::Entity::find_by_id(entry_id.into_inner())
            .one(&self.db)
            .await
            .map_err(unavailable)?;
        model.map(entry_from_model).transpose()
    }

    async fn load_account(&self, account_id: &AccountId) -> Result<Option<Account>, StoreError> {
        let model = accounts::Entity::find_by_id(account_id.as_str().to_owned())
            .one(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(model.map(account_from_model))
    }

    async fn applied_entries(
        &self,
        account_id: &AccountId,
        cursor: Option<PageCursor>,
        limit: u64,
    ) -> Result<EntryPage, StoreError> {
        let mut query = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::AccountId.eq(account_id.as_str()))
            .filter(ledger_entries::Column::Status.eq(EntryStatus::Applied.as_str()))
            .order_by_asc(ledger_entries::Column::CreatedAt)
            .order_by_asc(ledger_entries::Column::Id)
            .limit(limit.saturating_add(1));
        if let Some(cursor) = cursor {
            query = query.filter(cursor_condition(cursor, true));
        }

        let models = query.all(&self.db).await.map_err(unavailable)?;
        page_from_models(models, limit)
    }

    async fn history(
        &self,
        account_id: &AccountId,
        cursor: Option<PageCursor>,
        limit: u64,
    ) -> Result<EntryPage, StoreError> {
        let mut query = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::AccountId.eq(account_id.as_str()))
            .order_by_desc(ledger_entries::Column::CreatedAt)
            .order_by_desc(ledger_entries::Column::Id)
            .limit(limit.saturating_add(1));
        if let Some(cursor) = cursor {
            query = query.filter(cursor_condition(cursor, false));
        }

        let models = query.all(&self.db).await.map_err(unavailable)?;
        page_from_models(models, limit)
    }

    async fn accounts_due_for_reconciliation(
        &self,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<AccountId>, StoreError> {
        let models = accounts::Entity::find()
            .filter(
                Condition::any()
                    .add(accounts::Column::LastReconciledAt.is_null())
                    .add(accounts::Column::LastReconciledAt.lt(cutoff)),
            )
            .order_by_asc(accounts::Column::AccountId)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(unavailable)?;
        Ok(models
            .into_iter()
            .map(|m| AccountId::new(m.account_id))
            .collect())
    }

    async fn mark_reconciled(
        &self,
        account_id: &AccountId,
        expected_version: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = accounts::Entity::update_many()
            .col_expr(accounts::Column::LastReconciledAt, Expr::value(at))
            .col_expr(accounts::Column::UpdatedAt, Expr::value(at))
            .filter(accounts::Column::AccountId.eq(account_id.as_str()))
            .filter(accounts::Column::Version.eq(expected_version))
            .exec(&self.db)
            .await
            .map_err(unavailable)?;
        if result.rows_affected == 0 {
            return Err(StoreError::VersionConflict);
        }
        Ok(())
    }
}
