//! Database layer with `SeaORM` entities and the Postgres ledger store.
//!
//! This crate provides:
//! - `SeaORM` entity definitions for accounts and ledger entries
//! - [`PgLedgerStore`], the production `LedgerStore` implementation
//! - Database migrations

pub mod entities;
pub mod migration;
pub mod store;

pub use store::PgLedgerStore;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};

use pointbrew_shared::config::DatabaseConfig;

/// Establishes a connection pool to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(&config.url);
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections);
    Database::connect(options).await
}
