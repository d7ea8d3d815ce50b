//! `SeaORM` entity definitions.

pub mod accounts;
pub mod ledger_entries;
