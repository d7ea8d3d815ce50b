//! Points ledger logic.
//!
//! This module implements the core ledger functionality:
//! - Immutable ledger entries (accruals, redemptions, adjustments)
//! - The account aggregate (derived balance + version counter)
//! - The transaction coordinator (atomic apply with optimistic concurrency)
//! - The storage abstraction the coordinator drives
//! - Error types for ledger operations

pub mod account;
pub mod coordinator;
pub mod entry;
pub mod error;
pub mod memory;
pub mod store;

#[cfg(test)]
mod coordinator_props;

pub use account::Account;
pub use coordinator::{ApplyOutcome, Coordinator, RetryPolicy};
pub use entry::{CandidateEntry, EntryKind, EntryReason, EntryStatus, LedgerEntry};
pub use error::LedgerError;
pub use memory::MemoryLedgerStore;
pub use store::{
    AccountSnapshot, CommitRequest, EntryPage, IdempotencyState, LedgerStore, StoreError,
};
