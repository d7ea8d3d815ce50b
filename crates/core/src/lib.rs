//! Core points-ledger logic for PointBrew.
//!
//! This crate contains pure business logic with ZERO web or database
//! dependencies. All domain types, validation rules, and the transaction
//! coordination algorithm live here.
//!
//! # Modules
//!
//! - `ledger` - Append-only entry log, account aggregate, and the
//!   transaction coordinator
//! - `policy` - Redemption policy evaluation against the reward catalog
//! - `reconcile` - Drift detection and repair from the entry history

pub mod ledger;
pub mod policy;
pub mod reconcile;
