//! Shared types and configuration for PointBrew.
//!
//! This crate provides common types used across all other crates:
//! - Typed IDs for type-safe entity references
//! - Cursor-based pagination for ledger history
//! - Application-wide configuration management
//! - Verification of identity-provider tokens

pub mod config;
pub mod jwt;
pub mod types;

pub use config::AppConfig;
pub use jwt::{Claims, JwtError, JwtService};
pub use types::{AccountId, EntryId, IdempotencyKey, PageCursor};
