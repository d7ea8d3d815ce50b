//! Shared domain types.

pub mod id;
pub mod pagination;

pub use id::{AccountId, EntryId, IdempotencyKey};
pub use pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, PageCursor, clamp_page_size};
