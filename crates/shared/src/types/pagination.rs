//! Cursor-based pagination for ledger reads.
//!
//! Ledger history is paginated by an opaque token rather than page numbers:
//! entries are append-only, so a `(created_at, entry_id)` cursor stays
//! stable while new entries arrive. The tie-break on `entry_id` makes the
//! order deterministic when two entries share a timestamp.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of entries per history page.
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Maximum number of entries per history page.
pub const MAX_PAGE_SIZE: u64 = 200;

/// Clamps a caller-supplied page size into the allowed range.
#[must_use]
pub fn clamp_page_size(requested: Option<u64>) -> u64 {
    match requested {
        None | Some(0) => DEFAULT_PAGE_SIZE,
        Some(n) => n.min(MAX_PAGE_SIZE),
    }
}

/// Position of the last entry seen on the previous page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    /// `created_at` of the last entry, as microseconds since the epoch.
    pub created_at: DateTime<Utc>,
    /// Entry ID tie-breaker.
    pub entry_id: Uuid,
}

impl PageCursor {
    /// Creates a cursor pointing after the given entry position.
    #[must_use]
    pub const fn new(created_at: DateTime<Utc>, entry_id: Uuid) -> Self {
        Self {
            created_at,
            entry_id,
        }
    }

    /// Encodes the cursor as an opaque page token.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.created_at.timestamp_micros(), self.entry_id)
    }

    /// Decodes a page token produced by [`PageCursor::encode`].
    ///
    /// Returns `None` for malformed tokens; callers treat that as a bad
    /// request rather than an internal error.
    #[must_use]
    pub fn decode(token: &str) -> Option<Self> {
        let (micros, id) = token.split_once(':')?;
        let micros: i64 = micros.parse().ok()?;
        let created_at = Utc.timestamp_micros(micros).single()?;
        let entry_id = Uuid::parse_str(id).ok()?;
        Some(Self {
            created_at,
            entry_id,
        })
    }
}
