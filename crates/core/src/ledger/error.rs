//! Ledger error taxonomy.
//!
//! The coordinator resolves low-level store errors into this taxonomy
//! before returning; store-specific error shapes never leak to callers.

use thiserror::Error;

use pointbrew_shared::types::EntryId;

use super::entry::EntryKind;
use super::store::StoreError;
use crate::policy::DenyReason;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors (caller bug, never persisted) ==========
    /// Entry amount cannot be zero.
    #[error("Entry amount cannot be zero")]
    ZeroAmount,

    /// The amount's sign is inconsistent with the entry kind.
    #[error("Amount {amount} is inconsistent with entry kind {}", kind.as_str())]
    KindSignMismatch {
        /// The requested entry kind.
        kind: EntryKind,
        /// The offending amount.
        amount: i64,
    },

    /// Idempotency key must be non-empty.
    #[error("Idempotency key must not be empty")]
    EmptyIdempotencyKey,

    /// Account ID must be non-empty.
    #[error("Account ID must not be empty")]
    EmptyAccountId,

    // ========== Concurrency Errors ==========
    /// A concurrent attempt for the same idempotency key is in flight.
    #[error("A request with this idempotency key is already in flight (entry {entry_id})")]
    DuplicateInFlight {
        /// The pending entry holding the key.
        entry_id: EntryId,
    },

    /// Version-conflict retries exhausted; the caller should retry with
    /// backoff, reusing the same idempotency key.
    #[error("Account contention: gave up after {attempts} attempts, please retry")]
    Contention {
        /// Number of attempts made before giving up.
        attempts: u32,
    },

    // ========== Business Rule Errors ==========
    /// Redemption denied by policy. Terminal; surfaced to the user.
    #[error("Redemption denied: {0}")]
    PolicyDenied(DenyReason),

    // ========== Dependency Errors ==========
    /// The external store failed; retried by the caller with backoff.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ZeroAmount => "ZERO_AMOUNT",
            Self::KindSignMismatch { .. } => "KIND_SIGN_MISMATCH",
            Self::EmptyIdempotencyKey => "EMPTY_IDEMPOTENCY_KEY",
            Self::EmptyAccountId => "EMPTY_ACCOUNT_ID",
            Self::DuplicateInFlight { .. } => "DUPLICATE_IN_FLIGHT",
            Self::Contention { .. } => "CONTENTION",
            Self::PolicyDenied(_) => "POLICY_DENIED",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed candidate, not retried
            Self::ZeroAmount
            | Self::KindSignMismatch { .. }
            | Self::EmptyIdempotencyKey
            | Self::EmptyAccountId => 400,

            // 409 Conflict - same key already in flight
            Self::DuplicateInFlight { .. } => 409,

            // 422 Unprocessable - business rule rejection, terminal
            Self::PolicyDenied(_) => 422,

            // 503 Service Unavailable - retry with backoff
            Self::Contention { .. } | Self::StoreUnavailable(_) => 503,

            // 500 Internal Server Error
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if the caller should retry this operation (with the
    /// same idempotency key).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DuplicateInFlight { .. } | Self::Contention { .. } | Self::StoreUnavailable(_)
        )
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            // Conflicts are handled by the coordinator's retry loop; one
            // escaping to a caller is a coordinator bug.
            StoreError::VersionConflict | StoreError::DuplicateIdempotencyKey => {
                Self::Internal(format!("unhandled store conflict: {err}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::DenyReason;
    use pointbrew_shared::types::EntryId;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::ZeroAmount.error_code(), "ZERO_AMOUNT");
        assert_eq!(
            LedgerError::Contention { attempts: 5 }.error_code(),
            "CONTENTION"
        );
        assert_eq!(
            LedgerError::PolicyDenied(DenyReason::RateLimited { cap: 3 }).error_code(),
            "POLICY_DENIED"
        );
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(LedgerError::EmptyIdempotencyKey.http_status_code(), 400);
        assert_eq!(
            LedgerError::DuplicateInFlight {
                entry_id: EntryId::new()
            }
            .http_status_code(),
            409
        );
        assert_eq!(
            LedgerError::PolicyDenied(DenyReason::RateLimited { cap: 3 }).http_status_code(),
            422
        );
        assert_eq!(LedgerError::Contention { attempts: 5 }.http_status_code(), 503);
        assert_eq!(
            LedgerError::StoreUnavailable("down".into()).http_status_code(),
            503
        );
        assert_eq!(LedgerError::Internal("bug".into()).http_status_code(), 500);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(LedgerError::Contention { attempts: 5 }.is_retryable());
        assert!(LedgerError::StoreUnavailable("down".into()).is_retryable());
        assert!(
            LedgerError::DuplicateInFlight {
                entry_id: EntryId::new()
            }
            .is_retryable()
        );
        assert!(!LedgerError::ZeroAmount.is_retryable());
        assert!(!LedgerError::PolicyDenied(DenyReason::RateLimited { cap: 1 }).is_retryable());
    }

    #[test]
    fn test_store_errors_never_leak_conflicts() {
        let err: LedgerError = StoreError::VersionConflict.into();
        assert!(matches!(err, LedgerError::Internal(_)));

        let err: LedgerError = StoreError::Unavailable("timeout".into()).into();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }
}
