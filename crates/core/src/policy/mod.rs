//! Redemption policy evaluation.
//!
//! Evaluation is a pure function of its inputs, so decisions are
//! deterministic and unit-testable. The coordinator calls it against the
//! balance read in the same atomic step as the write it guards.

pub mod catalog;

pub use catalog::{CatalogError, Reward, RewardCatalog};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of evaluating a redemption request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// The redemption is permitted.
    Allow,
    /// The redemption is denied; the first failing rule wins.
    Deny(DenyReason),
}

/// Why a redemption was denied.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenyReason {
    /// The reward code is not in the active catalog.
    #[error("unknown reward code: {code}")]
    UnknownReward {
        /// The code the caller requested.
        code: String,
    },

    /// The reward exists but has expired.
    #[error("reward {code} has expired")]
    RewardExpired {
        /// The expired reward's code.
        code: String,
    },

    /// The account balance does not cover the reward cost.
    #[error("insufficient balance: need {required}, have {available}")]
    InsufficientBalance {
        /// Points the reward costs.
        required: i64,
        /// Points currently available.
        available: i64,
    },

    /// The per-account daily redemption cap was reached.
    #[error("daily redemption cap of {cap} reached")]
    RateLimited {
        /// The configured cap.
        cap: u64,
    },
}

impl DenyReason {
    /// Compact code recorded on rejected entries and in API responses.
    #[must_use]
    pub const fn code(&self) -> DenyCode {
        match self {
            Self::UnknownReward { .. } => DenyCode::CatalogMiss,
            Self::RewardExpired { .. } => DenyCode::Expired,
            Self::InsufficientBalance { .. } => DenyCode::InsufficientBalance,
            Self::RateLimited { .. } => DenyCode::RateLimited,
        }
    }
}

/// Compact, storable rejection cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DenyCode {
    /// Reward code not in the active catalog.
    CatalogMiss,
    /// Reward expired.
    Expired,
    /// Balance below reward cost.
    InsufficientBalance,
    /// Daily redemption cap reached.
    RateLimited,
}

impl DenyCode {
    /// Stable string form used for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CatalogMiss => "catalog-miss",
            Self::Expired => "expired",
            Self::InsufficientBalance => "insufficient-balance",
            Self::RateLimited => "rate-limited",
        }
    }

    /// Parses the storage string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "catalog-miss" => Some(Self::CatalogMiss),
            "expired" => Some(Self::Expired),
            "insufficient-balance" => Some(Self::InsufficientBalance),
            "rate-limited" => Some(Self::RateLimited),
            _ => None,
        }
    }
}

/// Decides whether a redemption is permitted.
///
/// Rules, in order: the reward code must exist in the catalog, the reward
/// must not be expired, the balance must cover the cost, and the optional
/// per-account daily cap must not be reached. The first failing rule
/// determines the deny reason.
#[must_use]
pub fn evaluate(
    catalog: &RewardCatalog,
    reward_code: &str,
    balance: i64,
    redemptions_today: u64,
    now: DateTime<Utc>,
) -> PolicyDecision {
    let Some(reward) = catalog.get(reward_code) else {
        return PolicyDecision::Deny(DenyReason::UnknownReward {
            code: reward_code.to_string(),
        });
    };

    if reward.is_expired(now) {
        return PolicyDecision::Deny(DenyReason::RewardExpired {
            code: reward.code.clone(),
        });
    }

    if balance < reward.cost {
        return PolicyDecision::Deny(DenyReason::InsufficientBalance {
            required: reward.cost,
            available: balance,
        });
    }

    if let Some(cap) = catalog.daily_redemption_cap {
        if redemptions_today >= cap {
            return PolicyDecision::Deny(DenyReason::RateLimited { cap });
        }
    }

    PolicyDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rstest::rstest;

    fn catalog() -> RewardCatalog {
        let mut catalog = RewardCatalog::new();
        catalog.insert(Reward::new("FREE-COFFEE", 80).unwrap());
        catalog.insert(
            Reward::new("STALE-MUFFIN", 40)
                .unwrap()
                .expiring_at(Utc::now() - Duration::days(1)),
        );
        catalog
    }

    #[test]
    fn test_allow_when_all_rules_pass() {
        let decision = evaluate(&catalog(), "FREE-COFFEE", 100, 0, Utc::now());
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn test_catalog_miss() {
        let decision = evaluate(&catalog(), "NO-SUCH-REWARD", 1000, 0, Utc::now());
        assert!(matches!(
            decision,
            PolicyDecision::Deny(DenyReason::UnknownReward { .. })
        ));
    }

    #[test]
    fn test_expired_reward() {
        let decision = evaluate(&catalog(), "STALE-MUFFIN", 1000, 0, Utc::now());
        assert!(matches!(
            decision,
            PolicyDecision::Deny(DenyReason::RewardExpired { .. })
        ));
    }

    #[test]
    fn test_insufficient_balance() {
        let decision = evaluate(&catalog(), "FREE-COFFEE", 20, 0, Utc::now());
        assert_eq!(
            decision,
            PolicyDecision::Deny(DenyReason::InsufficientBalance {
                required: 80,
                available: 20,
            })
        );
    }

    #[test]
    fn test_exact_balance_allows() {
        let decision = evaluate(&catalog(), "FREE-COFFEE", 80, 0, Utc::now());
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[rstest]
    #[case(2, PolicyDecision::Allow)]
    #[case(3, PolicyDecision::Deny(DenyReason::RateLimited { cap: 3 }))]
    #[case(10, PolicyDecision::Deny(DenyReason::RateLimited { cap: 3 }))]
    fn test_daily_cap(#[case] redemptions_today: u64, #[case] expected: PolicyDecision) {
        let mut catalog = catalog();
        catalog.daily_redemption_cap = Some(3);
        let decision = evaluate(&catalog, "FREE-COFFEE", 1000, redemptions_today, Utc::now());
        assert_eq!(decision, expected);
    }

    #[test]
    fn test_no_cap_means_unlimited() {
        let decision = evaluate(&catalog(), "FREE-COFFEE", 1000, 10_000, Utc::now());
        assert_eq!(decision, PolicyDecision::Allow);
    }

    #[test]
    fn test_rule_order_expiry_before_balance() {
        // An expired reward with an unaffordable cost reports expiry first.
        let decision = evaluate(&catalog(), "STALE-MUFFIN", 0, 0, Utc::now());
        assert!(matches!(
            decision,
            PolicyDecision::Deny(DenyReason::RewardExpired { .. })
        ));
    }

    #[test]
    fn test_rule_order_balance_before_cap() {
        let mut catalog = catalog();
        catalog.daily_redemption_cap = Some(0);
        let decision = evaluate(&catalog, "FREE-COFFEE", 20, 5, Utc::now());
        assert!(matches!(
            decision,
            PolicyDecision::Deny(DenyReason::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_deny_code_roundtrip() {
        for code in [
            DenyCode::CatalogMiss,
            DenyCode::Expired,
            DenyCode::InsufficientBalance,
            DenyCode::RateLimited,
        ] {
            assert_eq!(DenyCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(DenyCode::parse("bogus"), None);
    }
}
