//! Active reward catalog.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use thiserror::Error;

use pointbrew_shared::config::PolicyConfig;

/// Catalog construction errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    /// Reward costs must be positive point amounts.
    #[error("reward {code} has non-positive cost {cost}")]
    NonPositiveCost {
        /// The offending reward code.
        code: String,
        /// The configured cost.
        cost: i64,
    },

    /// Reward codes must be non-empty.
    #[error("reward with empty code")]
    EmptyCode,
}

/// A redeemable reward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reward {
    /// Catalog code, unique within the active catalog.
    pub code: String,
    /// Point cost; always positive.
    pub cost: i64,
    /// Optional expiry; the reward is redeemable strictly before this time.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Reward {
    /// Creates a reward with no expiry.
    pub fn new(code: impl Into<String>, cost: i64) -> Result<Self, CatalogError> {
        let code = code.into();
        if code.trim().is_empty() {
            return Err(CatalogError::EmptyCode);
        }
        if cost <= 0 {
            return Err(CatalogError::NonPositiveCost { code, cost });
        }
        Ok(Self {
            code,
            cost,
            expires_at: None,
        })
    }

    /// Sets the expiry.
    #[must_use]
    pub const fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// True once the expiry has passed. Rewards without an expiry never
    /// expire.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// The set of rewards currently redeemable, plus account-level limits.
#[derive(Debug, Clone, Default)]
pub struct RewardCatalog {
    rewards: HashMap<String, Reward>,
    /// Maximum applied redemptions per account per UTC day. `None` means
    /// unlimited.
    pub daily_redemption_cap: Option<u64>,
}

impl RewardCatalog {
    /// An empty catalog with no limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the catalog from configuration, validating every reward.
    pub fn from_config(config: &PolicyConfig) -> Result<Self, CatalogError> {
        let mut catalog = Self {
            rewards: HashMap::with_capacity(config.rewards.len()),
            daily_redemption_cap: config.daily_redemption_cap,
        };
        for reward in &config.rewards {
            let mut built = Reward::new(reward.code.clone(), reward.cost)?;
            built.expires_at = reward.expires_at;
            catalog.insert(built);
        }
        Ok(catalog)
    }

    /// Adds or replaces a reward.
    pub fn insert(&mut self, reward: Reward) {
        self.rewards.insert(reward.code.clone(), reward);
    }

    /// Looks up a reward by code.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&Reward> {
        self.rewards.get(code)
    }

    /// Number of rewards in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    /// True when the catalog has no rewards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pointbrew_shared::config::RewardConfig;

    #[test]
    fn test_reward_rejects_non_positive_cost() {
        assert_eq!(
            Reward::new("FREE-COFFEE", 0),
            Err(CatalogError::NonPositiveCost {
                code: "FREE-COFFEE".into(),
                cost: 0,
            })
        );
        assert!(Reward::new("FREE-COFFEE", -5).is_err());
    }

    #[test]
    fn test_reward_rejects_empty_code() {
        assert_eq!(Reward::new("  ", 10), Err(CatalogError::EmptyCode));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let reward = Reward::new("FREE-COFFEE", 80).unwrap();
        assert!(!reward.is_expired(now));

        let expired = reward.clone().expiring_at(now - Duration::hours(1));
        assert!(expired.is_expired(now));

        // Expiry boundary is inclusive: expired exactly at `expires_at`.
        let boundary = reward.expiring_at(now);
        assert!(boundary.is_expired(now));
    }

    #[test]
    fn test_from_config() {
        let config = PolicyConfig {
            rewards: vec![
                RewardConfig {
                    code: "FREE-COFFEE".into(),
                    cost: 80,
                    expires_at: None,
                },
                RewardConfig {
                    code: "FREE-MUFFIN".into(),
                    cost: 40,
                    expires_at: Some(Utc::now() + Duration::days(30)),
                },
            ],
            daily_redemption_cap: Some(3),
        };

        let catalog = RewardCatalog::from_config(&config).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("FREE-COFFEE").unwrap().cost, 80);
        assert!(catalog.get("FREE-MUFFIN").unwrap().expires_at.is_some());
        assert_eq!(catalog.daily_redemption_cap, Some(3));
    }

    #[test]
    fn test_from_config_rejects_bad_cost() {
        let config = PolicyConfig {
            rewards: vec![RewardConfig {
                code: "BROKEN".into(),
                cost: -1,
                expires_at: None,
            }],
            daily_redemption_cap: None,
        };
        assert!(RewardCatalog::from_config(&config).is_err());
    }
}
