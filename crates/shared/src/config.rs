//! Application configuration management.

use serde::Deserialize;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Identity-provider token configuration.
    pub jwt: JwtConfig,
    /// Retry behavior for contended ledger writes.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Redemption policy: reward catalog and caps.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Background reconciliation schedule.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Identity-provider token configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// Shared secret for verifying token signatures.
    pub secret: String,
}

/// Retry behavior for version-conflict aborts.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts before surfacing a contention error.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    20
}

fn default_max_delay_ms() -> u64 {
    1000
}

/// Redemption policy configuration.
///
/// The reward catalog here is a placeholder structure; the real catalog and
/// caps are a product decision and load from the same config sources.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Active rewards redeemable for points.
    #[serde(default)]
    pub rewards: Vec<RewardConfig>,
    /// Optional per-account cap on redemptions per UTC day.
    #[serde(default)]
    pub daily_redemption_cap: Option<u64>,
}

/// A single reward in the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct RewardConfig {
    /// Reward code clients redeem against (e.g. "FREE-COFFEE").
    pub code: String,
    /// Cost in points; must be positive.
    pub cost: i64,
    /// Optional expiry (RFC 3339); expired rewards are denied.
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Background reconciliation schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Seconds between scheduler passes.
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
    /// An account is due when last reconciled more than this many seconds ago.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Maximum accounts reconciled per pass.
    #[serde(default = "default_reconcile_batch_size")]
    pub batch_size: u64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
            stale_after_secs: default_stale_after_secs(),
            batch_size: default_reconcile_batch_size(),
        }
    }
}

fn default_reconcile_interval_secs() -> u64 {
    300
}

fn default_stale_after_secs() -> u64 {
    86_400
}

fn default_reconcile_batch_size() -> u64 {
    100
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("POINTBREW").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_defaults() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 5);
        assert!(retry.base_delay_ms <= retry.max_delay_ms);
    }

    #[test]
    fn test_reconciliation_defaults() {
        let rec = ReconciliationConfig::default();
        assert_eq!(rec.interval_secs, 300);
        assert_eq!(rec.stale_after_secs, 86_400);
        assert_eq!(rec.batch_size, 100);
    }

    #[test]
    fn test_policy_config_deserializes_rewards() {
        let toml = r#"
            daily_redemption_cap = 3

            [[rewards]]
            code = "FREE-COFFEE"
            cost = 80
        "#;
        let policy: PolicyConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(policy.daily_redemption_cap, Some(3));
        assert_eq!(policy.rewards.len(), 1);
        assert_eq!(policy.rewards[0].code, "FREE-COFFEE");
        assert_eq!(policy.rewards[0].cost, 80);
        assert!(policy.rewards[0].expires_at.is_none());
    }
}
