//! Typed TOML configuration.
//!
//! Loaded once at startup from `data/config.toml` (or `--config <path>`).
//! Instance definitions are validated individually when the registry is
//! built; a bad instance is skipped without aborting the others.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;

use crate::constants;

/// Top-level bot configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    pub chain: ChainSettings,
    #[serde(default)]
    pub telegram: TelegramSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub alerts: AlertSettings,
    #[serde(default)]
    pub claims: ClaimSettings,
    #[serde(default, rename = "instance")]
    pub instances: Vec<InstanceSettings>,
}

/// RPC endpoint and signing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChainSettings {
    pub rpc_url: String,
    /// Operator signing key; supports `env:VAR_NAME` indirection
    pub signer_key: String,
    #[serde(default = "default_token_address")]
    pub token_address: String,
    #[serde(default = "default_wrapped_native_address")]
    pub wrapped_native_address: String,
    /// CoinGecko demo API key for the price lookup (optional)
    #[serde(default)]
    pub price_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub enabled: bool,
    /// Bot token; supports `env:VAR_NAME` indirection
    pub bot_token: String,
    pub chat_id: String,
    pub commands_enabled: bool,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bot_token: String::new(),
            chat_id: String::new(),
            commands_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Poll cycle interval in seconds
    pub poll_interval_secs: u64,
    /// Day of month the autoclaim slot opens (1–28)
    pub autoclaim_day: u32,
    /// Hour of day the autoclaim slot opens (0–23)
    pub autoclaim_hour: u32,
    /// IANA timezone the autoclaim slot is anchored to
    pub timezone: String,
    /// Path of the durable schedule checkpoint file
    pub checkpoint_path: String,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            autoclaim_day: 1,
            autoclaim_hour: 9,
            timezone: "UTC".to_string(),
            checkpoint_path: constants::CHECKPOINT_FILE_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSettings {
    /// Agent EOA native balance threshold
    pub agent_balance_threshold: f64,
    /// Service safe native + wrapped-native balance threshold
    pub safe_balance_threshold: f64,
    /// Master safe native balance threshold
    pub master_safe_balance_threshold: f64,
    /// Emit a recovery notice when a balance rises back above its threshold
    pub notify_recovery: bool,
    /// Emit an operational-health alert every N consecutive read failures
    pub health_alert_every: u32,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            agent_balance_threshold: 0.1,
            safe_balance_threshold: 1.0,
            master_safe_balance_threshold: 5.0,
            notify_recovery: true,
            health_alert_every: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimSettings {
    /// Allow the `claim` command
    pub manual_claim: bool,
    /// Run the scheduled monthly autoclaim
    pub autoclaim: bool,
    /// Destination for reward withdrawals; withdrawals disabled when unset
    pub withdrawal_address: Option<String>,
    /// Rewards at or below this amount are treated as nothing to claim
    pub dust_threshold: f64,
    /// Attempt budget for transient chain errors
    pub max_attempts: u32,
    /// Base backoff delay between attempts, in milliseconds
    pub retry_base_delay_ms: u64,
    /// Confirmation wait per attempt, in seconds
    pub confirm_timeout_secs: u64,
    /// How many times a timed-out confirmation is re-checked by hash
    pub confirm_rechecks: u32,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            manual_claim: true,
            autoclaim: false,
            withdrawal_address: None,
            dust_threshold: 0.01,
            max_attempts: 3,
            retry_base_delay_ms: 5_000,
            confirm_timeout_secs: 120,
            confirm_rechecks: 3,
        }
    }
}

/// One monitored staking service instance, as written in the config file.
///
/// Threshold and flag fields override the global defaults when set.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceSettings {
    pub name: String,
    pub agent_address: String,
    pub safe_address: String,
    pub operator_address: String,
    pub master_safe_address: String,
    pub staking_contract: String,
    pub service_id: u64,
    #[serde(default)]
    pub agent_balance_threshold: Option<f64>,
    #[serde(default)]
    pub safe_balance_threshold: Option<f64>,
    #[serde(default)]
    pub master_safe_balance_threshold: Option<f64>,
    #[serde(default)]
    pub manual_claim: Option<bool>,
    #[serde(default)]
    pub autoclaim: Option<bool>,
}

impl BotConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path))?;
        let config: BotConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{}'", path))?;
        Ok(config)
    }

    /// Validate the global (non-instance) settings.
    ///
    /// Instance definitions are validated separately when the registry is
    /// built, so one broken instance cannot take the process down.
    pub fn validate(&self) -> Result<()> {
        if self.chain.rpc_url.is_empty() {
            bail!("chain.rpc_url is required");
        }
        if resolve_secret(&self.chain.signer_key).is_empty() {
            bail!("chain.signer_key is required");
        }
        if self.schedule.poll_interval_secs == 0 {
            bail!("schedule.poll_interval_secs must be positive");
        }
        if !(1..=28).contains(&self.schedule.autoclaim_day) {
            bail!(
                "schedule.autoclaim_day must be in 1..=28, got {}",
                self.schedule.autoclaim_day
            );
        }
        if self.schedule.autoclaim_hour > 23 {
            bail!(
                "schedule.autoclaim_hour must be in 0..=23, got {}",
                self.schedule.autoclaim_hour
            );
        }
        if self.schedule.timezone.parse::<chrono_tz::Tz>().is_err() {
            bail!("schedule.timezone '{}' is not a known timezone", self.schedule.timezone);
        }
        if self.alerts.health_alert_every == 0 {
            bail!("alerts.health_alert_every must be positive");
        }
        if self.claims.max_attempts == 0 {
            bail!("claims.max_attempts must be positive");
        }
        if self.instances.is_empty() {
            bail!("no [[instance]] definitions in config");
        }
        Ok(())
    }
}

/// Resolve a secret value: `env:VAR` reads the variable, anything else is
/// taken literally. Missing variables resolve to an empty string.
pub fn resolve_secret(value: &str) -> String {
    match value.strip_prefix("env:") {
        Some(var) => std::env::var(var).unwrap_or_default(),
        None => value.to_string(),
    }
}

fn default_token_address() -> String {
    constants::TOKEN_ADDRESS.to_string()
}

fn default_wrapped_native_address() -> String {
    constants::WRAPPED_NATIVE_ADDRESS.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [chain]
        rpc_url = "https://rpc.gnosischain.com"
        signer_key = "0x0123456789012345678901234567890123456789012345678901234567890123"

        [[instance]]
        name = "trader-1"
        agent_address = "0x52370eDc8e355ef5A2cD84d4B0F8e85eeaB1E044"
        safe_address = "0x8C7e86Cd8F82a4cFa1fcEFeEfBc65b91cebFf98F"
        operator_address = "0x0E52a9b7Fa9F3A1dDeCeE1B1e2b759Bd0F6D8503"
        master_safe_address = "0x4D09E46eFBc8d57B14b2c57449E3aC1e6e8196F4"
        staking_contract = "0x389b46c259631acd6a69bde8b6cee218230bae8c"
        service_id = 42
    "#;

    #[test]
    fn minimal_config_loads_with_defaults() {
        let config: BotConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();

        assert_eq!(config.instances.len(), 1);
        assert_eq!(config.instances[0].service_id, 42);
        assert_eq!(config.schedule.poll_interval_secs, 300);
        assert_eq!(config.schedule.autoclaim_day, 1);
        assert_eq!(config.alerts.agent_balance_threshold, 0.1);
        assert!(config.claims.manual_claim);
        assert!(!config.claims.autoclaim);
        assert!(config.telegram.enabled);
    }

    #[test]
    fn bad_timezone_fails_validation() {
        let mut config: BotConfig = toml::from_str(MINIMAL).unwrap();
        config.schedule.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn autoclaim_day_out_of_range_fails() {
        let mut config: BotConfig = toml::from_str(MINIMAL).unwrap();
        config.schedule.autoclaim_day = 31;
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_secret_resolution() {
        std::env::set_var("STAKERBOT_TEST_SECRET", "hunter2");
        assert_eq!(resolve_secret("env:STAKERBOT_TEST_SECRET"), "hunter2");
        assert_eq!(resolve_secret("plain-value"), "plain-value");
        assert_eq!(resolve_secret("env:STAKERBOT_TEST_MISSING"), "");
    }
}
