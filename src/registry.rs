//! Instance registry: per-instance identity, configuration and runtime state.
//!
//! Built once at startup from validated configuration. Identity and
//! thresholds are immutable for an instance's lifetime; runtime state is
//! mutated only by the poll cycle (alert state, observed values) and the
//! claim orchestrator (claim history), each for its own instance. Readers
//! take a cloned snapshot so command handlers never observe a half-updated
//! instance.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::alerts::{AlertBook, FailureTracker};
use crate::chain::{BalanceSet, StakingStatus, WalletSet};
use crate::claim::ClaimRecord;
use crate::config::{BotConfig, InstanceSettings};
use crate::errors::ConfigError;
use crate::logger::{self, LogTag};

/// Validated, immutable definition of one monitored instance
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub id: String,
    pub wallets: WalletSet,
    pub staking_contract: String,
    pub service_id: u64,
    pub agent_threshold: f64,
    pub safe_threshold: f64,
    pub master_safe_threshold: f64,
    pub manual_claim: bool,
    pub autoclaim: bool,
}

impl InstanceSpec {
    /// Validate one instance definition against the global defaults.
    ///
    /// Addresses are parsed and re-encoded in checksum form; a failure here
    /// rejects only this instance.
    pub fn from_settings(settings: &InstanceSettings, config: &BotConfig) -> Result<Self, ConfigError> {
        if settings.name.trim().is_empty() {
            return Err(ConfigError::InvalidInstance {
                instance: "<unnamed>".to_string(),
                reason: "instance name is empty".to_string(),
            });
        }

        let id = settings.name.trim().to_string();
        let wallets = WalletSet {
            agent: checksum(&id, "agent", &settings.agent_address)?,
            safe: checksum(&id, "safe", &settings.safe_address)?,
            operator: checksum(&id, "operator", &settings.operator_address)?,
            master_safe: checksum(&id, "master safe", &settings.master_safe_address)?,
        };
        let staking_contract = checksum(&id, "staking contract", &settings.staking_contract)?;

        let agent_threshold = settings
            .agent_balance_threshold
            .unwrap_or(config.alerts.agent_balance_threshold);
        let safe_threshold = settings
            .safe_balance_threshold
            .unwrap_or(config.alerts.safe_balance_threshold);
        let master_safe_threshold = settings
            .master_safe_balance_threshold
            .unwrap_or(config.alerts.master_safe_balance_threshold);

        for (name, value) in [
            ("agent_balance_threshold", agent_threshold),
            ("safe_balance_threshold", safe_threshold),
            ("master_safe_balance_threshold", master_safe_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidInstance {
                    instance: id.clone(),
                    reason: format!("{} must be a non-negative number, got {}", name, value),
                });
            }
        }

        Ok(Self {
            id,
            wallets,
            staking_contract,
            service_id: settings.service_id,
            agent_threshold,
            safe_threshold,
            master_safe_threshold,
            manual_claim: settings.manual_claim.unwrap_or(config.claims.manual_claim),
            autoclaim: settings.autoclaim.unwrap_or(config.claims.autoclaim),
        })
    }
}

/// Mutable runtime state of one instance
#[derive(Debug, Clone)]
pub struct InstanceState {
    pub balances: Option<BalanceSet>,
    pub staking: Option<StakingStatus>,
    pub alerts: AlertBook,
    pub failures: FailureTracker,
    pub last_claim: Option<ClaimRecord>,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl InstanceState {
    fn new(health_alert_every: u32) -> Self {
        Self {
            balances: None,
            staking: None,
            alerts: AlertBook::default(),
            failures: FailureTracker::new(health_alert_every),
            last_claim: None,
            last_refresh: None,
        }
    }
}

/// One monitored staking service instance
pub struct ServiceInstance {
    spec: InstanceSpec,
    state: RwLock<InstanceState>,
    claim_in_flight: AtomicBool,
}

impl ServiceInstance {
    pub fn new(spec: InstanceSpec, health_alert_every: u32) -> Self {
        Self {
            spec,
            state: RwLock::new(InstanceState::new(health_alert_every)),
            claim_in_flight: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn spec(&self) -> &InstanceSpec {
        &self.spec
    }

    pub fn wallets(&self) -> &WalletSet {
        &self.spec.wallets
    }

    /// Consistent copy of the runtime state for readers
    pub async fn snapshot(&self) -> InstanceState {
        self.state.read().await.clone()
    }

    /// Exclusive write access for the poll cycle and the orchestrator
    pub async fn state_mut(&self) -> tokio::sync::RwLockWriteGuard<'_, InstanceState> {
        self.state.write().await
    }

    /// Whether a claim/withdraw job currently owns this instance
    pub fn claim_in_flight(&self) -> bool {
        self.claim_in_flight.load(Ordering::Acquire)
    }

    /// Try to acquire the per-instance claim guard.
    ///
    /// The compare-exchange makes the flag set happen-before any submission
    /// the holder performs, so concurrent trigger sources can never both
    /// reach the submit stage. Returns `None` while another job holds it.
    pub fn try_begin_claim(&self) -> Option<ClaimGuard<'_>> {
        self.claim_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ClaimGuard { instance: self })
    }
}

/// RAII guard for the in-flight claim flag; released on drop so every
/// terminal path (including panics in tests) frees the instance.
pub struct ClaimGuard<'a> {
    instance: &'a ServiceInstance,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.instance
            .claim_in_flight
            .store(false, Ordering::Release);
    }
}

/// The full set of monitored instances
pub struct InstanceRegistry {
    instances: Vec<Arc<ServiceInstance>>,
}

impl InstanceRegistry {
    /// Build the registry from configuration.
    ///
    /// Invalid instances are reported and skipped; startup fails only when
    /// no instance survives validation or two instances share an id.
    pub fn from_config(config: &BotConfig) -> anyhow::Result<Self> {
        let mut instances: Vec<Arc<ServiceInstance>> = Vec::new();

        for settings in &config.instances {
            match InstanceSpec::from_settings(settings, config) {
                Ok(spec) => {
                    if instances.iter().any(|i| i.id() == spec.id) {
                        anyhow::bail!(ConfigError::DuplicateInstance(spec.id));
                    }
                    logger::info(
                        LogTag::Registry,
                        &format!(
                            "loaded instance '{}' (service {}, staking {})",
                            spec.id, spec.service_id, spec.staking_contract
                        ),
                    );
                    instances.push(Arc::new(ServiceInstance::new(
                        spec,
                        config.alerts.health_alert_every,
                    )));
                }
                Err(e) => {
                    logger::error(LogTag::Registry, &format!("skipping instance: {}", e));
                }
            }
        }

        if instances.is_empty() {
            anyhow::bail!("no valid instances in configuration");
        }

        Ok(Self { instances })
    }

    pub fn get(&self, id: &str) -> Option<Arc<ServiceInstance>> {
        self.instances.iter().find(|i| i.id() == id).cloned()
    }

    pub fn instances(&self) -> &[Arc<ServiceInstance>] {
        &self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Distinct staking contracts across the registry, in first-seen order
    pub fn staking_contracts(&self) -> Vec<String> {
        let mut contracts: Vec<String> = Vec::new();
        for instance in &self.instances {
            let contract = &instance.spec().staking_contract;
            if !contracts.iter().any(|c| c.eq_ignore_ascii_case(contract)) {
                contracts.push(contract.clone());
            }
        }
        contracts
    }
}

fn checksum(instance: &str, field: &'static str, value: &str) -> Result<String, ConfigError> {
    value
        .parse::<Address>()
        .map(|a| a.to_checksum(None))
        .map_err(|_| ConfigError::InvalidAddress {
            instance: instance.to_string(),
            field,
            value: value.to_string(),
        })
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Registry with `n` synthetic instances for scheduler/orchestrator tests
    pub fn test_registry(n: usize) -> InstanceRegistry {
        registry_of(
            (0..n)
                .map(|i| Arc::new(test_instance(&format!("instance-{}", i))))
                .collect(),
        )
    }

    /// Registry over pre-built instances
    pub fn registry_of(instances: Vec<Arc<ServiceInstance>>) -> InstanceRegistry {
        InstanceRegistry { instances }
    }

    /// A synthetic instance with distinct per-instance addresses
    pub fn test_instance(id: &str) -> ServiceInstance {
        let spec = InstanceSpec {
            id: id.to_string(),
            wallets: WalletSet {
                agent: format!("0xagent-{}", id),
                safe: format!("0xsafe-{}", id),
                operator: format!("0xoperator-{}", id),
                master_safe: format!("0xmaster-{}", id),
            },
            staking_contract: "0x389b46c259631acd6a69bde8b6cee218230bae8c".to_string(),
            service_id: 1,
            agent_threshold: 0.1,
            safe_threshold: 1.0,
            master_safe_threshold: 5.0,
            manual_claim: true,
            autoclaim: true,
        };
        ServiceInstance::new(spec, 3)
    }
}
