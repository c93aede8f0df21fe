//! Chain access capability interface.
//!
//! All blockchain reads and writes go through the [`ChainClient`] trait so
//! the orchestrator and scheduler can be exercised against a scripted fake.
//! The concrete implementation lives in [`evm`].
//!
//! Read calls fail with `ChainError::Unavailable` on transport problems;
//! "not staked" and "zero balance" are ordinary values, never errors.
//! Write calls distinguish on-chain rejection from transport failure, and a
//! timed-out confirmation is re-checked by hash — never resubmitted with
//! the same payload.

pub mod evm;
pub mod price;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::errors::ChainResult;

/// The wallet addresses read together for one instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSet {
    pub agent: String,
    pub safe: String,
    pub operator: String,
    pub master_safe: String,
}

/// Balances for one instance's wallet set, in display units
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BalanceSet {
    pub agent_native: f64,
    pub safe_native: f64,
    pub safe_wrapped_native: f64,
    pub safe_token: f64,
    pub operator_native: f64,
    pub master_safe_native: f64,
    pub master_safe_token: f64,
}

/// Staking-contract state for one service
#[derive(Debug, Clone, PartialEq)]
pub struct StakingStatus {
    pub is_staked: bool,
    /// Rewards claimable right now, in token units
    pub pending_rewards: f64,
    pub mech_requests_this_epoch: u64,
    pub required_requests: u64,
    pub epoch_end: DateTime<Utc>,
    pub program_name: String,
}

/// Free/total slots in a staking contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotAvailability {
    pub free_slots: u64,
    pub total_slots: u64,
}

/// Result of waiting for a submitted transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Confirmed { tx_hash: String },
    Reverted { tx_hash: String },
    TimedOut { tx_hash: String },
}

impl TxOutcome {
    pub fn tx_hash(&self) -> &str {
        match self {
            TxOutcome::Confirmed { tx_hash }
            | TxOutcome::Reverted { tx_hash }
            | TxOutcome::TimedOut { tx_hash } => tx_hash,
        }
    }
}

/// Capability interface over the target chain.
///
/// One implementation per chain client library; everything above this trait
/// is chain-agnostic.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Read all balances for an instance's wallet set
    async fn read_balances(&self, wallets: &WalletSet) -> ChainResult<BalanceSet>;

    /// Read staking state for a service in a staking contract
    async fn read_staking_status(
        &self,
        staking_contract: &str,
        service_id: u64,
        safe: &str,
    ) -> ChainResult<StakingStatus>;

    /// Read slot usage of a staking contract
    async fn read_slot_availability(&self, staking_contract: &str) -> ChainResult<SlotAvailability>;

    /// Current USD price of the reward token, `None` when unavailable
    async fn read_price(&self) -> Option<f64>;

    /// Build, sign and submit a reward claim. Returns the transaction hash.
    async fn submit_claim(&self, staking_contract: &str, service_id: u64) -> ChainResult<String>;

    /// Build, sign and submit a reward-token withdrawal from one of the
    /// instance's safes. Returns the transaction hash.
    async fn submit_withdrawal(&self, from: &str, to: &str, amount: f64) -> ChainResult<String>;

    /// Wait for a transaction to confirm, bounded by `timeout`.
    ///
    /// A pending transaction at the deadline yields `TxOutcome::TimedOut`,
    /// not an error; callers re-invoke this with the same hash to re-check.
    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> ChainResult<TxOutcome>;
}
