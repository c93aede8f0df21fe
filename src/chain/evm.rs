//! Alloy-backed implementation of the chain capability interface.
//!
//! Read calls go through a plain HTTP provider; write calls go through a
//! provider with the operator wallet attached. Every submission builds a
//! fresh transaction (nonce and gas are re-estimated by the provider), so
//! retrying after a transport failure never replays a stale payload.

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use crate::chain::{
    price, BalanceSet, ChainClient, SlotAvailability, StakingStatus, TxOutcome, WalletSet,
};
use crate::config::{resolve_secret, ChainSettings};
use crate::constants;
use crate::errors::{ChainError, ChainResult};
use crate::logger::{self, LogTag};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IErc20 {
        function balanceOf(address account) external view returns (uint256);
        function transfer(address to, uint256 amount) external returns (bool);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IStakingToken {
        struct ServiceInfo {
            address multisig;
            address owner;
            uint256[] nonces;
            uint256 tsStart;
            uint256 reward;
            uint256 inactivity;
        }

        function calculateStakingReward(uint256 serviceId) external view returns (uint256);
        function getStakingState(uint256 serviceId) external view returns (uint8);
        function getServiceInfo(uint256 serviceId) external view returns (ServiceInfo memory);
        function getServiceIds() external view returns (uint256[] memory);
        function maxNumServices() external view returns (uint256);
        function livenessPeriod() external view returns (uint256);
        function tsCheckpoint() external view returns (uint256);
        function activityChecker() external view returns (address);
        function claim(uint256 serviceId) external returns (uint256);
    }
}

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    contract IActivityChecker {
        function livenessRatio() external view returns (uint256);
        function getMultisigNonces(address multisig) external view returns (uint256[] memory);
    }
}

/// OLAS and wxDAI both use 18 decimals on Gnosis
const TOKEN_DECIMALS: u8 = 18;

/// How often a pending transaction is re-checked while waiting
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Chain client over an EVM JSON-RPC endpoint
pub struct EvmChain {
    rpc_url: Url,
    signer: PrivateKeySigner,
    token: Address,
    wrapped_native: Address,
    http: reqwest::Client,
    price_api_key: Option<String>,
}

impl EvmChain {
    pub fn new(settings: &ChainSettings) -> Result<Self> {
        let rpc_url: Url = settings
            .rpc_url
            .parse()
            .with_context(|| format!("invalid rpc_url '{}'", settings.rpc_url))?;
        let signer: PrivateKeySigner = resolve_secret(&settings.signer_key)
            .parse()
            .context("invalid chain.signer_key")?;
        let token: Address = settings
            .token_address
            .parse()
            .with_context(|| format!("invalid token_address '{}'", settings.token_address))?;
        let wrapped_native: Address = settings.wrapped_native_address.parse().with_context(|| {
            format!(
                "invalid wrapped_native_address '{}'",
                settings.wrapped_native_address
            )
        })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            rpc_url,
            signer,
            token,
            wrapped_native,
            http,
            price_api_key: settings.price_api_key.clone(),
        })
    }

    fn read_provider(&self) -> impl Provider + Clone {
        ProviderBuilder::new().connect_http(self.rpc_url.clone())
    }

    fn signer_provider(&self) -> impl Provider + Clone {
        let wallet = EthereumWallet::from(self.signer.clone());
        ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone())
    }

    async fn native_balance(
        &self,
        provider: &(impl Provider + Clone),
        address: &str,
    ) -> ChainResult<f64> {
        let addr = parse_address(address)?;
        let wei = provider
            .get_balance(addr)
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        Ok(to_units(wei, TOKEN_DECIMALS))
    }

    async fn erc20_balance(
        &self,
        provider: &(impl Provider + Clone),
        token: Address,
        address: &str,
    ) -> ChainResult<f64> {
        let addr = parse_address(address)?;
        let erc20 = IErc20::new(token, provider);
        let raw = erc20
            .balanceOf(addr)
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        Ok(to_units(raw, TOKEN_DECIMALS))
    }
}

#[async_trait]
impl ChainClient for EvmChain {
    async fn read_balances(&self, wallets: &WalletSet) -> ChainResult<BalanceSet> {
        let provider = self.read_provider();

        let agent_native = self.native_balance(&provider, &wallets.agent).await?;
        let safe_native = self.native_balance(&provider, &wallets.safe).await?;
        let operator_native = self.native_balance(&provider, &wallets.operator).await?;
        let master_safe_native = self.native_balance(&provider, &wallets.master_safe).await?;
        let safe_wrapped_native = self
            .erc20_balance(&provider, self.wrapped_native, &wallets.safe)
            .await?;
        let safe_token = self
            .erc20_balance(&provider, self.token, &wallets.safe)
            .await?;
        let master_safe_token = self
            .erc20_balance(&provider, self.token, &wallets.master_safe)
            .await?;

        Ok(BalanceSet {
            agent_native,
            safe_native,
            safe_wrapped_native,
            safe_token,
            operator_native,
            master_safe_native,
            master_safe_token,
        })
    }

    async fn read_staking_status(
        &self,
        staking_contract: &str,
        service_id: u64,
        safe: &str,
    ) -> ChainResult<StakingStatus> {
        let provider = self.read_provider();
        let staking_addr = parse_address(staking_contract)?;
        let safe_addr = parse_address(safe)?;
        let staking = IStakingToken::new(staking_addr, &provider);
        let id = U256::from(service_id);

        let state = staking
            .getStakingState(id)
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let is_staked = state != 0;

        let pending_raw = staking
            .calculateStakingReward(id)
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let pending_rewards = to_units(pending_raw, TOKEN_DECIMALS);

        // Request counts: current count from the activity checker, count at
        // the last checkpoint from the service info nonces.
        let checker_addr = staking
            .activityChecker()
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let checker = IActivityChecker::new(checker_addr, &provider);
        let nonces = checker
            .getMultisigNonces(safe_addr)
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let current_requests = nonces.get(1).copied().map(to_u64).unwrap_or_default();

        let info = staking
            .getServiceInfo(id)
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let checkpoint_requests = info.nonces.get(1).copied().map(to_u64).unwrap_or_default();
        let mech_requests_this_epoch = current_requests.saturating_sub(checkpoint_requests);

        let liveness_ratio = checker
            .livenessRatio()
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let liveness_period = staking
            .livenessPeriod()
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let checkpoint_ts = staking
            .tsCheckpoint()
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;

        // livenessRatio is requests-per-second scaled by 1e18
        let required_requests = ((to_u64(liveness_ratio) as f64 * to_u64(liveness_period) as f64)
            / 1e18)
            .ceil() as u64;

        let epoch_end_ts = to_u64(checkpoint_ts).saturating_add(to_u64(liveness_period));
        let epoch_end = DateTime::<Utc>::from_timestamp(epoch_end_ts as i64, 0)
            .unwrap_or_else(Utc::now);

        let program_name = constants::staking_program_name(staking_contract)
            .map(|n| n.to_string())
            .unwrap_or_else(|| crate::utils::short_address(staking_contract));

        Ok(StakingStatus {
            is_staked,
            pending_rewards,
            mech_requests_this_epoch,
            required_requests,
            epoch_end,
            program_name,
        })
    }

    async fn read_slot_availability(&self, staking_contract: &str) -> ChainResult<SlotAvailability> {
        let provider = self.read_provider();
        let staking = IStakingToken::new(parse_address(staking_contract)?, &provider);

        let ids = staking
            .getServiceIds()
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        let total = staking
            .maxNumServices()
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;

        let total_slots = to_u64(total);
        let used = ids.len() as u64;
        Ok(SlotAvailability {
            free_slots: total_slots.saturating_sub(used),
            total_slots,
        })
    }

    async fn read_price(&self) -> Option<f64> {
        price::fetch_token_price(&self.http, self.price_api_key.as_deref()).await
    }

    async fn submit_claim(&self, staking_contract: &str, service_id: u64) -> ChainResult<String> {
        let provider = self.signer_provider();
        let staking = IStakingToken::new(parse_address(staking_contract)?, &provider);

        let pending = staking
            .claim(U256::from(service_id))
            .send()
            .await
            .map_err(classify_send_error)?;
        let tx_hash = pending.tx_hash().to_string();

        logger::debug(
            LogTag::Chain,
            &format!("claim submitted for service {}: {}", service_id, tx_hash),
        );
        Ok(tx_hash)
    }

    async fn submit_withdrawal(&self, from: &str, to: &str, amount: f64) -> ChainResult<String> {
        let provider = self.signer_provider();
        let erc20 = IErc20::new(self.token, &provider);
        let raw = from_units(amount, TOKEN_DECIMALS);

        let pending = erc20
            .transfer(parse_address(to)?, raw)
            .send()
            .await
            .map_err(classify_send_error)?;
        let tx_hash = pending.tx_hash().to_string();

        logger::debug(
            LogTag::Chain,
            &format!("withdrawal of {} from {} submitted: {}", amount, from, tx_hash),
        );
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> ChainResult<TxOutcome> {
        let provider = self.read_provider();
        let hash: B256 = tx_hash
            .parse()
            .map_err(|_| ChainError::Unavailable(format!("invalid tx hash '{}'", tx_hash)))?;
        let deadline = Instant::now() + timeout;

        loop {
            match provider.get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    return Ok(if receipt.status() {
                        TxOutcome::Confirmed {
                            tx_hash: tx_hash.to_string(),
                        }
                    } else {
                        TxOutcome::Reverted {
                            tx_hash: tx_hash.to_string(),
                        }
                    });
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return Ok(TxOutcome::TimedOut {
                            tx_hash: tx_hash.to_string(),
                        });
                    }
                    tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
                }
                Err(e) => return Err(ChainError::Unavailable(e.to_string())),
            }
        }
    }
}

fn parse_address(address: &str) -> ChainResult<Address> {
    address
        .parse()
        .map_err(|_| ChainError::Unavailable(format!("invalid address '{}'", address)))
}

/// Classify a send failure: a JSON-RPC revert is a rejection, anything else
/// is a transport problem.
fn classify_send_error(e: alloy::contract::Error) -> ChainError {
    classify_send_message(e.to_string())
}

fn classify_send_message(message: String) -> ChainError {
    if message.contains("revert") {
        ChainError::Rejected(message)
    } else {
        ChainError::Unavailable(message)
    }
}

fn to_units(value: U256, decimals: u8) -> f64 {
    let raw = u128::try_from(value).unwrap_or(u128::MAX);
    raw as f64 / 10f64.powi(decimals as i32)
}

fn from_units(value: f64, decimals: u8) -> U256 {
    let raw = (value * 10f64.powi(decimals as i32)).max(0.0) as u128;
    U256::from(raw)
}

fn to_u64(value: U256) -> u64 {
    u64::try_from(value).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_conversion_roundtrip() {
        let wei = from_units(1.5, 18);
        assert_eq!(wei, U256::from(1_500_000_000_000_000_000u128));
        assert!((to_units(wei, 18) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn negative_amounts_clamp_to_zero() {
        assert_eq!(from_units(-0.5, 18), U256::ZERO);
    }

    #[test]
    fn revert_messages_classify_as_rejected() {
        let rejected = classify_send_message("server returned an error response: execution reverted: no rewards".to_string());
        assert!(matches!(rejected, ChainError::Rejected(_)));

        let transport = classify_send_message("error sending request: connection refused".to_string());
        assert!(matches!(transport, ChainError::Unavailable(_)));
    }
}
