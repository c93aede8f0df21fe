//! Scripted chain client for tests.
//!
//! Each call kind pops from its own result queue; an empty queue yields a
//! benign default so tests only script the calls they care about. Call
//! counters let tests assert retry and idempotency behavior without real
//! network timing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::chain::{
    BalanceSet, ChainClient, SlotAvailability, StakingStatus, TxOutcome, WalletSet,
};
use crate::errors::ChainResult;

/// Build a staking status with the given pending rewards
pub fn staking_status(pending_rewards: f64) -> StakingStatus {
    StakingStatus {
        is_staked: true,
        pending_rewards,
        mech_requests_this_epoch: 10,
        required_requests: 12,
        epoch_end: Utc::now(),
        program_name: "Test Program".to_string(),
    }
}

#[derive(Default)]
pub struct MockChain {
    balances: Mutex<HashMap<String, VecDeque<ChainResult<BalanceSet>>>>,
    default_balances: Mutex<BalanceSet>,
    staking: Mutex<VecDeque<ChainResult<StakingStatus>>>,
    claims: Mutex<VecDeque<ChainResult<String>>>,
    withdrawals: Mutex<VecDeque<ChainResult<String>>>,
    confirmations: Mutex<VecDeque<ChainResult<TxOutcome>>>,
    price: Mutex<Option<f64>>,
    read_delay: Mutex<Duration>,

    pub balance_calls: AtomicU32,
    pub staking_calls: AtomicU32,
    pub claim_calls: AtomicU32,
    pub withdrawal_calls: AtomicU32,
    pub confirmation_calls: AtomicU32,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a balances result for the instance identified by its agent address
    pub fn push_balances(&self, agent: &str, result: ChainResult<BalanceSet>) {
        self.balances
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .push_back(result);
    }

    /// Balances returned when an instance's queue is empty
    pub fn set_default_balances(&self, balances: BalanceSet) {
        *self.default_balances.lock().unwrap() = balances;
    }

    pub fn push_staking(&self, result: ChainResult<StakingStatus>) {
        self.staking.lock().unwrap().push_back(result);
    }

    pub fn push_claim(&self, result: ChainResult<String>) {
        self.claims.lock().unwrap().push_back(result);
    }

    pub fn push_withdrawal(&self, result: ChainResult<String>) {
        self.withdrawals.lock().unwrap().push_back(result);
    }

    pub fn push_confirmation(&self, result: ChainResult<TxOutcome>) {
        self.confirmations.lock().unwrap().push_back(result);
    }

    pub fn set_price(&self, price: Option<f64>) {
        *self.price.lock().unwrap() = price;
    }

    /// Delay applied to read calls, to widen race windows in concurrency tests
    pub fn set_read_delay(&self, delay: Duration) {
        *self.read_delay.lock().unwrap() = delay;
    }

    async fn apply_read_delay(&self) {
        let delay = *self.read_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn read_balances(&self, wallets: &WalletSet) -> ChainResult<BalanceSet> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_read_delay().await;
        let queued = self
            .balances
            .lock()
            .unwrap()
            .get_mut(&wallets.agent)
            .and_then(|q| q.pop_front());
        match queued {
            Some(result) => result,
            None => Ok(*self.default_balances.lock().unwrap()),
        }
    }

    async fn read_staking_status(
        &self,
        _staking_contract: &str,
        _service_id: u64,
        _safe: &str,
    ) -> ChainResult<StakingStatus> {
        self.staking_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_read_delay().await;
        match self.staking.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(staking_status(0.0)),
        }
    }

    async fn read_slot_availability(
        &self,
        _staking_contract: &str,
    ) -> ChainResult<SlotAvailability> {
        Ok(SlotAvailability {
            free_slots: 5,
            total_slots: 10,
        })
    }

    async fn read_price(&self) -> Option<f64> {
        *self.price.lock().unwrap()
    }

    async fn submit_claim(&self, _staking_contract: &str, _service_id: u64) -> ChainResult<String> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        match self.claims.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok("0xclaimtx".to_string()),
        }
    }

    async fn submit_withdrawal(&self, _from: &str, _to: &str, _amount: f64) -> ChainResult<String> {
        self.withdrawal_calls.fetch_add(1, Ordering::SeqCst);
        match self.withdrawals.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok("0xwithdrawtx".to_string()),
        }
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        _timeout: Duration,
    ) -> ChainResult<TxOutcome> {
        self.confirmation_calls.fetch_add(1, Ordering::SeqCst);
        match self.confirmations.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(TxOutcome::Confirmed {
                tx_hash: tx_hash.to_string(),
            }),
        }
    }
}
