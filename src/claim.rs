//! Claim/withdraw orchestration.
//!
//! One job per attempt, driven through `Idle → Eligible → Submitting →
//! Confirming → Completed/Failed`. The per-instance claim guard is taken
//! before anything else, so a manual command racing the scheduler gets an
//! immediate `AlreadyInProgress` instead of a queued duplicate. Transient
//! chain errors retry with backoff inside a bounded budget; an on-chain
//! rejection fails the job on the spot; a timed-out confirmation is
//! re-checked by hash, never resubmitted.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::chain::{ChainClient, TxOutcome};
use crate::config::ClaimSettings;
use crate::errors::{ChainError, ChainResult};
use crate::logger::{self, LogTag};
use crate::registry::ServiceInstance;

/// What started a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    Manual,
    Autoclaim,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Manual => write!(f, "manual"),
            TriggerKind::Autoclaim => write!(f, "autoclaim"),
        }
    }
}

/// Sibling job kinds sharing the same state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Claim,
    Withdraw,
}

/// Lifecycle states of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Eligible,
    Submitting,
    Confirming,
    Completed,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobState::Idle => "idle",
            JobState::Eligible => "eligibility check",
            JobState::Submitting => "submission",
            JobState::Confirming => "confirmation",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// Ephemeral record of one orchestration attempt
#[derive(Debug, Clone)]
pub struct ClaimJob {
    pub id: Uuid,
    pub instance_id: String,
    pub kind: JobKind,
    pub trigger: TriggerKind,
    pub state: JobState,
    pub attempts: u32,
    pub last_error: Option<ChainError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClaimJob {
    fn new(instance_id: &str, kind: JobKind, trigger: TriggerKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id: instance_id.to_string(),
            kind,
            trigger,
            state: JobState::Idle,
            attempts: 0,
            last_error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn advance(&mut self, state: JobState) {
        logger::debug(
            LogTag::Claim,
            &format!(
                "job {} [{}] {} -> {}",
                self.id, self.instance_id, self.state, state
            ),
        );
        self.state = state;
    }
}

/// Outcome history entry kept on the instance
#[derive(Debug, Clone)]
pub struct ClaimRecord {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub trigger: TriggerKind,
    pub success: bool,
    pub summary: String,
    pub tx_hash: Option<String>,
    pub completed_at: DateTime<Utc>,
}

/// Terminal result of a claim job
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed { amount: f64, tx_hash: String },
    /// Pending rewards at or below dust — an idempotent no-op, not an error
    NothingToClaim,
    AlreadyInProgress,
    Failed { stage: JobState, error: ChainError },
}

/// One confirmed withdrawal transfer
#[derive(Debug, Clone, PartialEq)]
pub struct WithdrawTransfer {
    pub tx_hash: String,
    pub amount: f64,
    pub source: String,
}

/// Terminal result of a withdraw job
#[derive(Debug, Clone, PartialEq)]
pub enum WithdrawOutcome {
    Withdrawn { transfers: Vec<WithdrawTransfer> },
    NothingToWithdraw,
    NotConfigured,
    AlreadyInProgress,
    Failed {
        stage: JobState,
        error: ChainError,
        completed: Vec<WithdrawTransfer>,
    },
}

/// Bounded retry schedule for transient chain errors
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff: base, 2×base, 4×base, …
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Per-instance claim/withdraw driver
pub struct Orchestrator {
    chain: Arc<dyn ChainClient>,
    retry: RetryPolicy,
    dust_threshold: f64,
    confirm_timeout: Duration,
    confirm_rechecks: u32,
    withdrawal_address: Option<String>,
}

impl Orchestrator {
    pub fn new(chain: Arc<dyn ChainClient>, settings: &ClaimSettings) -> Self {
        Self {
            chain,
            retry: RetryPolicy {
                max_attempts: settings.max_attempts.max(1),
                base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            },
            dust_threshold: settings.dust_threshold,
            confirm_timeout: Duration::from_secs(settings.confirm_timeout_secs),
            confirm_rechecks: settings.confirm_rechecks,
            withdrawal_address: settings.withdrawal_address.clone(),
        }
    }

    pub fn withdrawal_address(&self) -> Option<&str> {
        self.withdrawal_address.as_deref()
    }

    /// Run one claim job for an instance.
    pub async fn claim(&self, instance: &ServiceInstance, trigger: TriggerKind) -> ClaimOutcome {
        let Some(_guard) = instance.try_begin_claim() else {
            logger::warning(
                LogTag::Claim,
                &format!("[{}] claim rejected: already in progress", instance.id()),
            );
            return ClaimOutcome::AlreadyInProgress;
        };

        let mut job = ClaimJob::new(instance.id(), JobKind::Claim, trigger);
        job.advance(JobState::Eligible);

        let spec = instance.spec();
        let status = match self
            .with_retries(&mut job, || {
                self.chain
                    .read_staking_status(&spec.staking_contract, spec.service_id, &spec.wallets.safe)
            })
            .await
        {
            Ok(status) => status,
            Err(error) => {
                return self.fail_claim(instance, job, JobState::Eligible, error).await;
            }
        };

        if status.pending_rewards <= self.dust_threshold {
            job.advance(JobState::Completed);
            self.record(instance, &job, true, "nothing to claim".to_string(), None)
                .await;
            return ClaimOutcome::NothingToClaim;
        }

        job.advance(JobState::Submitting);
        let tx_hash = match self
            .with_retries(&mut job, || {
                self.chain
                    .submit_claim(&spec.staking_contract, spec.service_id)
            })
            .await
        {
            Ok(tx_hash) => tx_hash,
            Err(error) => {
                return self.fail_claim(instance, job, JobState::Submitting, error).await;
            }
        };

        job.advance(JobState::Confirming);
        match self.confirm(&mut job, &tx_hash).await {
            Ok(confirmed_hash) => {
                job.advance(JobState::Completed);
                let amount = status.pending_rewards;
                self.record(
                    instance,
                    &job,
                    true,
                    format!("claimed {} rewards", crate::utils::format_amount(amount)),
                    Some(confirmed_hash.clone()),
                )
                .await;
                ClaimOutcome::Claimed {
                    amount,
                    tx_hash: confirmed_hash,
                }
            }
            Err(error) => self.fail_claim(instance, job, JobState::Confirming, error).await,
        }
    }

    /// Run one withdraw job for an instance, sweeping the reward token from
    /// the master safe and the service safe to the configured address.
    pub async fn withdraw(&self, instance: &ServiceInstance, trigger: TriggerKind) -> WithdrawOutcome {
        let Some(to) = self.withdrawal_address.clone() else {
            return WithdrawOutcome::NotConfigured;
        };

        let Some(_guard) = instance.try_begin_claim() else {
            logger::warning(
                LogTag::Claim,
                &format!("[{}] withdraw rejected: already in progress", instance.id()),
            );
            return WithdrawOutcome::AlreadyInProgress;
        };

        let mut job = ClaimJob::new(instance.id(), JobKind::Withdraw, trigger);
        job.advance(JobState::Eligible);

        let wallets = instance.wallets().clone();
        let balances = match self
            .with_retries(&mut job, || self.chain.read_balances(&wallets))
            .await
        {
            Ok(balances) => balances,
            Err(error) => {
                return self.fail_withdraw(instance, job, JobState::Eligible, error, vec![]).await;
            }
        };

        let sources = [
            ("Master Safe", wallets.master_safe.clone(), balances.master_safe_token),
            ("Service Safe", wallets.safe.clone(), balances.safe_token),
        ];
        let pending: Vec<_> = sources
            .into_iter()
            .filter(|(_, _, amount)| *amount > self.dust_threshold)
            .collect();

        if pending.is_empty() {
            job.advance(JobState::Completed);
            self.record(instance, &job, true, "nothing to withdraw".to_string(), None)
                .await;
            return WithdrawOutcome::NothingToWithdraw;
        }

        let mut transfers: Vec<WithdrawTransfer> = Vec::new();
        for (source, from, amount) in pending {
            job.advance(JobState::Submitting);
            let tx_hash = match self
                .with_retries(&mut job, || self.chain.submit_withdrawal(&from, &to, amount))
                .await
            {
                Ok(tx_hash) => tx_hash,
                Err(error) => {
                    return self
                        .fail_withdraw(instance, job, JobState::Submitting, error, transfers)
                        .await;
                }
            };

            job.advance(JobState::Confirming);
            match self.confirm(&mut job, &tx_hash).await {
                Ok(confirmed_hash) => transfers.push(WithdrawTransfer {
                    tx_hash: confirmed_hash,
                    amount,
                    source: source.to_string(),
                }),
                Err(error) => {
                    return self
                        .fail_withdraw(instance, job, JobState::Confirming, error, transfers)
                        .await;
                }
            }
        }

        job.advance(JobState::Completed);
        let total: f64 = transfers.iter().map(|t| t.amount).sum();
        self.record(
            instance,
            &job,
            true,
            format!("withdrew {} rewards", crate::utils::format_amount(total)),
            transfers.last().map(|t| t.tx_hash.clone()),
        )
        .await;
        WithdrawOutcome::Withdrawn { transfers }
    }

    /// Scheduled claim followed by the chained withdrawal (when configured).
    ///
    /// The withdrawal only runs when the claim terminated cleanly, so a
    /// failed claim surfaces alone instead of being masked by a second
    /// failure.
    pub async fn autoclaim(&self, instance: &ServiceInstance) -> (ClaimOutcome, Option<WithdrawOutcome>) {
        let claim = self.claim(instance, TriggerKind::Autoclaim).await;

        let chain_withdrawal = matches!(
            claim,
            ClaimOutcome::Claimed { .. } | ClaimOutcome::NothingToClaim
        ) && self.withdrawal_address.is_some();

        if !chain_withdrawal {
            return (claim, None);
        }

        let withdraw = self.withdraw(instance, TriggerKind::Autoclaim).await;
        (claim, Some(withdraw))
    }

    /// Retry a chain operation on transient errors within the attempt budget.
    async fn with_retries<T, F, Fut>(&self, job: &mut ClaimJob, op: F) -> ChainResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            job.attempts += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_recoverable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    logger::warning(
                        LogTag::Claim,
                        &format!(
                            "[{}] attempt {}/{} failed ({}), retrying in {:?}",
                            job.instance_id, attempt, self.retry.max_attempts, error, delay
                        ),
                    );
                    job.last_error = Some(error);
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    job.last_error = Some(error.clone());
                    return Err(error);
                }
            }
        }
    }

    /// Wait for a confirmation, re-checking the same hash on timeout or a
    /// transient error. Resubmission never happens here.
    async fn confirm(&self, job: &mut ClaimJob, tx_hash: &str) -> ChainResult<String> {
        let mut rechecks = 0;
        loop {
            match self.chain.wait_for_confirmation(tx_hash, self.confirm_timeout).await {
                Ok(TxOutcome::Confirmed { tx_hash }) => return Ok(tx_hash),
                Ok(TxOutcome::Reverted { tx_hash }) => {
                    return Err(ChainError::Rejected(format!(
                        "transaction {} reverted on-chain",
                        tx_hash
                    )));
                }
                Ok(TxOutcome::TimedOut { .. }) if rechecks < self.confirm_rechecks => {
                    rechecks += 1;
                    logger::warning(
                        LogTag::Claim,
                        &format!(
                            "[{}] confirmation of {} timed out, re-checking ({}/{})",
                            job.instance_id, tx_hash, rechecks, self.confirm_rechecks
                        ),
                    );
                }
                Ok(TxOutcome::TimedOut { .. }) => {
                    return Err(ChainError::TimedOut {
                        seconds: self.confirm_timeout.as_secs(),
                    });
                }
                Err(error) if error.is_recoverable() && rechecks < self.confirm_rechecks => {
                    rechecks += 1;
                    logger::warning(
                        LogTag::Claim,
                        &format!(
                            "[{}] confirmation check failed ({}), re-checking ({}/{})",
                            job.instance_id, error, rechecks, self.confirm_rechecks
                        ),
                    );
                    job.last_error = Some(error);
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn fail_claim(
        &self,
        instance: &ServiceInstance,
        mut job: ClaimJob,
        stage: JobState,
        error: ChainError,
    ) -> ClaimOutcome {
        job.advance(JobState::Failed);
        self.record(instance, &job, false, format!("{} failed: {}", stage, error), None)
            .await;
        ClaimOutcome::Failed { stage, error }
    }

    async fn fail_withdraw(
        &self,
        instance: &ServiceInstance,
        mut job: ClaimJob,
        stage: JobState,
        error: ChainError,
        completed: Vec<WithdrawTransfer>,
    ) -> WithdrawOutcome {
        job.advance(JobState::Failed);
        self.record(instance, &job, false, format!("{} failed: {}", stage, error), None)
            .await;
        WithdrawOutcome::Failed {
            stage,
            error,
            completed,
        }
    }

    async fn record(
        &self,
        instance: &ServiceInstance,
        job: &ClaimJob,
        success: bool,
        summary: String,
        tx_hash: Option<String>,
    ) {
        let level = if success { logger::info } else { logger::error };
        level(
            LogTag::Claim,
            &format!("[{}] {:?} job {}: {}", job.instance_id, job.kind, job.id, summary),
        );

        let mut state = instance.state_mut().await;
        state.last_claim = Some(ClaimRecord {
            job_id: job.id,
            kind: job.kind,
            trigger: job.trigger,
            success,
            summary,
            tx_hash,
            completed_at: Utc::now(),
        });
    }
}
