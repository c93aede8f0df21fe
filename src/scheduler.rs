//! Scheduling: the poll cycle and the calendar autoclaim trigger.
//!
//! One driving loop fans read-only refreshes out across instances with
//! bounded concurrency; a failing instance never delays or aborts the
//! others. On each tick the autoclaim slot is compared against the durable
//! checkpoint — the checkpoint write happens before the claim job runs, so
//! a crash mid-claim can only under-claim a period, never double-claim it.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::alerts::{AlertTransition, ThresholdKind};
use crate::chain::ChainClient;
use crate::checkpoint::CheckpointStore;
use crate::claim::{ClaimOutcome, Orchestrator, WithdrawOutcome};
use crate::config::{AlertSettings, ScheduleSettings};
use crate::errors::ChainError;
use crate::logger::{self, LogTag};
use crate::notifications::{Notification, Notifier};
use crate::registry::{InstanceRegistry, ServiceInstance};
use crate::utils::check_shutdown_or_delay;

/// Poll fan-out width, sized to stay inside public RPC rate limits
const MAX_CONCURRENT_POLLS: usize = 4;

/// Upper bound on one instance's read refresh; a hung RPC counts as a
/// failed read instead of stalling the cycle
const POLL_READ_TIMEOUT: Duration = Duration::from_secs(45);

pub struct Scheduler {
    registry: Arc<InstanceRegistry>,
    chain: Arc<dyn ChainClient>,
    notifier: Arc<dyn Notifier>,
    orchestrator: Arc<Orchestrator>,
    checkpoints: Arc<CheckpointStore>,
    schedule: ScheduleSettings,
    alerts: AlertSettings,
    timezone: Tz,
}

impl Scheduler {
    pub fn new(
        registry: Arc<InstanceRegistry>,
        chain: Arc<dyn ChainClient>,
        notifier: Arc<dyn Notifier>,
        orchestrator: Arc<Orchestrator>,
        checkpoints: Arc<CheckpointStore>,
        schedule: ScheduleSettings,
        alerts: AlertSettings,
    ) -> anyhow::Result<Self> {
        let timezone: Tz = schedule
            .timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("unknown timezone '{}'", schedule.timezone))?;

        Ok(Self {
            registry,
            chain,
            notifier,
            orchestrator,
            checkpoints,
            schedule,
            alerts,
            timezone,
        })
    }

    /// Drive the poll cycle until shutdown
    pub async fn run(self: Arc<Self>, shutdown: Arc<Notify>) {
        logger::info(
            LogTag::Scheduler,
            &format!(
                "polling {} instances every {}s, autoclaim slot day {} {:02}:00 {}",
                self.registry.len(),
                self.schedule.poll_interval_secs,
                self.schedule.autoclaim_day,
                self.schedule.autoclaim_hour,
                self.schedule.timezone,
            ),
        );

        loop {
            self.poll_all().await;
            self.checkpoints.record_poll_tick(Utc::now());
            self.autoclaim_pass(Utc::now()).await;

            let interval = Duration::from_secs(self.schedule.poll_interval_secs);
            if check_shutdown_or_delay(&shutdown, interval).await {
                logger::info(LogTag::Scheduler, "scheduler shutting down");
                break;
            }
        }
    }

    /// One poll cycle over every instance
    async fn poll_all(&self) {
        futures::stream::iter(self.registry.instances().iter().cloned())
            .for_each_concurrent(MAX_CONCURRENT_POLLS, |instance| async move {
                self.poll_instance(&instance).await;
            })
            .await;

        // Slot usage per distinct staking contract, logged for operators
        // running close to capacity.
        for contract in self.registry.staking_contracts() {
            match self.chain.read_slot_availability(&contract).await {
                Ok(slots) => logger::debug(
                    LogTag::Scheduler,
                    &format!(
                        "{}: {}/{} slots free",
                        contract, slots.free_slots, slots.total_slots
                    ),
                ),
                Err(e) => logger::debug(
                    LogTag::Scheduler,
                    &format!("slot read failed for {}: {}", contract, e),
                ),
            }
        }
    }

    /// Refresh one instance and feed the alert engine.
    ///
    /// Failures are contained here; the caller's fan-out never sees them.
    async fn poll_instance(&self, instance: &ServiceInstance) {
        let spec = instance.spec();

        let balances_read =
            match tokio::time::timeout(POLL_READ_TIMEOUT, self.chain.read_balances(instance.wallets()))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(ChainError::Unavailable(format!(
                    "balance read timed out after {}s",
                    POLL_READ_TIMEOUT.as_secs()
                ))),
            };

        match balances_read {
            Ok(balances) => {
                // Staking refresh is best-effort state for the status
                // command; balances alone drive alerting.
                let staking = tokio::time::timeout(
                    POLL_READ_TIMEOUT,
                    self.chain.read_staking_status(
                        &spec.staking_contract,
                        spec.service_id,
                        &spec.wallets.safe,
                    ),
                )
                .await
                .ok()
                .and_then(|result| result.ok());

                let mut notifications: Vec<Notification> = Vec::new();
                {
                    let mut state = instance.state_mut().await;

                    let failures_before = state.failures.consecutive();
                    if state.failures.record_success() {
                        notifications
                            .push(Notification::chain_recovered(instance.id(), failures_before));
                    }

                    state.balances = Some(balances);
                    if staking.is_some() {
                        state.staking = staking;
                    }
                    state.last_refresh = Some(Utc::now());

                    let checks = [
                        (
                            ThresholdKind::AgentNative,
                            balances.agent_native,
                            spec.agent_threshold,
                            &spec.wallets.agent,
                        ),
                        (
                            ThresholdKind::SafeNative,
                            balances.safe_native + balances.safe_wrapped_native,
                            spec.safe_threshold,
                            &spec.wallets.safe,
                        ),
                        (
                            ThresholdKind::MasterSafeNative,
                            balances.master_safe_native,
                            spec.master_safe_threshold,
                            &spec.wallets.master_safe,
                        ),
                    ];

                    for (kind, value, threshold, address) in checks {
                        match state.alerts.observe(kind, value, threshold) {
                            Some(AlertTransition::Breached) => {
                                notifications.push(Notification::low_balance(
                                    instance.id(),
                                    kind.role(),
                                    address,
                                    value,
                                    threshold,
                                ));
                            }
                            Some(AlertTransition::Recovered) => {
                                if self.alerts.notify_recovery {
                                    notifications.push(Notification::balance_recovered(
                                        instance.id(),
                                        kind.role(),
                                        address,
                                        value,
                                        threshold,
                                    ));
                                }
                            }
                            None => {}
                        }
                    }
                }

                for notification in notifications {
                    self.send(notification).await;
                }
            }
            Err(e) => {
                let (should_alert, consecutive) = {
                    let mut state = instance.state_mut().await;
                    let should_alert = state.failures.record_failure();
                    (should_alert, state.failures.consecutive())
                };

                logger::warning(
                    LogTag::Scheduler,
                    &format!(
                        "[{}] balance read failed ({} consecutive): {}",
                        instance.id(),
                        consecutive,
                        e
                    ),
                );

                if should_alert {
                    self.send(Notification::chain_health(
                        instance.id(),
                        consecutive,
                        e.to_string(),
                    ))
                    .await;
                }
            }
        }
    }

    /// Fire autoclaim jobs whose calendar slot has passed this period
    async fn autoclaim_pass(&self, now: DateTime<Utc>) {
        let mut due: Vec<Arc<ServiceInstance>> = Vec::new();

        for instance in self.registry.instances() {
            if !instance.spec().autoclaim {
                continue;
            }

            let last_period = self.checkpoints.autoclaim_period(instance.id());
            let Some(period) =
                autoclaim_due(&self.schedule, self.timezone, last_period.as_deref(), now)
            else {
                continue;
            };

            // Persist first: if this write fails we skip the claim rather
            // than risk a duplicate after a crash-restart.
            if let Err(e) = self.checkpoints.record_autoclaim(instance.id(), &period) {
                logger::error(
                    LogTag::Scheduler,
                    &format!(
                        "[{}] cannot persist autoclaim checkpoint ({}), skipping this tick",
                        instance.id(),
                        e
                    ),
                );
                continue;
            }

            logger::info(
                LogTag::Scheduler,
                &format!("[{}] autoclaim slot reached for period {}", instance.id(), period),
            );
            due.push(instance.clone());
        }

        // Jobs run concurrently across instances, so one instance's
        // confirmation wait cannot hold up the others. Within an instance
        // the claim guard keeps the lifecycle strictly sequential.
        futures::stream::iter(due)
            .for_each_concurrent(MAX_CONCURRENT_POLLS, |instance| async move {
                let (claim, withdraw) = self.orchestrator.autoclaim(&instance).await;
                self.report_claim(instance.id(), claim).await;
                if let Some(withdraw) = withdraw {
                    self.report_withdraw(instance.id(), withdraw).await;
                }
            })
            .await;
    }

    async fn report_claim(&self, instance_id: &str, outcome: ClaimOutcome) {
        use crate::claim::TriggerKind::Autoclaim;
        match outcome {
            ClaimOutcome::Claimed { amount, tx_hash } => {
                self.send(Notification::claim_completed(
                    instance_id,
                    Autoclaim,
                    amount,
                    Some(tx_hash),
                ))
                .await;
            }
            ClaimOutcome::NothingToClaim => {
                self.send(Notification::claim_completed(instance_id, Autoclaim, 0.0, None))
                    .await;
            }
            ClaimOutcome::AlreadyInProgress => {
                // A manual job won the race; its own notification covers it.
                logger::info(
                    LogTag::Scheduler,
                    &format!("[{}] autoclaim skipped, job already in progress", instance_id),
                );
            }
            ClaimOutcome::Failed { stage, error } => {
                self.send(Notification::claim_failed(
                    instance_id,
                    Autoclaim,
                    stage.to_string(),
                    error.to_string(),
                ))
                .await;
            }
        }
    }

    async fn report_withdraw(&self, instance_id: &str, outcome: WithdrawOutcome) {
        use crate::claim::TriggerKind::Autoclaim;
        let destination = self
            .orchestrator
            .withdrawal_address()
            .unwrap_or_default()
            .to_string();

        match outcome {
            WithdrawOutcome::Withdrawn { transfers } => {
                self.send(Notification::withdraw_completed(
                    instance_id,
                    Autoclaim,
                    transfers,
                    &destination,
                ))
                .await;
            }
            WithdrawOutcome::NothingToWithdraw => {
                self.send(Notification::withdraw_completed(
                    instance_id,
                    Autoclaim,
                    vec![],
                    &destination,
                ))
                .await;
            }
            WithdrawOutcome::Failed {
                stage,
                error,
                completed,
            } => {
                self.send(Notification::withdraw_failed(
                    instance_id,
                    Autoclaim,
                    stage.to_string(),
                    error.to_string(),
                    completed,
                ))
                .await;
            }
            WithdrawOutcome::NotConfigured | WithdrawOutcome::AlreadyInProgress => {}
        }
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            logger::error(LogTag::Scheduler, &format!("notification failed: {}", e));
        }
    }
}

/// Decide whether the autoclaim slot for the current calendar period has
/// passed without a recorded run. Returns the period key to record.
pub fn autoclaim_due(
    schedule: &ScheduleSettings,
    timezone: Tz,
    last_period: Option<&str>,
    now_utc: DateTime<Utc>,
) -> Option<String> {
    use chrono::TimeZone;

    let now_local = now_utc.with_timezone(&timezone);
    let period = format!("{:04}-{:02}", now_local.year(), now_local.month());

    if last_period == Some(period.as_str()) {
        return None;
    }

    let slot = timezone
        .with_ymd_and_hms(
            now_local.year(),
            now_local.month(),
            schedule.autoclaim_day,
            schedule.autoclaim_hour,
            0,
            0,
        )
        .single()?;

    if now_local >= slot {
        Some(period)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use crate::chain::{BalanceSet, WalletSet};
    use crate::config::ClaimSettings;
    use crate::errors::ChainError;
    use crate::notifications::testing::CapturingNotifier;
    use crate::notifications::NotificationType;
    use crate::registry::testing::registry_of;
    use crate::registry::{InstanceSpec, ServiceInstance};
    use chrono::TimeZone;
    use chrono_tz::Tz;
    use std::sync::atomic::Ordering;
    use tempfile::tempdir;

    fn instance_with_thresholds(id: &str, agent: f64, safe: f64, master: f64) -> ServiceInstance {
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
            agent_threshold: agent,
            safe_threshold: safe,
            master_safe_threshold: master,
            manual_claim: true,
            autoclaim: true,
        };
        ServiceInstance::new(spec, 1)
    }

    struct Harness {
        scheduler: Scheduler,
        chain: Arc<MockChain>,
        notifier: Arc<CapturingNotifier>,
        _dir: tempfile::TempDir,
    }

    fn harness(instances: Vec<Arc<ServiceInstance>>, schedule: ScheduleSettings) -> Harness {
        let dir = tempdir().unwrap();
        let checkpoint_path = dir.path().join("checkpoints.json");
        harness_at(instances, schedule, checkpoint_path, dir)
    }

    fn harness_at(
        instances: Vec<Arc<ServiceInstance>>,
        schedule: ScheduleSettings,
        checkpoint_path: std::path::PathBuf,
        dir: tempfile::TempDir,
    ) -> Harness {
        let chain = Arc::new(MockChain::new());
        let notifier = Arc::new(CapturingNotifier::new());
        let claims = ClaimSettings {
            retry_base_delay_ms: 1,
            confirm_timeout_secs: 1,
            ..Default::default()
        };
        let orchestrator = Arc::new(Orchestrator::new(chain.clone(), &claims));
        let checkpoints = Arc::new(CheckpointStore::load(checkpoint_path));

        let scheduler = Scheduler::new(
            Arc::new(registry_of(instances)),
            chain.clone(),
            notifier.clone(),
            orchestrator,
            checkpoints,
            schedule,
            AlertSettings {
                health_alert_every: 1,
                ..Default::default()
            },
        )
        .unwrap();

        Harness {
            scheduler,
            chain,
            notifier,
            _dir: dir,
        }
    }

    fn healthy_balances(safe_native: f64) -> BalanceSet {
        BalanceSet {
            agent_native: 100.0,
            safe_native,
            safe_wrapped_native: 0.0,
            safe_token: 0.0,
            operator_native: 100.0,
            master_safe_native: 100.0,
            master_safe_token: 0.0,
        }
    }

    fn always_due_schedule() -> ScheduleSettings {
        ScheduleSettings {
            autoclaim_day: 1,
            autoclaim_hour: 0,
            ..Default::default()
        }
    }

    #[test]
    fn autoclaim_due_respects_slot_and_period() {
        let tz: Tz = "UTC".parse().unwrap();
        let schedule = ScheduleSettings {
            autoclaim_day: 15,
            autoclaim_hour: 9,
            ..Default::default()
        };

        // Before the slot in the month: not due
        let before = chrono::Utc.with_ymd_and_hms(2026, 8, 15, 8, 59, 0).unwrap();
        assert_eq!(autoclaim_due(&schedule, tz, None, before), None);

        // After the slot with no recorded run: due for 2026-08
        let after = chrono::Utc.with_ymd_and_hms(2026, 8, 15, 9, 0, 0).unwrap();
        assert_eq!(
            autoclaim_due(&schedule, tz, None, after).as_deref(),
            Some("2026-08")
        );

        // Already recorded for the period: not due
        assert_eq!(autoclaim_due(&schedule, tz, Some("2026-08"), after), None);

        // A run recorded last month does not block this month
        assert_eq!(
            autoclaim_due(&schedule, tz, Some("2026-07"), after).as_deref(),
            Some("2026-08")
        );
    }

    #[test]
    fn autoclaim_due_uses_configured_timezone() {
        let tz: Tz = "Europe/Madrid".parse().unwrap();
        let schedule = ScheduleSettings {
            autoclaim_day: 1,
            autoclaim_hour: 9,
            ..Default::default()
        };

        // 07:30 UTC on Aug 1st is 09:30 in Madrid (CEST) — already due
        let now = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 7, 30, 0).unwrap();
        assert_eq!(
            autoclaim_due(&schedule, tz, None, now).as_deref(),
            Some("2026-08")
        );

        // 06:30 UTC is 08:30 local — not yet
        let earlier = chrono::Utc.with_ymd_and_hms(2026, 8, 1, 6, 30, 0).unwrap();
        assert_eq!(autoclaim_due(&schedule, tz, None, earlier), None);
    }

    #[tokio::test]
    async fn failing_instance_does_not_block_others() {
        let a = Arc::new(instance_with_thresholds("a", 0.0, 0.0, 0.0));
        let b = Arc::new(instance_with_thresholds("b", 0.0, 0.0, 0.0));
        let h = harness(vec![a.clone(), b.clone()], always_due_schedule());

        h.chain.push_balances(
            "0xagent-a",
            Err(ChainError::Unavailable("rpc down".to_string())),
        );
        h.chain.push_balances("0xagent-b", Ok(healthy_balances(50.0)));

        h.scheduler.poll_all().await;

        // B was refreshed in the same cycle despite A's failure
        let b_state = b.snapshot().await;
        assert!(b_state.balances.is_some());
        assert!(b_state.last_refresh.is_some());

        // A recorded the failure and (alert_every = 1) raised a health alert
        let a_state = a.snapshot().await;
        assert!(a_state.balances.is_none());
        assert_eq!(a_state.failures.consecutive(), 1);
        let health_alerts = h
            .notifier
            .captured()
            .into_iter()
            .filter(|n| {
                matches!(
                    &n.notification_type,
                    NotificationType::ChainHealth { instance, .. } if instance == "a"
                )
            })
            .count();
        assert_eq!(health_alerts, 1);
    }

    #[tokio::test]
    async fn hysteresis_over_four_polls() {
        // Safe threshold 0.1, observed [0.2, 0.05, 0.05, 0.15]:
        // expect exactly one breach and one recovery notification.
        let instance = Arc::new(instance_with_thresholds("x", 0.0, 0.1, 0.0));
        let h = harness(vec![instance.clone()], ScheduleSettings::default());

        for value in [0.2, 0.05, 0.05, 0.15] {
            h.chain.push_balances("0xagent-x", Ok(healthy_balances(value)));
        }

        for _ in 0..4 {
            h.scheduler.poll_all().await;
        }

        let captured = h.notifier.captured();
        let breaches: Vec<_> = captured
            .iter()
            .filter(|n| matches!(n.notification_type, NotificationType::LowBalance { .. }))
            .collect();
        let recoveries: Vec<_> = captured
            .iter()
            .filter(|n| matches!(n.notification_type, NotificationType::BalanceRecovered { .. }))
            .collect();

        assert_eq!(breaches.len(), 1);
        assert_eq!(recoveries.len(), 1);
        match &breaches[0].notification_type {
            NotificationType::LowBalance {
                observed, threshold, role, ..
            } => {
                assert_eq!(*observed, 0.05);
                assert_eq!(*threshold, 0.1);
                assert_eq!(*role, "Service Safe");
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn unavailable_reads_do_not_change_alert_state() {
        let instance = Arc::new(instance_with_thresholds("x", 0.0, 0.1, 0.0));
        let h = harness(vec![instance.clone()], ScheduleSettings::default());

        // Breach, then a read failure, then still breached: the failure
        // must not reset hysteresis and re-alert.
        h.chain.push_balances("0xagent-x", Ok(healthy_balances(0.05)));
        h.chain.push_balances(
            "0xagent-x",
            Err(ChainError::Unavailable("rpc down".to_string())),
        );
        h.chain.push_balances("0xagent-x", Ok(healthy_balances(0.05)));

        for _ in 0..3 {
            h.scheduler.poll_all().await;
        }

        let low_balance_count = h
            .notifier
            .captured()
            .iter()
            .filter(|n| matches!(n.notification_type, NotificationType::LowBalance { .. }))
            .count();
        assert_eq!(low_balance_count, 1);
    }

    #[tokio::test]
    async fn autoclaim_fires_once_per_period() {
        let instance = Arc::new(instance_with_thresholds("x", 0.0, 0.0, 0.0));
        let h = harness(vec![instance.clone()], always_due_schedule());

        let now = Utc::now();
        h.scheduler.autoclaim_pass(now).await;
        h.scheduler.autoclaim_pass(now).await;
        h.scheduler.autoclaim_pass(now).await;

        // Eligibility was checked exactly once (default: zero rewards)
        assert_eq!(h.chain.staking_calls.load(Ordering::SeqCst), 1);
        let claim_notifications = h
            .notifier
            .captured()
            .iter()
            .filter(|n| matches!(n.notification_type, NotificationType::ClaimCompleted { .. }))
            .count();
        assert_eq!(claim_notifications, 1);
    }

    #[tokio::test]
    async fn autoclaim_checkpoint_survives_restart() {
        // First scheduler fires autoclaim; the checkpoint is written before
        // the claim job runs. A second scheduler over the same checkpoint
        // file (simulated crash-restart mid-claim) must not fire again in
        // the same period.
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");

        let instance = Arc::new(instance_with_thresholds("x", 0.0, 0.0, 0.0));
        let dir2 = tempdir().unwrap();
        let first = harness_at(
            vec![instance.clone()],
            always_due_schedule(),
            path.clone(),
            dir2,
        );
        first.scheduler.autoclaim_pass(Utc::now()).await;
        assert_eq!(first.chain.staking_calls.load(Ordering::SeqCst), 1);

        let restarted = harness_at(vec![instance], always_due_schedule(), path, dir);
        restarted.scheduler.autoclaim_pass(Utc::now()).await;
        assert_eq!(restarted.chain.staking_calls.load(Ordering::SeqCst), 0);
        assert_eq!(restarted.notifier.count(), 0);
    }

    #[tokio::test]
    async fn autoclaim_skips_disabled_instances() {
        let mut spec_instance = instance_with_thresholds("x", 0.0, 0.0, 0.0);
        // Rebuild with autoclaim disabled
        spec_instance = {
            let mut spec = spec_instance.spec().clone();
            spec.autoclaim = false;
            ServiceInstance::new(spec, 1)
        };
        let h = harness(vec![Arc::new(spec_instance)], always_due_schedule());

        h.scheduler.autoclaim_pass(Utc::now()).await;
        assert_eq!(h.chain.staking_calls.load(Ordering::SeqCst), 0);
    }
}
