//! Notification model.
//!
//! Each variant carries enough structure for plain-text rendering: the
//! instance, the wallet role or job trigger, amounts and thresholds, and
//! transaction references where one exists.

use chrono::{DateTime, Utc};

use crate::claim::{TriggerKind, WithdrawTransfer};

/// Types of notifications sent to the operator
#[derive(Clone, Debug)]
pub enum NotificationType {
    /// A wallet balance dropped below its threshold
    LowBalance {
        instance: String,
        role: &'static str,
        address: String,
        observed: f64,
        threshold: f64,
    },

    /// A previously breached balance rose back above its threshold
    BalanceRecovered {
        instance: String,
        role: &'static str,
        address: String,
        observed: f64,
        threshold: f64,
    },

    /// Repeated chain-read failures for one instance
    ChainHealth {
        instance: String,
        consecutive_failures: u32,
        error: String,
    },

    /// Reads for an instance succeeded again after a failure run
    ChainRecovered {
        instance: String,
        after_failures: u32,
    },

    /// A claim job terminated cleanly; `tx_hash` is absent for the
    /// nothing-to-claim no-op
    ClaimCompleted {
        instance: String,
        trigger: TriggerKind,
        amount: f64,
        tx_hash: Option<String>,
    },

    /// A claim job failed after exhausting its options
    ClaimFailed {
        instance: String,
        trigger: TriggerKind,
        stage: String,
        reason: String,
    },

    /// A withdraw job terminated cleanly; no transfers means there was
    /// nothing to withdraw
    WithdrawCompleted {
        instance: String,
        trigger: TriggerKind,
        transfers: Vec<WithdrawTransfer>,
        destination: String,
    },

    /// A withdraw job failed; `completed` lists transfers that confirmed
    /// before the failure
    WithdrawFailed {
        instance: String,
        trigger: TriggerKind,
        stage: String,
        reason: String,
        completed: Vec<WithdrawTransfer>,
    },

    /// Bot startup notification
    BotStarted { version: String, instances: usize },

    /// Bot shutdown notification
    BotStopped { reason: String },
}

/// A notification with timestamp
#[derive(Clone, Debug)]
pub struct Notification {
    pub notification_type: NotificationType,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    /// Create a new notification with current timestamp
    pub fn new(notification_type: NotificationType) -> Self {
        Self {
            notification_type,
            timestamp: Utc::now(),
        }
    }

    pub fn low_balance(
        instance: &str,
        role: &'static str,
        address: &str,
        observed: f64,
        threshold: f64,
    ) -> Self {
        Self::new(NotificationType::LowBalance {
            instance: instance.to_string(),
            role,
            address: address.to_string(),
            observed,
            threshold,
        })
    }

    pub fn balance_recovered(
        instance: &str,
        role: &'static str,
        address: &str,
        observed: f64,
        threshold: f64,
    ) -> Self {
        Self::new(NotificationType::BalanceRecovered {
            instance: instance.to_string(),
            role,
            address: address.to_string(),
            observed,
            threshold,
        })
    }

    pub fn chain_health(instance: &str, consecutive_failures: u32, error: String) -> Self {
        Self::new(NotificationType::ChainHealth {
            instance: instance.to_string(),
            consecutive_failures,
            error,
        })
    }

    pub fn chain_recovered(instance: &str, after_failures: u32) -> Self {
        Self::new(NotificationType::ChainRecovered {
            instance: instance.to_string(),
            after_failures,
        })
    }

    pub fn claim_completed(
        instance: &str,
        trigger: TriggerKind,
        amount: f64,
        tx_hash: Option<String>,
    ) -> Self {
        Self::new(NotificationType::ClaimCompleted {
            instance: instance.to_string(),
            trigger,
            amount,
            tx_hash,
        })
    }

    pub fn claim_failed(instance: &str, trigger: TriggerKind, stage: String, reason: String) -> Self {
        Self::new(NotificationType::ClaimFailed {
            instance: instance.to_string(),
            trigger,
            stage,
            reason,
        })
    }

    pub fn withdraw_completed(
        instance: &str,
        trigger: TriggerKind,
        transfers: Vec<WithdrawTransfer>,
        destination: &str,
    ) -> Self {
        Self::new(NotificationType::WithdrawCompleted {
            instance: instance.to_string(),
            trigger,
            transfers,
            destination: destination.to_string(),
        })
    }

    pub fn withdraw_failed(
        instance: &str,
        trigger: TriggerKind,
        stage: String,
        reason: String,
        completed: Vec<WithdrawTransfer>,
    ) -> Self {
        Self::new(NotificationType::WithdrawFailed {
            instance: instance.to_string(),
            trigger,
            stage,
            reason,
            completed,
        })
    }

    pub fn bot_started(version: &str, instances: usize) -> Self {
        Self::new(NotificationType::BotStarted {
            version: version.to_string(),
            instances,
        })
    }

    pub fn bot_stopped(reason: &str) -> Self {
        Self::new(NotificationType::BotStopped {
            reason: reason.to_string(),
        })
    }
}
