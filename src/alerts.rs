//! Threshold hysteresis engine and read-failure health tracking.
//!
//! Alert state lives per (instance, threshold kind). A crossing emits
//! exactly one transition: repeated polls on the same side of a threshold
//! are silent. Unavailable reads never touch alert state; they feed the
//! failure tracker instead, which rate-limits operational-health alerts.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Which side of its threshold a value was last observed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Normal,
    Breached,
}

/// The wallet-balance thresholds monitored per instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThresholdKind {
    AgentNative,
    SafeNative,
    MasterSafeNative,
}

impl ThresholdKind {
    /// Operator-facing wallet role name
    pub fn role(&self) -> &'static str {
        match self {
            ThresholdKind::AgentNative => "Agent EOA",
            ThresholdKind::SafeNative => "Service Safe",
            ThresholdKind::MasterSafeNative => "Master Safe",
        }
    }
}

/// Transition produced by evaluating one fresh observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTransition {
    Breached,
    Recovered,
}

/// Evaluate a fresh observation against a threshold.
///
/// Pure function of (previous state, value, threshold): returns the new
/// state and the transition, if this observation crossed the threshold.
pub fn evaluate(prev: AlertState, value: f64, threshold: f64) -> (AlertState, Option<AlertTransition>) {
    let below = value < threshold;
    match (prev, below) {
        (AlertState::Normal, true) => (AlertState::Breached, Some(AlertTransition::Breached)),
        (AlertState::Breached, false) => (AlertState::Normal, Some(AlertTransition::Recovered)),
        (state, _) => (state, None),
    }
}

/// Alert state for one (instance, threshold kind) pair
#[derive(Debug, Clone, Copy)]
pub struct AlertSlot {
    pub state: AlertState,
    pub since: DateTime<Utc>,
}

impl Default for AlertSlot {
    fn default() -> Self {
        Self {
            state: AlertState::Normal,
            since: Utc::now(),
        }
    }
}

/// All alert slots of one instance
#[derive(Debug, Clone, Default)]
pub struct AlertBook {
    slots: HashMap<ThresholdKind, AlertSlot>,
}

impl AlertBook {
    pub fn state(&self, kind: ThresholdKind) -> AlertState {
        self.slots.get(&kind).map(|s| s.state).unwrap_or_default()
    }

    /// Apply one observation; returns the transition if the threshold was crossed
    pub fn observe(
        &mut self,
        kind: ThresholdKind,
        value: f64,
        threshold: f64,
    ) -> Option<AlertTransition> {
        let slot = self.slots.entry(kind).or_default();
        let (next, transition) = evaluate(slot.state, value, threshold);
        if transition.is_some() {
            slot.state = next;
            slot.since = Utc::now();
        }
        transition
    }
}

/// Tracks consecutive chain-read failures for one instance.
///
/// An operational-health alert fires on every Nth consecutive failure, so
/// a flapping RPC cannot drown real balance alerts in noise.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    consecutive: u32,
    alert_every: u32,
}

impl FailureTracker {
    pub fn new(alert_every: u32) -> Self {
        Self {
            consecutive: 0,
            alert_every: alert_every.max(1),
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Record a failed read; returns `true` when a health alert is due
    pub fn record_failure(&mut self) -> bool {
        self.consecutive += 1;
        self.consecutive % self.alert_every == 0
    }

    /// Record a successful read; returns `true` if this ended a failure run
    pub fn record_success(&mut self) -> bool {
        let was_failing = self.consecutive > 0;
        self.consecutive = 0;
        was_failing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_emits_exactly_once() {
        let threshold = 0.1;
        let mut book = AlertBook::default();

        // Observed sequence 0.2, 0.05, 0.05, 0.15 -> none, Breached, none, Recovered
        assert_eq!(book.observe(ThresholdKind::SafeNative, 0.2, threshold), None);
        assert_eq!(
            book.observe(ThresholdKind::SafeNative, 0.05, threshold),
            Some(AlertTransition::Breached)
        );
        assert_eq!(book.observe(ThresholdKind::SafeNative, 0.05, threshold), None);
        assert_eq!(
            book.observe(ThresholdKind::SafeNative, 0.15, threshold),
            Some(AlertTransition::Recovered)
        );
        assert_eq!(book.state(ThresholdKind::SafeNative), AlertState::Normal);
    }

    #[test]
    fn value_at_threshold_is_normal() {
        let (state, transition) = evaluate(AlertState::Normal, 0.1, 0.1);
        assert_eq!(state, AlertState::Normal);
        assert_eq!(transition, None);

        let (state, transition) = evaluate(AlertState::Breached, 0.1, 0.1);
        assert_eq!(state, AlertState::Normal);
        assert_eq!(transition, Some(AlertTransition::Recovered));
    }

    #[test]
    fn threshold_kinds_are_independent() {
        let mut book = AlertBook::default();
        assert_eq!(
            book.observe(ThresholdKind::AgentNative, 0.01, 0.1),
            Some(AlertTransition::Breached)
        );
        // The safe threshold has its own state and still starts Normal
        assert_eq!(book.state(ThresholdKind::SafeNative), AlertState::Normal);
        assert_eq!(book.observe(ThresholdKind::SafeNative, 5.0, 1.0), None);
        assert_eq!(book.state(ThresholdKind::AgentNative), AlertState::Breached);
    }

    #[test]
    fn failure_tracker_rate_limits() {
        let mut tracker = FailureTracker::new(3);
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.record_failure()); // 3rd
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(tracker.record_failure()); // 6th
        assert!(tracker.record_success());
        assert!(!tracker.record_success());
        // Counter restarts after recovery
        assert!(!tracker.record_failure());
        assert_eq!(tracker.consecutive(), 1);
    }
}
