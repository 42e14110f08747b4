//! Per-target health state machine.

use std::collections::HashMap;
use std::fmt;

/// Health of a single target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthState {
    /// Targets start healthy so the first run does not raise a burst of alerts.
    #[default]
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "Healthy"),
            HealthState::Unhealthy => write!(f, "Unhealthy"),
        }
    }
}

/// Event emitted by a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    Alert,
    Recovery,
}

/// Next state and event for a probe outcome.
///
/// Level-triggered: every failing observation emits an alert, and throttling
/// is left to the dispatcher.
pub fn transition(previous: HealthState, success: bool) -> (HealthState, Option<HealthEvent>) {
    match (previous, success) {
        (_, false) => (HealthState::Unhealthy, Some(HealthEvent::Alert)),
        (HealthState::Unhealthy, true) => (HealthState::Healthy, Some(HealthEvent::Recovery)),
        (HealthState::Healthy, true) => (HealthState::Healthy, None),
    }
}

/// Health state for every target seen so far.
#[derive(Debug, Default)]
pub struct HealthTracker {
    states: HashMap<String, HealthState>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome and return the event it triggers, if any.
    pub fn observe(&mut self, target: &str, success: bool) -> Option<HealthEvent> {
        let state = self.states.entry(target.to_string()).or_default();
        let (next, event) = transition(*state, success);
        *state = next;
        event
    }

    pub fn state(&self, target: &str) -> HealthState {
        self.states.get(target).copied().unwrap_or_default()
    }
}
