//! Violation throttling
//!
//! Decides what to do with each violation: suppress it, or let it through
//! and count it toward an auto-kill. The decision is a pure function of the
//! throttle state, the policy and the supplied clock reading.

use crate::models::{normalize_process_name, Action, LockPolicy, Violation};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Throttle tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleSettings {
    /// Minimum gap between two admitted violations for one process
    pub dedup_interval: Duration,
    /// Global cap on admitted violations per window
    pub max_alerts_per_window: u32,
    /// Length of the global quota window
    pub window: Duration,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        use crate::constants::{
            DEFAULT_ALERT_WINDOW_SECS, DEFAULT_DEDUP_INTERVAL_SECS, DEFAULT_MAX_ALERTS_PER_WINDOW,
        };
        Self {
            dedup_interval: Duration::from_secs_f64(DEFAULT_DEDUP_INTERVAL_SECS),
            max_alerts_per_window: DEFAULT_MAX_ALERTS_PER_WINDOW,
            window: Duration::from_secs_f64(DEFAULT_ALERT_WINDOW_SECS),
        }
    }
}

/// Per-process throttle bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessThrottle {
    pub last_admitted_at: Option<Instant>,
    pub repeat_count: u32,
}

/// State that lives for one monitoring session
#[derive(Debug, Clone, Default)]
pub struct ThrottleState {
    pub per_process: HashMap<String, ProcessThrottle>,
    pub window_start: Option<Instant>,
    pub admitted_in_window: u32,
}

/// Dedup, global quota and repeat counting for violations
#[derive(Debug, Clone, Default)]
pub struct ViolationThrottle {
    settings: ThrottleSettings,
    state: ThrottleState,
}

impl ViolationThrottle {
    pub fn new(settings: ThrottleSettings) -> Self {
        Self {
            settings,
            state: ThrottleState::default(),
        }
    }

    pub fn settings(&self) -> &ThrottleSettings {
        &self.settings
    }

    pub fn state(&self) -> &ThrottleState {
        &self.state
    }

    /// Decide on a violation using the current time
    pub fn admit(&mut self, violation: &Violation, policy: &LockPolicy) -> Action {
        self.admit_at(violation, policy, Instant::now())
    }

    /// Decide on a violation at an explicit instant
    pub fn admit_at(&mut self, violation: &Violation, policy: &LockPolicy, now: Instant) -> Action {
        let key = normalize_process_name(&violation.process_name);

        if let Some(last) = self
            .state
            .per_process
            .get(&key)
            .and_then(|entry| entry.last_admitted_at)
        {
            if now.saturating_duration_since(last) < self.settings.dedup_interval {
                return Action::Suppress;
            }
        }

        let window_expired = match self.state.window_start {
            None => true,
            Some(start) => now.saturating_duration_since(start) >= self.settings.window,
        };
        if window_expired {
            self.state.window_start = Some(now);
            self.state.admitted_in_window = 0;
        }
        if self.state.admitted_in_window >= self.settings.max_alerts_per_window {
            return Action::Suppress;
        }

        self.state.admitted_in_window += 1;
        let entry = self.state.per_process.entry(key).or_default();
        entry.last_admitted_at = Some(now);

        if !policy.auto_kill {
            return Action::NotifyAndReport;
        }

        entry.repeat_count += 1;
        if entry.repeat_count >= policy.effective_threshold() {
            // Reset before the kill is attempted so a failing kill cannot loop
            entry.repeat_count = 0;
            Action::NotifyReportAndKill
        } else {
            Action::NotifyAndReport
        }
    }

    /// Current repeat counter for a process
    pub fn repeat_count(&self, process_name: &str) -> u32 {
        self.state
            .per_process
            .get(&normalize_process_name(process_name))
            .map(|entry| entry.repeat_count)
            .unwrap_or(0)
    }

    /// Forget everything (monitoring stopped)
    pub fn reset(&mut self) {
        self.state = ThrottleState::default();
    }
}
