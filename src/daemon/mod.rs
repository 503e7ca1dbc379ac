//! Agent scheduler
//!
//! Drives the enforcement loop: once per tick it refreshes the policy,
//! samples running processes, evaluates them and hands admitted violations
//! to the enforcement actions.
//! - Configuration loading and validation (`config`)
//! - Structured event logging (`logging`)

pub mod config;
pub mod logging;

use log::{error, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::constants::{VIOLATION_HISTORY_CAP, VIOLATION_HISTORY_TRIM};
use crate::context::ContextProvider;
use crate::daemon::config::AgentConfiguration;
use crate::daemon::logging::AgentLogger;
use crate::enforce::{EnforcementActions, ProcessKiller, SystemKiller};
use crate::models::{Action, LockMode, LockPolicy, MonitorStats, SampleSet, StudentWarning, Violation};
use crate::monitor::{evaluate, inventory_for, ProcessInventory, ThrottleSettings, ViolationThrottle};
use crate::remote::{AlertSink, ApiClient, PolicySource, RemoteError};
use crate::sync::ConfigSync;

/// Everything a scheduler needs, with each external seam injectable
pub struct SchedulerParts {
    pub inventory: Arc<dyn ProcessInventory>,
    pub source: Arc<dyn PolicySource>,
    pub alerts: Arc<dyn AlertSink>,
    pub context: Arc<dyn ContextProvider>,
    pub killer: Arc<dyn ProcessKiller>,
    pub defaults: LockPolicy,
    pub throttle: ThrottleSettings,
    pub tick_interval: Duration,
    pub phase_timeout: Duration,
    pub logger: AgentLogger,
}

/// Outcome of one tick
#[derive(Debug)]
pub struct TickReport {
    pub mode: LockMode,
    pub sampled: usize,
    pub detected: usize,
    /// Violations that passed the throttle, with the action taken
    pub admitted: Vec<(Violation, Action)>,
    /// Report and kill tasks started by this tick
    pub pending: Vec<JoinHandle<()>>,
}

impl TickReport {
    /// Wait for the report and kill tasks of this tick to finish
    pub async fn wait_for_actions(&mut self) {
        for handle in self.pending.drain(..) {
            if let Err(e) = handle.await {
                warn!("enforcement task ended abnormally: {}", e);
            }
        }
    }
}

/// Bounded in-memory record of admitted violations
#[derive(Debug, Default)]
pub struct ViolationHistory {
    entries: VecDeque<Violation>,
}

impl ViolationHistory {
    pub fn push(&mut self, violation: Violation) {
        if self.entries.len() >= VIOLATION_HISTORY_CAP {
            let excess = self.entries.len() - VIOLATION_HISTORY_TRIM + 1;
            self.entries.drain(..excess);
        }
        self.entries.push_back(violation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<Violation> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }
}

/// Append to the shared history; returns false if the lock is poisoned
fn record_admitted(history: &StdMutex<ViolationHistory>, violation: &Violation) -> bool {
    match history.lock() {
        Ok(mut history) => {
            history.push(violation.clone());
            true
        }
        Err(_) => {
            warn!(
                "violation history lock poisoned, {} not recorded",
                violation.process_name
            );
            false
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    empty_samples: AtomicU64,
    violations_detected: AtomicU64,
    violations_admitted: AtomicU64,
    violations_suppressed: AtomicU64,
}

/// State shared between the scheduler handle and its loop task
struct EngineState {
    inventory: Arc<dyn ProcessInventory>,
    sync: ConfigSync,
    throttle: Mutex<ViolationThrottle>,
    enforcement: Arc<EnforcementActions>,
    logger: AgentLogger,
    phase_timeout: Duration,
    history: StdMutex<ViolationHistory>,
    last_policy: StdMutex<Option<LockPolicy>>,
    counters: Counters,
    active_loops: AtomicUsize,
}

impl EngineState {
    async fn tick(&self) -> TickReport {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let policy = self.sync.refresh().await;
        self.note_policy(&policy);

        let samples = match tokio::time::timeout(self.phase_timeout, self.inventory.sample()).await {
            Ok(samples) => samples,
            Err(_) => {
                warn!(
                    "{} inventory timed out after {:?}",
                    self.inventory.backend(),
                    self.phase_timeout
                );
                SampleSet::new()
            }
        };
        if samples.is_empty() {
            self.counters.empty_samples.fetch_add(1, Ordering::Relaxed);
            self.logger.log_inventory_empty(self.inventory.backend());
        }

        let violations = evaluate(&samples, &policy, policy.mode);
        self.counters
            .violations_detected
            .fetch_add(violations.len() as u64, Ordering::Relaxed);

        let mut report = TickReport {
            mode: policy.mode,
            sampled: samples.len(),
            detected: violations.len(),
            admitted: Vec::new(),
            pending: Vec::new(),
        };

        let mut throttle = self.throttle.lock().await;
        for violation in violations {
            let action = throttle.admit(&violation, &policy);
            if action == Action::Suppress {
                self.counters.violations_suppressed.fetch_add(1, Ordering::Relaxed);
                self.logger.log_violation_suppressed(&violation);
                continue;
            }

            self.counters.violations_admitted.fetch_add(1, Ordering::Relaxed);
            self.logger.log_violation_admitted(&violation, action);
            record_admitted(&self.history, &violation);
            report.pending.extend(self.enforcement.dispatch(action, &violation));
            report.admitted.push((violation, action));
        }

        report
    }

    /// Log when the effective policy differs from the previous tick's
    fn note_policy(&self, policy: &LockPolicy) {
        let Ok(mut last) = self.last_policy.lock() else {
            return;
        };
        if last.as_ref() != Some(policy) {
            self.logger.log_policy_refreshed(policy);
            *last = Some(policy.clone());
        }
    }

    fn stats(&self, running: bool) -> MonitorStats {
        MonitorStats {
            running,
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            empty_samples: self.counters.empty_samples.load(Ordering::Relaxed),
            violations_detected: self.counters.violations_detected.load(Ordering::Relaxed),
            violations_admitted: self.counters.violations_admitted.load(Ordering::Relaxed),
            violations_suppressed: self.counters.violations_suppressed.load(Ordering::Relaxed),
            kills_requested: self.enforcement.kills_requested(),
            reports_failed: self.enforcement.reports_failed(),
        }
    }
}

/// Counts a live loop for as long as it exists
struct LoopGuard(Arc<EngineState>);

impl LoopGuard {
    fn new(state: Arc<EngineState>) -> Self {
        state.active_loops.fetch_add(1, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.active_loops.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RunningLoop {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Owns the enforcement loop. At most one loop runs per scheduler.
pub struct Scheduler {
    state: Arc<EngineState>,
    tick_interval: Duration,
    running: Option<RunningLoop>,
}

impl Scheduler {
    pub fn new(parts: SchedulerParts) -> Self {
        let enforcement = Arc::new(EnforcementActions::new(
            parts.alerts,
            Arc::clone(&parts.context),
            parts.killer,
            parts.phase_timeout,
            parts.logger.clone(),
        ));
        let sync = ConfigSync::new(parts.source, parts.context, parts.defaults, parts.phase_timeout);

        Self {
            state: Arc::new(EngineState {
                inventory: parts.inventory,
                sync,
                throttle: Mutex::new(ViolationThrottle::new(parts.throttle)),
                enforcement,
                logger: parts.logger,
                phase_timeout: parts.phase_timeout,
                history: StdMutex::new(ViolationHistory::default()),
                last_policy: StdMutex::new(None),
                counters: Counters::default(),
                active_loops: AtomicUsize::new(0),
            }),
            tick_interval: parts.tick_interval,
            running: None,
        }
    }

    /// Wire the production backends from a validated configuration
    pub fn from_config(
        config: &AgentConfiguration,
        context: Arc<dyn ContextProvider>,
        logger: AgentLogger,
    ) -> Result<Self, RemoteError> {
        let client = Arc::new(ApiClient::new(&config.remote.api_base, config.request_timeout())?);
        Ok(Self::new(SchedulerParts {
            inventory: Arc::from(inventory_for(config.agent.inventory, config.phase_timeout())),
            source: client.clone(),
            alerts: client,
            context,
            killer: Arc::new(SystemKiller::new()),
            defaults: config.default_policy(),
            throttle: config.throttle_settings(),
            tick_interval: config.tick_interval(),
            phase_timeout: config.phase_timeout(),
            logger,
        }))
    }

    /// Start the loop. A running loop is stopped first, so starting twice
    /// still leaves exactly one loop.
    pub async fn start(&mut self) {
        if self.running.is_some() {
            self.stop().await;
        }

        let guard = LoopGuard::new(Arc::clone(&self.state));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let state = Arc::clone(&self.state);
        let period = self.tick_interval;
        let handle = tokio::spawn(async move {
            let _guard = guard;
            run_loop(state, period, shutdown_rx).await;
        });

        self.state.logger.log_monitor_started(
            self.tick_interval.as_secs_f64(),
            self.state.phase_timeout.as_secs_f64(),
            self.state.inventory.backend(),
        );
        self.running = Some(RunningLoop {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the loop and clear all throttle state. A tick in progress
    /// finishes first. No-op when not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(());
        if let Err(e) = running.handle.await {
            error!("enforcement loop ended abnormally: {}", e);
        }
        self.state.throttle.lock().await.reset();
        if let Ok(mut last) = self.state.last_policy.lock() {
            *last = None;
        }
        self.state.logger.log_monitor_stopped(&self.stats());
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Number of live loop tasks (0 or 1)
    pub fn active_loops(&self) -> usize {
        self.state.active_loops.load(Ordering::SeqCst)
    }

    /// Run a single tick outside the loop
    pub async fn tick_once(&self) -> TickReport {
        self.state.tick().await
    }

    pub fn stats(&self) -> MonitorStats {
        self.state.stats(self.is_running())
    }

    /// Admitted violations, newest first
    pub fn recent_violations(&self, limit: usize) -> Vec<Violation> {
        self.state
            .history
            .lock()
            .map(|history| history.recent(limit))
            .unwrap_or_default()
    }

    /// Receive student warnings as they are published
    pub fn subscribe_warnings(&self) -> broadcast::Receiver<StudentWarning> {
        self.state.enforcement.subscribe()
    }

    /// Current repeat counter for a process
    pub async fn repeat_count(&self, process_name: &str) -> u32 {
        self.state.throttle.lock().await.repeat_count(process_name)
    }

    /// Processes with live throttle state
    pub async fn throttled_processes(&self) -> usize {
        self.state.throttle.lock().await.state().per_process.len()
    }

    /// Last-known-good policy
    pub async fn cached_policy(&self) -> LockPolicy {
        self.state.sync.cached().await
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.handle.abort();
        }
    }
}

async fn run_loop(state: Arc<EngineState>, period: Duration, mut shutdown: oneshot::Receiver<()>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = interval.tick() => {}
        }

        // A panicking tick is logged and the loop keeps going
        let tick_state = Arc::clone(&state);
        if let Err(e) = tokio::spawn(async move { tick_state.tick().await }).await {
            error!("enforcement tick failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ViolationKind;
    use std::time::SystemTime;

    fn violation(n: usize) -> Violation {
        Violation {
            process_name: format!("app{}", n),
            rule_matched: "app".to_string(),
            kind: ViolationKind::Forbidden,
            detected_at: SystemTime::now(),
        }
    }

    #[test]
    fn test_history_returns_newest_first() {
        let mut history = ViolationHistory::default();
        for n in 0..5 {
            history.push(violation(n));
        }
        let recent = history.recent(2);
        assert_eq!(recent[0].process_name, "app4");
        assert_eq!(recent[1].process_name, "app3");
        assert_eq!(history.recent(100).len(), 5);
    }

    #[test]
    fn test_record_admitted_survives_poisoned_history() {
        let history = Arc::new(StdMutex::new(ViolationHistory::default()));
        assert!(record_admitted(&history, &violation(0)));

        let poisoner = Arc::clone(&history);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the history lock");
        })
        .join();

        assert!(history.is_poisoned());
        assert!(!record_admitted(&history, &violation(1)));
    }

    #[test]
    fn test_history_trims_to_newest_entries() {
        let mut history = ViolationHistory::default();
        for n in 0..VIOLATION_HISTORY_CAP {
            history.push(violation(n));
        }
        assert_eq!(history.len(), VIOLATION_HISTORY_CAP);

        history.push(violation(VIOLATION_HISTORY_CAP));
        assert_eq!(history.len(), VIOLATION_HISTORY_TRIM);
        assert_eq!(
            history.recent(1)[0].process_name,
            format!("app{}", VIOLATION_HISTORY_CAP)
        );
    }
}
