//! Enforcement actions
//!
//! Carries out a throttle decision: publish a student warning, report an
//! alert to the backend and, when asked, terminate the process. Report and
//! kill run as independent tasks; a failure of one never cancels the other.

pub mod killer;

use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::constants::{ALERT_SEVERITY_HIGH, ALERT_TYPE_FORBIDDEN_APP};
use crate::context::{current_within, ContextProvider};
use crate::daemon::logging::AgentLogger;
use crate::models::{Action, AlertRecord, ExamContext, StudentWarning, Violation, ViolationKind};
use crate::remote::{AlertSink, RemoteError};

pub use killer::{ProcessKiller, SystemKiller};

/// Capacity of the warning channel; slow subscribers lose the oldest warnings
const WARNING_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EnforcementError {
    #[error("no running process named {0}")]
    NotRunning(String),
    #[error("failed to terminate {name} (pid {pid}): {reason}")]
    Kill { pid: u32, name: String, reason: String },
    #[error("alert report failed: {0}")]
    Report(#[from] RemoteError),
    #[error("{phase} timed out after {timeout:?}")]
    Timeout { phase: &'static str, timeout: Duration },
    #[error("enforcement task failed: {0}")]
    Task(String),
}

/// Warning text shown to the student
pub fn warning_for(violation: &Violation) -> StudentWarning {
    let message = match violation.kind {
        ViolationKind::NotAllowed => format!(
            "The application \"{}\" is not allowed during the exam.",
            violation.process_name
        ),
        ViolationKind::Forbidden => format!(
            "The application \"{}\" is forbidden during the exam.",
            violation.process_name
        ),
    };
    StudentWarning {
        app: violation.process_name.clone(),
        message,
    }
}

/// Alert body for a violation in the given session
pub fn build_alert(violation: &Violation, context: &ExamContext) -> AlertRecord {
    AlertRecord {
        alert_type: ALERT_TYPE_FORBIDDEN_APP.to_string(),
        severity: ALERT_SEVERITY_HIGH.to_string(),
        description: format!("Forbidden application detected: {}", violation.process_name),
        session_id: context.session_id,
        exam_id: context.exam_id,
        student_id: context.student_id,
        process: violation.process_name.clone(),
    }
}

/// Side effects of admitted violations
pub struct EnforcementActions {
    warnings: broadcast::Sender<StudentWarning>,
    alerts: Arc<dyn AlertSink>,
    context: Arc<dyn ContextProvider>,
    killer: Arc<dyn ProcessKiller>,
    phase_timeout: Duration,
    logger: AgentLogger,
    kills_requested: AtomicU64,
    reports_failed: AtomicU64,
}

impl EnforcementActions {
    pub fn new(
        alerts: Arc<dyn AlertSink>,
        context: Arc<dyn ContextProvider>,
        killer: Arc<dyn ProcessKiller>,
        phase_timeout: Duration,
        logger: AgentLogger,
    ) -> Self {
        let (warnings, _) = broadcast::channel(WARNING_CHANNEL_CAPACITY);
        Self {
            warnings,
            alerts,
            context,
            killer,
            phase_timeout,
            logger,
            kills_requested: AtomicU64::new(0),
            reports_failed: AtomicU64::new(0),
        }
    }

    /// Receive student warnings published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<StudentWarning> {
        self.warnings.subscribe()
    }

    pub fn kills_requested(&self) -> u64 {
        self.kills_requested.load(Ordering::Relaxed)
    }

    pub fn reports_failed(&self) -> u64 {
        self.reports_failed.load(Ordering::Relaxed)
    }

    /// Publish a warning. Having no subscriber is not an error.
    pub fn notify(&self, violation: &Violation) {
        let warning = warning_for(violation);
        if self.warnings.send(warning).is_err() {
            debug!("no warning subscriber for {}", violation.process_name);
        }
    }

    /// Send an alert for the violation, bounded by the phase timeout
    pub async fn report(&self, violation: &Violation) -> Result<(), EnforcementError> {
        let context = current_within(self.context.as_ref(), self.phase_timeout).await;
        let alert = build_alert(violation, &context);
        let send = self.alerts.send_alert(&alert, context.auth_token.as_deref());
        match tokio::time::timeout(self.phase_timeout, send).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(EnforcementError::Timeout {
                phase: "alert report",
                timeout: self.phase_timeout,
            }),
        }
    }

    /// Terminate all processes matching the violation, bounded by the phase timeout
    pub async fn kill(&self, violation: &Violation) -> Result<usize, EnforcementError> {
        self.kills_requested.fetch_add(1, Ordering::Relaxed);
        match tokio::time::timeout(self.phase_timeout, self.killer.kill_by_name(&violation.process_name)).await {
            Ok(result) => result,
            Err(_) => Err(EnforcementError::Timeout {
                phase: "process kill",
                timeout: self.phase_timeout,
            }),
        }
    }

    /// Carry out an action. Notification happens before this returns;
    /// report and kill run in the returned tasks.
    pub fn dispatch(self: &Arc<Self>, action: Action, violation: &Violation) -> Vec<JoinHandle<()>> {
        let mut pending = Vec::new();
        if action.notifies() {
            self.notify(violation);
        }

        if action.reports() {
            let actions = Arc::clone(self);
            let violation = violation.clone();
            pending.push(tokio::spawn(async move {
                if let Err(e) = actions.report(&violation).await {
                    actions.reports_failed.fetch_add(1, Ordering::Relaxed);
                    actions.logger.log_report_failed(&violation.process_name, &e.to_string());
                }
            }));
        }

        if action.kills() {
            let actions = Arc::clone(self);
            let violation = violation.clone();
            pending.push(tokio::spawn(async move {
                match actions.kill(&violation).await {
                    Ok(count) => actions.logger.log_process_killed(&violation.process_name, count),
                    Err(e) => actions.logger.log_kill_failed(&violation.process_name, &e.to_string()),
                }
            }));
        }

        pending
    }
}
