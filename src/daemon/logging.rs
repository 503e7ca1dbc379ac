//! Structured agent logging
//!
//! Events go through the `log` facade as `"<message> | <json>"`. On macOS the
//! backend is the Unified Logging System; elsewhere it is a tracing-subscriber
//! formatter filtered by `EXAMLOCK_LOG`.

use log::{debug, error, info, warn};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::AGENT_CATEGORY;
use crate::models::{Action, LockMode, LockPolicy, MonitorStats, Violation};

/// Install the platform log backend. Safe to call more than once; later
/// calls are ignored.
#[cfg(target_os = "macos")]
pub fn install_backend(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let logger = oslog::OsLogger::new(crate::constants::APP_SUBSYSTEM);
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}

/// Install the platform log backend. Safe to call more than once; later
/// calls are ignored.
#[cfg(not(target_os = "macos"))]
pub fn install_backend(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(crate::constants::LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Severity of an agent event
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Emits structured enforcement events tagged with a per-run instance id
#[derive(Debug, Clone)]
pub struct AgentLogger {
    level: LogLevel,
    instance_id: Uuid,
}

impl Default for AgentLogger {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl AgentLogger {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            instance_id: Uuid::new_v4(),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn log_monitor_started(&self, tick_interval_secs: f64, phase_timeout_secs: f64, inventory_backend: &str) {
        self.emit(
            LogLevel::Info,
            "Enforcement loop started",
            "monitor_started",
            json!({
                "tick_interval_secs": tick_interval_secs,
                "phase_timeout_secs": phase_timeout_secs,
                "inventory": inventory_backend,
                "pid": std::process::id(),
            }),
        );
    }

    pub fn log_monitor_stopped(&self, stats: &MonitorStats) {
        self.emit(
            LogLevel::Info,
            "Enforcement loop stopped",
            "monitor_stopped",
            json!({
                "ticks": stats.ticks,
                "violations_admitted": stats.violations_admitted,
                "violations_suppressed": stats.violations_suppressed,
                "kills_requested": stats.kills_requested,
            }),
        );
    }

    pub fn log_policy_refreshed(&self, policy: &LockPolicy) {
        let mode = match policy.mode {
            LockMode::Whitelist => "whitelist",
            LockMode::Blacklist => "blacklist",
        };
        self.emit(
            LogLevel::Info,
            &format!("Effective policy is now {}", mode),
            "policy_refreshed",
            json!({
                "mode": mode,
                "allowed_apps": policy.allowed_apps.len(),
                "forbidden_apps": policy.forbidden_apps.len(),
                "auto_kill": policy.auto_kill,
                "repeat_threshold": policy.repeat_threshold,
            }),
        );
    }

    pub fn log_violation_admitted(&self, violation: &Violation, action: Action) {
        self.emit(
            LogLevel::Warn,
            &format!("Violation: {}", violation.process_name),
            "violation_admitted",
            json!({
                "process": violation.process_name,
                "rule": violation.rule_matched,
                "kind": violation.kind,
                "action": action,
            }),
        );
    }

    pub fn log_violation_suppressed(&self, violation: &Violation) {
        self.emit(
            LogLevel::Debug,
            &format!("Violation suppressed: {}", violation.process_name),
            "violation_suppressed",
            json!({
                "process": violation.process_name,
                "rule": violation.rule_matched,
            }),
        );
    }

    pub fn log_report_failed(&self, process: &str, reason: &str) {
        self.emit(
            LogLevel::Warn,
            &format!("Alert for {} not delivered", process),
            "alert_report_failed",
            json!({ "process": process, "reason": reason }),
        );
    }

    pub fn log_process_killed(&self, process: &str, terminated: usize) {
        self.emit(
            LogLevel::Info,
            &format!("Terminated {}", process),
            "process_killed",
            json!({ "process": process, "terminated": terminated }),
        );
    }

    pub fn log_kill_failed(&self, process: &str, reason: &str) {
        self.emit(
            LogLevel::Warn,
            &format!("Could not terminate {}", process),
            "kill_failed",
            json!({ "process": process, "reason": reason }),
        );
    }

    pub fn log_inventory_empty(&self, backend: &str) {
        self.emit(
            LogLevel::Warn,
            "Process inventory returned no processes",
            "inventory_empty",
            json!({ "inventory": backend }),
        );
    }

    /// Build the JSON payload for an event
    pub fn event(&self, event: &str, fields: Value) -> Value {
        let mut payload = json!({
            "event": event,
            "category": AGENT_CATEGORY,
            "instance_id": self.instance_id.to_string(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let (Value::Object(target), Value::Object(extra)) = (&mut payload, fields) {
            target.extend(extra);
        }
        payload
    }

    fn emit(&self, level: LogLevel, message: &str, event: &str, fields: Value) {
        if !self.should_log(level) {
            return;
        }
        let full_message = format!("{} | {}", message, self.event(event, fields));
        match level {
            LogLevel::Error => error!("{}", full_message),
            LogLevel::Warn => warn!("{}", full_message),
            LogLevel::Info => info!("{}", full_message),
            LogLevel::Debug => debug!("{}", full_message),
        }
    }

    fn should_log(&self, level: LogLevel) -> bool {
        level <= self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filtering() {
        let logger = AgentLogger::new(LogLevel::Warn);
        assert!(logger.should_log(LogLevel::Error));
        assert!(logger.should_log(LogLevel::Warn));
        assert!(!logger.should_log(LogLevel::Info));
        assert!(!logger.should_log(LogLevel::Debug));

        let verbose = AgentLogger::new(LogLevel::Debug);
        assert!(verbose.should_log(LogLevel::Debug));
    }

    #[test]
    fn test_event_payload_carries_instance_and_fields() {
        let logger = AgentLogger::default();
        let payload = logger.event("process_killed", json!({ "process": "discord", "terminated": 2 }));

        assert_eq!(payload["event"], "process_killed");
        assert_eq!(payload["category"], AGENT_CATEGORY);
        assert_eq!(payload["instance_id"], logger.instance_id().to_string());
        assert_eq!(payload["process"], "discord");
        assert_eq!(payload["terminated"], 2);
        assert!(chrono::DateTime::parse_from_rfc3339(payload["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_instances_are_distinct() {
        assert_ne!(AgentLogger::default().instance_id(), AgentLogger::default().instance_id());
    }
}
