//! Output formatting module
//!
//! Handles:
//! - Student warnings printed by `examlock run` (human and JSON)
//! - Dry-run results printed by `examlock check`
//! - The statistics summary printed on shutdown

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::constants::EVENT_STUDENT_WARNING;
use crate::models::{LockMode, MonitorStats, StudentWarning, Violation, ViolationKind};

/// A student warning stamped with the time it was shown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarningEvent {
    pub timestamp: String,
    pub event_type: String,
    pub app: String,
    pub message: String,
}

/// Build the printable event for a warning
pub fn create_warning_event(warning: &StudentWarning, at: SystemTime) -> Result<WarningEvent> {
    Ok(WarningEvent {
        timestamp: iso8601(at)?,
        event_type: EVENT_STUDENT_WARNING.to_string(),
        app: warning.app.clone(),
        message: warning.message.clone(),
    })
}

fn iso8601(at: SystemTime) -> Result<String> {
    use time::OffsetDateTime;

    let timestamp = OffsetDateTime::from(at);
    Ok(timestamp.format(&time::format_description::well_known::Iso8601::DEFAULT)?)
}

/// `[<timestamp>] WARNING <app>: <message>`
pub fn format_warning_human(event: &WarningEvent) -> String {
    format!("[{}] WARNING {}: {}", event.timestamp, event.app, event.message)
}

pub fn format_warning_json(event: &WarningEvent) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

/// One violation found by a dry run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFinding {
    pub process: String,
    pub rule: String,
    pub kind: ViolationKind,
}

/// Result of `examlock check`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckReport {
    pub timestamp: String,
    pub mode: LockMode,
    pub sampled: usize,
    pub violations: Vec<CheckFinding>,
}

impl CheckReport {
    pub fn new(mode: LockMode, sampled: usize, violations: &[Violation], at: SystemTime) -> Result<Self> {
        Ok(Self {
            timestamp: iso8601(at)?,
            mode,
            sampled,
            violations: violations
                .iter()
                .map(|v| CheckFinding {
                    process: v.process_name.clone(),
                    rule: v.rule_matched.clone(),
                    kind: v.kind,
                })
                .collect(),
        })
    }
}

pub fn format_check_human(report: &CheckReport) -> String {
    let mode = match report.mode {
        LockMode::Whitelist => "whitelist",
        LockMode::Blacklist => "blacklist",
    };
    let mut out = format!("Sampled {} processes ({} mode)\n", report.sampled, mode);
    if report.violations.is_empty() {
        out.push_str("No violations found.");
        return out;
    }

    out.push_str(&format!("Found {} violations:\n", report.violations.len()));
    for finding in &report.violations {
        out.push_str(&format!("  {} (rule: {})\n", finding.process, finding.rule));
    }
    out.truncate(out.trim_end().len());
    out
}

pub fn format_check_json(report: &CheckReport) -> Result<String> {
    Ok(serde_json::to_string_pretty(report)?)
}

/// Shutdown summary
pub fn format_stats_human(stats: &MonitorStats) -> String {
    format!(
        "Ticks: {}  Violations: {} detected, {} admitted, {} suppressed  Kills requested: {}  Failed reports: {}",
        stats.ticks,
        stats.violations_detected,
        stats.violations_admitted,
        stats.violations_suppressed,
        stats.kills_requested,
        stats.reports_failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    fn fixed_time() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn warning() -> StudentWarning {
        StudentWarning {
            app: "discord".to_string(),
            message: "The application \"discord\" is forbidden during the exam.".to_string(),
        }
    }

    #[test]
    fn test_human_warning_line() {
        let event = create_warning_event(&warning(), fixed_time()).unwrap();
        let line = format_warning_human(&event);

        assert!(line.starts_with("[2023-11-14T22:13:20"));
        assert!(line.ends_with("] WARNING discord: The application \"discord\" is forbidden during the exam."));
    }

    #[test]
    fn test_json_warning_fields() {
        let event = create_warning_event(&warning(), fixed_time()).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&format_warning_json(&event).unwrap()).unwrap();

        assert_eq!(parsed["event_type"], EVENT_STUDENT_WARNING);
        assert_eq!(parsed["app"], "discord");
        assert!(parsed["timestamp"].as_str().unwrap().starts_with("2023-11-14"));
    }

    #[test]
    fn test_check_report_formats() {
        let violations = vec![Violation {
            process_name: "chrome".to_string(),
            rule_matched: "chrome".to_string(),
            kind: ViolationKind::Forbidden,
            detected_at: fixed_time(),
        }];
        let report = CheckReport::new(LockMode::Blacklist, 42, &violations, fixed_time()).unwrap();

        let human = format_check_human(&report);
        assert!(human.contains("Sampled 42 processes (blacklist mode)"));
        assert!(human.contains("chrome (rule: chrome)"));

        let json: serde_json::Value = serde_json::from_str(&format_check_json(&report).unwrap()).unwrap();
        assert_eq!(json["mode"], "blacklist");
        assert_eq!(json["violations"][0]["kind"], "forbidden");

        let clean = CheckReport::new(LockMode::Blacklist, 3, &[], fixed_time()).unwrap();
        assert!(format_check_human(&clean).ends_with("No violations found."));
    }
}
