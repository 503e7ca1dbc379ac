//! Data models module
//!
//! Defines core data structures shared by the enforcement pipeline:
//! - ProcessSample: one normalized running-process name
//! - LockPolicy: effective allow/deny policy for a tick
//! - Violation / Action: policy findings and throttle decisions
//! - AlertRecord / StudentWarning: outbound payloads
//! - ExamContext: identity supplied by the session provider

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;

use crate::constants::{DEFAULT_ALLOWED_APPS, DEFAULT_FORBIDDEN_APPS, DEFAULT_REPEAT_THRESHOLD};

/// Executable suffixes removed during normalization
const EXECUTABLE_SUFFIXES: &[&str] = &[".exe", ".app"];

/// Normalize a raw OS process name or policy pattern.
///
/// Lowercases, trims quotes and whitespace, drops the directory prefix of a
/// path-like name and strips one trailing executable suffix. Raw OS strings
/// are never compared directly; every comparison goes through this function
/// first.
///
/// Only absolute or explicitly relative Unix paths and anything containing a
/// backslash count as paths. Linux kernel thread names such as
/// `kworker/0:1-events` keep their slash.
pub fn normalize_process_name(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('"').trim();
    let file_name = if is_path_like(trimmed) {
        trimmed
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(trimmed)
    } else {
        trimmed
    };
    let base = file_name.trim().to_lowercase();

    for suffix in EXECUTABLE_SUFFIXES {
        if let Some(stripped) = base.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    base
}

fn is_path_like(name: &str) -> bool {
    name.contains('\\') || name.starts_with('/') || name.starts_with("./") || name.starts_with("../")
}

/// A single running process observed during one inventory pass
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessSample {
    /// Normalized process name (lowercase, no extension)
    pub name: String,
    /// When the inventory pass ran
    pub sampled_at: SystemTime,
}

/// Deduplicated, name-ordered result of one inventory pass
pub type SampleSet = BTreeSet<ProcessSample>;

impl ProcessSample {
    /// Build a sample set from raw names sharing one timestamp.
    /// Names that normalize to an empty string are dropped.
    pub fn batch<I, S>(raw_names: I, sampled_at: SystemTime) -> SampleSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw_names
            .into_iter()
            .map(|raw| normalize_process_name(raw.as_ref()))
            .filter(|name| !name.is_empty())
            .map(|name| ProcessSample { name, sampled_at })
            .collect()
    }
}

/// How the policy is applied for a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Only allowed apps may run
    Whitelist,
    /// Only forbidden apps are reported
    Blacklist,
}

/// Lock policy as seen by the policy engine.
///
/// `mode` is derived each tick by ConfigSync and is never taken from the
/// remote document. The cached last-known-good copy always carries
/// `LockMode::Blacklist`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPolicy {
    pub mode: LockMode,
    pub allowed_apps: BTreeSet<String>,
    pub forbidden_apps: BTreeSet<String>,
    pub auto_kill: bool,
    /// Admitted violations before an auto-kill (>= 1)
    pub repeat_threshold: u32,
}

impl LockPolicy {
    /// Build a blacklist-mode policy from explicit lists
    pub fn new<A, F>(allowed: A, forbidden: F, auto_kill: bool, repeat_threshold: u32) -> Self
    where
        A: IntoIterator,
        A::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            mode: LockMode::Blacklist,
            allowed_apps: allowed.into_iter().map(Into::into).collect(),
            forbidden_apps: forbidden.into_iter().map(Into::into).collect(),
            auto_kill,
            repeat_threshold: repeat_threshold.max(1),
        }
    }

    /// Effective repeat threshold, never below 1
    pub fn effective_threshold(&self) -> u32 {
        self.repeat_threshold.max(1)
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_ALLOWED_APPS.iter().copied(),
            DEFAULT_FORBIDDEN_APPS.iter().copied(),
            false,
            DEFAULT_REPEAT_THRESHOLD,
        )
    }
}

/// Which rule produced a violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Whitelist mode: no allow pattern matched
    NotAllowed,
    /// Blacklist mode: a forbidden pattern matched
    Forbidden,
}

/// A process that breaks the current policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Normalized process name as sampled
    pub process_name: String,
    /// Pattern (or rule label) that produced the violation
    pub rule_matched: String,
    pub kind: ViolationKind,
    pub detected_at: SystemTime,
}

/// Throttle decision for one violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Suppress,
    Notify,
    NotifyAndReport,
    NotifyReportAndKill,
}

impl Action {
    pub fn notifies(self) -> bool {
        !matches!(self, Action::Suppress)
    }

    pub fn reports(self) -> bool {
        matches!(self, Action::NotifyAndReport | Action::NotifyReportAndKill)
    }

    pub fn kills(self) -> bool {
        matches!(self, Action::NotifyReportAndKill)
    }
}

/// Alert body POSTed to the remote collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: String,
    pub description: String,
    pub session_id: Option<i64>,
    pub exam_id: Option<i64>,
    pub student_id: Option<i64>,
    pub process: String,
}

/// In-app warning event for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentWarning {
    pub app: String,
    pub message: String,
}

/// Identity and credentials of the running exam session.
///
/// Custom `Debug` implementation redacts the auth token.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ExamContext {
    pub session_id: Option<i64>,
    pub exam_id: Option<i64>,
    pub student_id: Option<i64>,
    pub auth_token: Option<String>,
}

impl std::fmt::Debug for ExamContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamContext")
            .field("session_id", &self.session_id)
            .field("exam_id", &self.exam_id)
            .field("student_id", &self.student_id)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Monitoring statistics exposed by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub running: bool,
    pub ticks: u64,
    pub empty_samples: u64,
    pub violations_detected: u64,
    pub violations_admitted: u64,
    pub violations_suppressed: u64,
    pub kills_requested: u64,
    pub reports_failed: u64,
}

#[cfg(test)]
mod tests;
