//! Unit tests for data models
//!
//! Covers name normalization and the small invariants carried by the
//! policy and action types.

use super::*;
use std::time::{Duration, UNIX_EPOCH};

#[test]
fn test_normalize_lowercases_and_strips_exe() {
    assert_eq!(normalize_process_name("Chrome.EXE"), "chrome");
    assert_eq!(normalize_process_name("discord.exe"), "discord");
    assert_eq!(normalize_process_name("python"), "python");
}

#[test]
fn test_normalize_strips_directories() {
    assert_eq!(
        normalize_process_name("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
        "google chrome"
    );
    assert_eq!(normalize_process_name(r"C:\Windows\explorer.exe"), "explorer");
    assert_eq!(normalize_process_name("/Applications/Slack.app"), "slack");
}

#[test]
fn test_normalize_keeps_kernel_thread_names() {
    assert_eq!(normalize_process_name("kworker/0:1-events"), "kworker/0:1-events");
    assert_eq!(normalize_process_name("ksoftirqd/0"), "ksoftirqd/0");
    assert_eq!(normalize_process_name("migration/3"), "migration/3");
    assert_eq!(normalize_process_name("./bin/Zoom"), "zoom");
}

#[test]
fn test_normalize_trims_quotes_and_whitespace() {
    assert_eq!(normalize_process_name("  \"Teams.exe\"  "), "teams");
    assert_eq!(normalize_process_name("   "), "");
}

#[test]
fn test_normalize_strips_only_one_suffix() {
    assert_eq!(normalize_process_name("setup.exe.exe"), "setup.exe");
}

#[test]
fn test_batch_dedupes_and_drops_empty() {
    let at = UNIX_EPOCH + Duration::from_secs(10);
    let set = ProcessSample::batch(["Chrome.exe", "chrome", "", "code.exe"], at);

    let names: Vec<&str> = set.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["chrome", "code"]);
    assert!(set.iter().all(|s| s.sampled_at == at));
}

#[test]
fn test_default_policy_is_blacklist_with_builtin_lists() {
    let policy = LockPolicy::default();
    assert_eq!(policy.mode, LockMode::Blacklist);
    assert!(policy.forbidden_apps.contains("chrome.exe"));
    assert!(policy.allowed_apps.contains("code.exe"));
    assert!(!policy.auto_kill);
    assert_eq!(policy.repeat_threshold, 2);
}

#[test]
fn test_repeat_threshold_floor_is_one() {
    let policy = LockPolicy::new(Vec::<String>::new(), ["x"], true, 0);
    assert_eq!(policy.repeat_threshold, 1);
    assert_eq!(policy.effective_threshold(), 1);
}

#[test]
fn test_action_capabilities() {
    assert!(!Action::Suppress.notifies());
    assert!(Action::Notify.notifies() && !Action::Notify.reports());
    assert!(Action::NotifyAndReport.reports() && !Action::NotifyAndReport.kills());
    assert!(Action::NotifyReportAndKill.kills());
}

#[test]
fn test_alert_record_serializes_type_and_null_ids() {
    let alert = AlertRecord {
        alert_type: "forbidden_app".to_string(),
        severity: "high".to_string(),
        description: "Forbidden application detected: chrome".to_string(),
        session_id: Some(7),
        exam_id: None,
        student_id: None,
        process: "chrome".to_string(),
    };

    let json = serde_json::to_value(&alert).unwrap();
    assert_eq!(json["type"], "forbidden_app");
    assert_eq!(json["session_id"], 7);
    assert!(json["exam_id"].is_null());
    assert!(json.get("alert_type").is_none());
}

#[test]
fn test_exam_context_debug_redacts_token() {
    let ctx = ExamContext {
        session_id: Some(1),
        exam_id: Some(2),
        student_id: Some(3),
        auth_token: Some("secret-token".to_string()),
    };
    let debug = format!("{:?}", ctx);
    assert!(!debug.contains("secret-token"));
    assert!(debug.contains("[REDACTED]"));
}
