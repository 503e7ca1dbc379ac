//! Policy evaluation for sampled processes
//!
//! Applies the lock policy to one inventory pass. Matching is bidirectional
//! substring containment on normalized names so that versioned or localized
//! executable names (`teams2`, `discord-ptb`) still hit their pattern.
//! System processes are filtered out before either mode looks at a sample.

use crate::models::{
    normalize_process_name, LockMode, LockPolicy, SampleSet, Violation, ViolationKind,
};
use std::time::SystemTime;

/// Rule label used for whitelist-mode violations
pub const ALLOW_LIST_RULE: &str = "allow_list";

/// OS-critical process name fragments that are never reported.
///
/// A normalized sample is excluded when it starts with one of these.
pub const SYSTEM_PROCESS_EXCLUSIONS: &[&str] = &[
    // Windows core
    "system",
    "idle",
    "registry",
    "smss",
    "csrss",
    "wininit",
    "winlogon",
    "services",
    "lsass",
    "lsaiso",
    "svchost",
    "dwm",
    "explorer",
    "sihost",
    "conhost",
    "fontdrvhost",
    "taskhostw",
    "runtimebroker",
    "ctfmon",
    "dllhost",
    "spoolsv",
    "audiodg",
    "searchhost",
    "searchindexer",
    "startmenuexperiencehost",
    "shellexperiencehost",
    "textinputhost",
    "wmiprvse",
    "memory compression",
    // Shells
    "cmd",
    "powershell",
    "pwsh",
    "bash",
    "zsh",
    // Unix / macOS core
    "launchd",
    "kernel_task",
    "windowserver",
    "loginwindow",
    "login",
    "systemd",
    "kthreadd",
    "kworker",
    "ksoftirqd",
    "migration/",
    "cpuhp/",
    "rcu_",
    "kswapd",
    "irq/",
    "watchdog/",
    "dbus",
    "xorg",
    "xwayland",
    "gnome-shell",
    "kwin",
    "plasmashell",
    "gdm",
    "sddm",
    "lightdm",
    // Drivers and security suite helpers
    "msmpeng",
    "nissrv",
    "securityhealth",
    "smartscreen",
    "wudfhost",
    "igfx",
    "nvcontainer",
    "nvdisplay",
    "amdrsserv",
    "rtkaud",
    // Virtualization and container hosts
    "vmmem",
    "vmcompute",
    "vmwp",
    "wslhost",
    "wslservice",
    "com.docker",
    "dockerd",
    "containerd",
    "vboxsvc",
    // IDEs and editors
    "code",
    "devenv",
    "idea",
    "pycharm",
    "eclipse",
    "sublime_text",
    "notepad++",
    "nvim",
    "vim",
    "emacs",
    // The agent itself
    "examlock",
];

/// Whether a (raw or normalized) process name is on the exclusion list
pub fn is_system_process(name: &str) -> bool {
    let normalized = normalize_process_name(name);
    !normalized.is_empty()
        && SYSTEM_PROCESS_EXCLUSIONS
            .iter()
            .any(|fragment| normalized.starts_with(fragment))
}

/// Bidirectional substring match on normalized names.
/// Empty names never match anything.
pub fn names_match(sample: &str, pattern: &str) -> bool {
    let sample = normalize_process_name(sample);
    let pattern = normalize_process_name(pattern);
    if sample.is_empty() || pattern.is_empty() {
        return false;
    }
    sample.contains(&pattern) || pattern.contains(&sample)
}

/// Evaluate one inventory pass against the policy.
///
/// An empty sample set yields no violations; the caller is responsible for
/// telling "no data" apart from "nothing forbidden".
pub fn evaluate(samples: &SampleSet, policy: &LockPolicy, mode: LockMode) -> Vec<Violation> {
    if samples.is_empty() {
        return Vec::new();
    }

    let detected_at = SystemTime::now();

    match mode {
        LockMode::Whitelist => samples
            .iter()
            .filter(|sample| !is_system_process(&sample.name))
            .filter(|sample| {
                !policy
                    .allowed_apps
                    .iter()
                    .any(|allowed| names_match(&sample.name, allowed))
            })
            .map(|sample| Violation {
                process_name: sample.name.clone(),
                rule_matched: ALLOW_LIST_RULE.to_string(),
                kind: ViolationKind::NotAllowed,
                detected_at,
            })
            .collect(),
        LockMode::Blacklist => policy
            .forbidden_apps
            .iter()
            .filter_map(|pattern| {
                samples
                    .iter()
                    .filter(|sample| !is_system_process(&sample.name))
                    .find(|sample| names_match(&sample.name, pattern))
                    .map(|sample| Violation {
                        process_name: sample.name.clone(),
                        rule_matched: normalize_process_name(pattern),
                        kind: ViolationKind::Forbidden,
                        detected_at,
                    })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessSample;
    use std::collections::BTreeSet;

    fn samples(names: &[&str]) -> SampleSet {
        ProcessSample::batch(names.iter().copied(), SystemTime::now())
    }

    fn blacklist(forbidden: &[&str]) -> LockPolicy {
        LockPolicy::new(Vec::<String>::new(), forbidden.iter().copied(), false, 2)
    }

    fn whitelist(allowed: &[&str]) -> LockPolicy {
        let mut policy = LockPolicy::new(allowed.iter().copied(), Vec::<String>::new(), false, 2);
        policy.mode = LockMode::Whitelist;
        policy
    }

    fn violating_names(violations: &[Violation]) -> BTreeSet<String> {
        violations.iter().map(|v| v.process_name.clone()).collect()
    }

    // ==================== matching ====================

    #[test]
    fn test_names_match_is_bidirectional() {
        assert!(names_match("teams2", "teams.exe"));
        assert!(names_match("chrome", "chrome.exe"));
        assert!(names_match("discord", "discord-ptb"));
        assert!(!names_match("firefox", "chrome.exe"));
    }

    #[test]
    fn test_names_match_rejects_empty() {
        assert!(!names_match("", "chrome"));
        assert!(!names_match("chrome", ""));
        assert!(!names_match(".exe", "chrome"));
    }

    #[test]
    fn test_system_process_detection() {
        assert!(is_system_process("explorer.exe"));
        assert!(is_system_process("svchost.exe"));
        assert!(is_system_process("systemd-journald"));
        assert!(is_system_process("Code Helper (Renderer)"));
        assert!(!is_system_process("chrome.exe"));
        assert!(!is_system_process("malwareapp.exe"));
        assert!(!is_system_process("discord.exe"));
    }

    #[test]
    fn test_default_forbidden_list_is_not_excluded() {
        for name in crate::constants::DEFAULT_FORBIDDEN_APPS {
            assert!(!is_system_process(name), "{} must stay enforceable", name);
        }
    }

    // ==================== whitelist mode ====================

    #[test]
    fn test_whitelist_reports_only_unlisted_non_system_processes() {
        let policy = whitelist(&["code.exe"]);
        let sample = samples(&["code.exe", "explorer.exe", "malwareapp.exe"]);

        let violations = evaluate(&sample, &policy, LockMode::Whitelist);

        assert_eq!(violating_names(&violations), BTreeSet::from(["malwareapp".to_string()]));
        assert_eq!(violations[0].kind, ViolationKind::NotAllowed);
        assert_eq!(violations[0].rule_matched, ALLOW_LIST_RULE);
    }

    #[test]
    fn test_whitelist_property_over_mixed_names() {
        let policy = whitelist(&["excel.exe", "python"]);
        let names = [
            "excel", "python3", "zoom", "svchost", "slack", "explorer", "telegram",
        ];
        let violations = evaluate(&samples(&names), &policy, LockMode::Whitelist);
        let flagged = violating_names(&violations);

        for name in names {
            let allowed = policy.allowed_apps.iter().any(|a| names_match(name, a));
            let expected = !is_system_process(name) && !allowed;
            assert_eq!(flagged.contains(name), expected, "process {}", name);
        }
    }

    #[test]
    fn test_whitelist_ignores_linux_kernel_threads() {
        let policy = whitelist(&["code.exe"]);
        let sample = samples(&[
            "code",
            "kworker/0:1-events",
            "kworker/u8:2-events_unbound",
            "ksoftirqd/0",
            "migration/0",
            "cpuhp/1",
        ]);

        let violations = evaluate(&sample, &policy, LockMode::Whitelist);
        assert!(violations.is_empty(), "unexpected: {:?}", violating_names(&violations));
    }

    #[test]
    fn test_whitelist_with_empty_allow_list_flags_every_non_system_process() {
        let policy = whitelist(&[]);
        let violations = evaluate(&samples(&["zoom", "explorer"]), &policy, LockMode::Whitelist);
        assert_eq!(violating_names(&violations), BTreeSet::from(["zoom".to_string()]));
    }

    // ==================== blacklist mode ====================

    #[test]
    fn test_blacklist_reports_one_violation_per_matching_pattern() {
        let policy = blacklist(&["chrome.exe", "discord.exe", "opera.exe"]);
        let sample = samples(&["chrome.exe", "discord.exe", "notepad.exe"]);

        let violations = evaluate(&sample, &policy, LockMode::Blacklist);

        assert_eq!(violations.len(), 2);
        assert_eq!(
            violating_names(&violations),
            BTreeSet::from(["chrome".to_string(), "discord".to_string()])
        );
        assert!(violations.iter().all(|v| v.kind == ViolationKind::Forbidden));
    }

    #[test]
    fn test_blacklist_pattern_reports_first_matching_sample_only() {
        let policy = blacklist(&["teams"]);
        let sample = samples(&["ms-teams", "teams"]);

        let violations = evaluate(&sample, &policy, LockMode::Blacklist);

        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].process_name, "ms-teams");
        assert_eq!(violations[0].rule_matched, "teams");
    }

    #[test]
    fn test_blacklist_never_reports_excluded_processes() {
        let policy = blacklist(&["explorer.exe", "code"]);
        let violations = evaluate(&samples(&["explorer.exe", "code"]), &policy, LockMode::Blacklist);
        assert!(violations.is_empty());
    }

    #[test]
    fn test_blacklist_property_over_mixed_names() {
        let policy = blacklist(&["zoom", "whatsapp.exe"]);
        let names = ["zoom", "whatsapp", "explorer", "notes", "zoomus"];
        let violations = evaluate(&samples(&names), &policy, LockMode::Blacklist);

        for v in &violations {
            assert!(!is_system_process(&v.process_name));
            assert!(names_match(&v.process_name, &v.rule_matched));
        }
        let patterns: BTreeSet<&str> = violations.iter().map(|v| v.rule_matched.as_str()).collect();
        assert_eq!(patterns, BTreeSet::from(["whatsapp", "zoom"]));
    }

    #[test]
    fn test_empty_sample_yields_no_violations() {
        let empty = SampleSet::new();
        assert!(evaluate(&empty, &blacklist(&["chrome"]), LockMode::Blacklist).is_empty());
        assert!(evaluate(&empty, &whitelist(&["code"]), LockMode::Whitelist).is_empty());
    }
}
