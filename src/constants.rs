//! Global constants for examlock
//!
//! Centralized location for application-wide constants

/// Subsystem identifier for macOS Unified Logging and structured events
pub const APP_SUBSYSTEM: &str = "com.examlock.agent";

/// Category attached to enforcement events
pub const AGENT_CATEGORY: &str = "enforcement";

/// Environment variable holding the log filter on non-macOS platforms
pub const LOG_FILTER_ENV: &str = "EXAMLOCK_LOG";

/// Directory (under the platform config dir) holding the agent configuration
pub const CONFIG_DIR_NAME: &str = "examlock";

/// Agent configuration file name
pub const CONFIG_FILE_NAME: &str = "agent.toml";

// Scheduler timing. Bounds must match AgentConfiguration::validate.
pub const DEFAULT_TICK_INTERVAL_SECS: f64 = 4.0;
pub const TICK_INTERVAL_MIN: f64 = 0.5;
pub const TICK_INTERVAL_MAX: f64 = 300.0;
pub const DEFAULT_PHASE_TIMEOUT_SECS: f64 = 3.0;

// Violation throttling
pub const DEFAULT_DEDUP_INTERVAL_SECS: f64 = 30.0;
pub const DEFAULT_MAX_ALERTS_PER_WINDOW: u32 = 10;
pub const DEFAULT_ALERT_WINDOW_SECS: f64 = 60.0;

// Remote services
pub const DEFAULT_API_BASE: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: f64 = 5.0;
pub const LOCK_CONFIG_PATH: &str = "config/lock";
pub const EXAMS_PATH: &str = "exams";
pub const ALERTS_PATH: &str = "alerts";

// Alert record fields
pub const ALERT_TYPE_FORBIDDEN_APP: &str = "forbidden_app";
pub const ALERT_SEVERITY_HIGH: &str = "high";

/// Admitted violations kept in memory before trimming
pub const VIOLATION_HISTORY_CAP: usize = 1000;

/// Number of newest violations kept when the history is trimmed
pub const VIOLATION_HISTORY_TRIM: usize = 500;

/// Event type for warnings printed by `examlock run`
pub const EVENT_STUDENT_WARNING: &str = "student_warning";

/// Built-in last-known-good policy used before the first successful fetch
pub const DEFAULT_ALLOWED_APPS: &[&str] = &["code.exe", "excel.exe", "python.exe"];
pub const DEFAULT_FORBIDDEN_APPS: &[&str] = &[
    "discord.exe",
    "whatsapp.exe",
    "teams.exe",
    "chrome.exe",
    "cursor.exe",
    "msedge.exe",
    "firefox.exe",
    "opera.exe",
];
pub const DEFAULT_REPEAT_THRESHOLD: u32 = 2;
