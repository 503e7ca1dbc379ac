//! Process inventory
//!
//! Samples the names of running processes. Two backends exist:
//! - `SysinfoInventory` reads the process table through `sysinfo`
//! - `CommandInventory` parses the OS listing tool (`tasklist` / `ps`)
//!
//! A failed pass is never an error for the caller: it yields an empty set
//! and a warning, since "no data" is valid input to the rest of the tick.

use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::{Duration, SystemTime};
use sysinfo::{ProcessesToUpdate, System};

use crate::models::{ProcessSample, SampleSet};

/// Inventory backend selector (configuration value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InventoryKind {
    #[default]
    Sysinfo,
    Command,
}

/// Errors raised inside a backend; logged and turned into an empty sample
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    ExitStatus { command: String, status: String },
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
    #[error("process listing produced no parsable names")]
    Empty,
    #[error("process listing task failed: {0}")]
    Task(String),
}

/// Source of running process names
#[async_trait]
pub trait ProcessInventory: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Sample running processes. Never fails; errors yield an empty set.
    async fn sample(&self) -> SampleSet;
}

/// Build the configured inventory backend
pub fn inventory_for(kind: InventoryKind, timeout: Duration) -> Box<dyn ProcessInventory> {
    match kind {
        InventoryKind::Sysinfo => Box::new(SysinfoInventory::new()),
        InventoryKind::Command => Box::new(CommandInventory::for_current_os(timeout)),
    }
}

fn empty_on_error(backend: &str, result: Result<Vec<String>, InventoryError>) -> SampleSet {
    match result {
        Ok(names) => {
            let samples = ProcessSample::batch(names, SystemTime::now());
            debug!("{} inventory sampled {} distinct processes", backend, samples.len());
            samples
        }
        Err(e) => {
            warn!("{} inventory failed, using empty sample: {}", backend, e);
            SampleSet::new()
        }
    }
}

/// Inventory backed by the `sysinfo` process table
#[derive(Debug, Default)]
pub struct SysinfoInventory;

impl SysinfoInventory {
    pub fn new() -> Self {
        Self
    }

    fn list_names() -> Result<Vec<String>, InventoryError> {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        // Linux threads and kernel threads show up as entries of their own
        let names: Vec<String> = system
            .processes()
            .values()
            .filter(|process| process.thread_kind().is_none())
            .map(|process| process.name().to_string_lossy().to_string())
            .collect();

        if names.is_empty() {
            return Err(InventoryError::Empty);
        }
        Ok(names)
    }
}

#[async_trait]
impl ProcessInventory for SysinfoInventory {
    fn backend(&self) -> &'static str {
        "sysinfo"
    }

    async fn sample(&self) -> SampleSet {
        let result = tokio::task::spawn_blocking(Self::list_names)
            .await
            .map_err(|e| InventoryError::Task(e.to_string()))
            .and_then(|inner| inner);
        empty_on_error(self.backend(), result)
    }
}

/// Output format of the listing command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    /// `tasklist /FO CSV /NH`
    TasklistCsv,
    /// `ps -A -o comm`
    PsComm,
}

/// Inventory backed by the platform's process listing command
#[derive(Debug, Clone)]
pub struct CommandInventory {
    program: String,
    args: Vec<String>,
    format: ListingFormat,
    timeout: Duration,
}

impl CommandInventory {
    pub fn new(program: &str, args: &[&str], format: ListingFormat, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            format,
            timeout,
        }
    }

    /// `tasklist` on Windows, `ps` everywhere else
    pub fn for_current_os(timeout: Duration) -> Self {
        if cfg!(windows) {
            Self::new("tasklist", &["/FO", "CSV", "/NH"], ListingFormat::TasklistCsv, timeout)
        } else {
            Self::new("ps", &["-A", "-o", "comm"], ListingFormat::PsComm, timeout)
        }
    }

    fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn list_names(&self) -> Result<Vec<String>, InventoryError> {
        let command = self.command_line();
        let output = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new(&self.program)
                .args(&self.args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| InventoryError::Timeout {
            command: command.clone(),
            timeout: self.timeout,
        })?
        .map_err(|source| InventoryError::Spawn {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(InventoryError::ExitStatus {
                command,
                status: output.status.to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let names = match self.format {
            ListingFormat::TasklistCsv => parse_tasklist_csv(&stdout),
            ListingFormat::PsComm => parse_ps_comm(&stdout),
        };
        if names.is_empty() {
            return Err(InventoryError::Empty);
        }
        Ok(names)
    }
}

#[async_trait]
impl ProcessInventory for CommandInventory {
    fn backend(&self) -> &'static str {
        "command"
    }

    async fn sample(&self) -> SampleSet {
        let result = self.list_names().await;
        empty_on_error(self.backend(), result)
    }
}

fn tasklist_name_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r#"^"([^"]+)""#).ok())
        .as_ref()
}

/// Parse `tasklist /FO CSV /NH` output; the image name is the first quoted column.
///
/// Lines look like `"chrome.exe","1234","Console","1","120,000 K"`.
pub fn parse_tasklist_csv(output: &str) -> Vec<String> {
    let Some(pattern) = tasklist_name_pattern() else {
        return Vec::new();
    };
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| pattern.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Parse `ps -A -o comm` output: one command per line after a header.
/// Directory prefixes (macOS prints full paths) are left for normalization.
pub fn parse_ps_comm(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.eq_ignore_ascii_case("comm") && !line.eq_ignore_ascii_case("command"))
        .map(|line| line.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tasklist_csv() {
        let output = "\"System Idle Process\",\"0\",\"Services\",\"0\",\"8 K\"\r\n\
                      \"chrome.exe\",\"1234\",\"Console\",\"1\",\"120,000 K\"\r\n\
                      \r\n\
                      garbage line\r\n\
                      \"Discord.exe\",\"4321\",\"Console\",\"1\",\"80,000 K\"\r\n";

        let names = parse_tasklist_csv(output);
        assert_eq!(names, vec!["System Idle Process", "chrome.exe", "Discord.exe"]);
    }

    #[test]
    fn test_parse_ps_comm_skips_header_and_blank_lines() {
        let output = "COMM\n/sbin/launchd\n\n/Applications/Discord.app/Contents/MacOS/Discord\nbash\n";
        let names = parse_ps_comm(output);
        assert_eq!(
            names,
            vec!["/sbin/launchd", "/Applications/Discord.app/Contents/MacOS/Discord", "bash"]
        );
    }

    #[test]
    fn test_parsed_names_normalize_into_samples() {
        let names = parse_ps_comm("COMMAND\n/usr/bin/Zoom\nzoom\nteams.exe\n");
        let samples = ProcessSample::batch(names, SystemTime::now());
        let normalized: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(normalized, vec!["teams", "zoom"]);
    }

    #[tokio::test]
    async fn test_missing_command_yields_empty_sample() {
        let inventory = CommandInventory::new(
            "examlock-definitely-missing-binary",
            &[],
            ListingFormat::PsComm,
            Duration::from_secs(2),
        );
        assert!(inventory.sample().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_yields_empty_sample() {
        let inventory = CommandInventory::new("false", &[], ListingFormat::PsComm, Duration::from_secs(2));
        assert!(inventory.sample().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_slow_command_times_out_to_empty_sample() {
        let inventory = CommandInventory::new("sleep", &["5"], ListingFormat::PsComm, Duration::from_millis(100));
        assert!(inventory.sample().await.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_sysinfo_inventory_skips_threads() {
        let (release, parked) = std::sync::mpsc::channel::<()>();
        let worker = std::thread::Builder::new()
            .name("zzsampledthread".to_string())
            .spawn(move || {
                let _ = parked.recv();
            })
            .unwrap();

        let samples = SysinfoInventory::new().sample().await;
        drop(release);
        worker.join().unwrap();

        assert!(!samples.is_empty());
        assert!(samples.iter().all(|s| s.name != "zzsampledthread"));
        assert!(samples.iter().all(|s| !s.name.starts_with("tokio-runtime")));
    }

    #[tokio::test]
    async fn test_sysinfo_inventory_sees_processes() {
        let samples = SysinfoInventory::new().sample().await;
        assert!(!samples.is_empty(), "the test process itself should be listed");
        assert!(samples.iter().all(|s| !s.name.is_empty()));
        assert!(samples.iter().all(|s| s.name == s.name.to_lowercase()));
    }
}
