//! Process termination

use async_trait::async_trait;
use log::debug;
use std::collections::HashSet;
use sysinfo::{Pid, ProcessesToUpdate, System};

use super::EnforcementError;
use crate::models::normalize_process_name;

/// Terminates every process whose normalized name equals the target
#[async_trait]
pub trait ProcessKiller: Send + Sync {
    /// Returns how many processes were terminated
    async fn kill_by_name(&self, process_name: &str) -> Result<usize, EnforcementError>;
}

/// Kills processes found in the `sysinfo` process table
#[derive(Debug, Default)]
pub struct SystemKiller;

impl SystemKiller {
    pub fn new() -> Self {
        Self
    }

    fn kill_matching(target: &str) -> Result<usize, EnforcementError> {
        let own_pid = sysinfo::get_current_pid().ok();
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);

        // A signal sent to a thread id takes down its whole thread group
        let own_tasks: HashSet<Pid> = own_pid
            .and_then(|pid| system.process(pid))
            .and_then(|process| process.tasks())
            .cloned()
            .unwrap_or_default();

        let mut terminated = 0;
        let mut first_failure = None;
        for (pid, process) in system.processes() {
            if Some(*pid) == own_pid || own_tasks.contains(pid) || process.thread_kind().is_some() {
                continue;
            }
            let name = normalize_process_name(&process.name().to_string_lossy());
            if name != target {
                continue;
            }
            match terminate(*pid) {
                Ok(()) => {
                    debug!("sent kill to {} (pid {})", name, pid);
                    terminated += 1;
                }
                Err(reason) => {
                    if first_failure.is_none() {
                        first_failure = Some(EnforcementError::Kill {
                            pid: pid.as_u32(),
                            name: name.clone(),
                            reason,
                        });
                    }
                }
            }
        }

        match (terminated, first_failure) {
            (0, Some(err)) => Err(err),
            (0, None) => Err(EnforcementError::NotRunning(target.to_string())),
            (n, _) => Ok(n),
        }
    }
}

#[cfg(unix)]
fn terminate(pid: Pid) -> Result<(), String> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as UnixPid;

    let raw = i32::try_from(pid.as_u32()).map_err(|_| format!("pid {} out of range", pid))?;
    kill(UnixPid::from_raw(raw), Signal::SIGKILL).map_err(|errno| errno.to_string())
}

#[cfg(not(unix))]
fn terminate(pid: Pid) -> Result<(), String> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) if process.kill() => Ok(()),
        Some(_) => Err("termination refused".to_string()),
        None => Err("process exited".to_string()),
    }
}

#[async_trait]
impl ProcessKiller for SystemKiller {
    async fn kill_by_name(&self, process_name: &str) -> Result<usize, EnforcementError> {
        let target = normalize_process_name(process_name);
        if target.is_empty() {
            return Err(EnforcementError::NotRunning(process_name.to_string()));
        }
        tokio::task::spawn_blocking(move || Self::kill_matching(&target))
            .await
            .map_err(|e| EnforcementError::Task(e.to_string()))?
    }
}
