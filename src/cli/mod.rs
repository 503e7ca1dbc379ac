//! CLI argument parsing and validation module
//!
//! Handles the command-line interface using clap:
//! - `run`: start the enforcement loop and print student warnings
//! - `check`: one dry-run pass against the configured default policy
//! - `config`: print the effective configuration

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

/// Options for `examlock run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub session_file: Option<PathBuf>,
    pub json_output: bool,
    pub quiet_mode: bool,
}

/// Options for `examlock check`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOptions {
    pub config_path: Option<PathBuf>,
    pub json_output: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    Run(RunOptions),
    Check(CheckOptions),
    ShowConfig { config_path: Option<PathBuf> },
}

fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .value_parser(clap::value_parser!(PathBuf))
        .help("Configuration file (default: <config dir>/examlock/agent.toml)")
}

fn json_arg() -> Arg {
    Arg::new("json")
        .short('j')
        .long("json")
        .help("Output in JSON format")
        .action(ArgAction::SetTrue)
}

fn build_command() -> Command {
    Command::new("examlock")
        .version(concat!(env!("EXAMLOCK_BUILD_VERSION"), " (", env!("EXAMLOCK_GIT_HASH"), ")"))
        .about("Exam lockdown agent")
        .long_about(
            "Watches the applications running during a proctored exam, warns the student about \
             forbidden ones, reports violations to the exam backend and can terminate repeat offenders.",
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run")
                .about("Start enforcing the lock policy until interrupted")
                .arg(config_arg())
                .arg(
                    Arg::new("session-file")
                        .short('s')
                        .long("session-file")
                        .value_name("FILE")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("JSON file with session_id, exam_id, student_id and auth_token"),
                )
                .arg(json_arg())
                .arg(
                    Arg::new("quiet")
                        .short('q')
                        .long("quiet")
                        .help("Only log warnings and errors")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("check")
                .about("Sample running processes once and list policy violations")
                .arg(config_arg())
                .arg(json_arg()),
        )
        .subcommand(
            Command::new("config")
                .about("Print the effective configuration as TOML")
                .arg(config_arg()),
        )
}

/// Parse command line arguments
pub fn parse_args() -> Result<CliCommand> {
    from_matches(&build_command().get_matches())
}

fn from_matches(matches: &ArgMatches) -> Result<CliCommand> {
    let config_of = |sub: &ArgMatches| sub.get_one::<PathBuf>("config").cloned();

    match matches.subcommand() {
        Some(("run", sub)) => {
            let session_file = sub.get_one::<PathBuf>("session-file").cloned();
            if let Some(ref path) = session_file {
                if path.as_os_str().is_empty() {
                    return Err(anyhow!("--session-file must not be empty"));
                }
            }
            Ok(CliCommand::Run(RunOptions {
                config_path: config_of(sub),
                session_file,
                json_output: sub.get_flag("json"),
                quiet_mode: sub.get_flag("quiet"),
            }))
        }
        Some(("check", sub)) => Ok(CliCommand::Check(CheckOptions {
            config_path: config_of(sub),
            json_output: sub.get_flag("json"),
        })),
        Some(("config", sub)) => Ok(CliCommand::ShowConfig {
            config_path: config_of(sub),
        }),
        _ => Err(anyhow!("a subcommand is required")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliCommand> {
        let matches = build_command().try_get_matches_from(args)?;
        from_matches(&matches)
    }

    #[test]
    fn test_run_flags() {
        let cmd = parse(&["examlock", "run", "--config", "a.toml", "-s", "session.json", "--json"]).unwrap();
        assert_eq!(
            cmd,
            CliCommand::Run(RunOptions {
                config_path: Some(PathBuf::from("a.toml")),
                session_file: Some(PathBuf::from("session.json")),
                json_output: true,
                quiet_mode: false,
            })
        );
    }

    #[test]
    fn test_check_and_config() {
        assert_eq!(
            parse(&["examlock", "check", "-j"]).unwrap(),
            CliCommand::Check(CheckOptions {
                config_path: None,
                json_output: true
            })
        );
        assert_eq!(
            parse(&["examlock", "config"]).unwrap(),
            CliCommand::ShowConfig { config_path: None }
        );
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(parse(&["examlock"]).is_err());
        assert!(parse(&["examlock", "scan"]).is_err());
    }

    #[test]
    fn test_command_definition_is_consistent() {
        build_command().debug_assert();
    }
}
