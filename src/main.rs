#![forbid(unsafe_code)]

mod cli;

use anyhow::{Context, Result};
use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast::error::RecvError;

use examlock::context::{ContextProvider, SessionFileContext, StaticContext};
use examlock::daemon::config::AgentConfiguration;
use examlock::daemon::logging::{install_backend, AgentLogger, LogLevel};
use examlock::daemon::Scheduler;
use examlock::models::LockMode;
use examlock::monitor::{evaluate, inventory_for};
use examlock::output;

use cli::{CheckOptions, CliCommand, RunOptions};

/// How often the warning loop checks the interrupt flags
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    match cli::parse_args()? {
        CliCommand::Run(options) => run(options).await,
        CliCommand::Check(options) => check(options).await,
        CliCommand::ShowConfig { config_path } => {
            let config = AgentConfiguration::load_or_default(config_path.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(options: RunOptions) -> Result<()> {
    let config = AgentConfiguration::load_or_default(options.config_path.as_deref())
        .context("Failed to load configuration")?;
    install_backend(false);
    let level = if options.quiet_mode { LogLevel::Warn } else { LogLevel::Info };

    let session_file = options.session_file.or_else(|| config.context.session_file.clone());
    let context: Arc<dyn ContextProvider> = match session_file {
        Some(path) => Arc::new(SessionFileContext::new(path)),
        None => Arc::new(StaticContext::empty()),
    };

    let mut scheduler = Scheduler::from_config(&config, context, AgentLogger::new(level))
        .context("Failed to initialize the enforcement loop")?;

    // Set up interrupt handling
    let interrupted = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&interrupted))
        .context("Failed to register SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&interrupted))
        .context("Failed to register SIGTERM handler")?;

    let mut warnings = scheduler.subscribe_warnings();
    scheduler.start().await;
    if !options.quiet_mode {
        eprintln!(
            "examlock: enforcing every {}s, press Ctrl+C to stop",
            config.agent.tick_interval
        );
    }

    while !interrupted.load(Ordering::Relaxed) {
        match tokio::time::timeout(INTERRUPT_POLL, warnings.recv()).await {
            Ok(Ok(warning)) => {
                let event = output::create_warning_event(&warning, SystemTime::now())?;
                if options.json_output {
                    println!("{}", output::format_warning_json(&event)?);
                } else {
                    println!("{}", output::format_warning_human(&event));
                }
            }
            Ok(Err(RecvError::Lagged(skipped))) => warn!("dropped {} warnings", skipped),
            Ok(Err(RecvError::Closed)) => break,
            Err(_) => {}
        }
    }

    scheduler.stop().await;
    if !options.quiet_mode {
        eprintln!("{}", output::format_stats_human(&scheduler.stats()));
    }
    Ok(())
}

async fn check(options: CheckOptions) -> Result<()> {
    let config = AgentConfiguration::load_or_default(options.config_path.as_deref())
        .context("Failed to load configuration")?;

    let inventory = inventory_for(config.agent.inventory, config.phase_timeout());
    let samples = inventory.sample().await;
    let violations = evaluate(&samples, &config.default_policy(), LockMode::Blacklist);

    let report = output::CheckReport::new(LockMode::Blacklist, samples.len(), &violations, SystemTime::now())?;
    if options.json_output {
        println!("{}", output::format_check_json(&report)?);
    } else {
        println!("{}", output::format_check_human(&report));
    }
    Ok(())
}
