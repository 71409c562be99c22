mod telemetry;

use anyhow::{Context, Result};
use castconf::{CastConfig, ConfigSources};
use castwarden::{forward_host_signals, wait_start_delay, HostSignals, Session, SessionConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

/// castwarden - capture pipeline supervisor
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file to load instead of ./castwarden.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pipeline executable (defaults to ffmpeg or cvlc by mode)
    #[arg(long, global = true)]
    tool: Option<PathBuf>,

    /// Maximum session duration in seconds
    #[arg(long, global = true)]
    max_duration: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one pipeline session (default)
    Run,

    /// Print the pipeline command line without running it
    Args,

    /// Print the effective configuration and where it came from
    Config,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let (mut raw, sources) = CastConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if let Some(tool) = &cli.tool {
        raw.pipeline.tool = Some(tool.display().to_string());
    }
    if let Some(secs) = cli.max_duration {
        raw.limits.max_duration_secs = secs;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(raw, sources).await,
        Commands::Args => {
            let config = SessionConfig::try_from(&raw).context("Invalid session configuration")?;
            println!("{}", castwarden::build(&config));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config => {
            show_config(&raw, &sources)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(raw: CastConfig, sources: ConfigSources) -> Result<ExitCode> {
    telemetry::init(&raw.telemetry.log_level)?;

    for path in &sources.files {
        tracing::debug!("Loaded config file {}", path.display());
    }
    for var in &sources.rejected_env {
        tracing::warn!("Ignoring unparsable environment variable {}", var);
    }

    let config = SessionConfig::try_from(&raw).context("Invalid session configuration")?;
    let mut signals = HostSignals::install().context("Failed to install signal handlers")?;

    tracing::info!("🎥 castwarden starting");
    tracing::info!("   Mode: {} ({})", config.mode(), config.tool().display());
    tracing::info!(
        "   Capture: {} @ {}x{} {}fps",
        config.capture().display,
        config.video().width,
        config.video().height,
        config.video().framerate
    );
    tracing::info!("   Max duration: {}s", config.lifecycle().max_duration_secs);

    let delay = raw.pipeline.start_delay_secs;
    if delay > 0 {
        tracing::info!("Waiting {}s before starting the pipeline", delay);
    }
    if let Some(kind) = wait_start_delay(Duration::from_secs(delay), &mut signals).await {
        tracing::info!("Received {} before the pipeline started, exiting", kind);
        return Ok(ExitCode::SUCCESS);
    }

    let session = Session::launch(config);
    let forwarder = forward_host_signals(signals, session.stop_handle());

    let outcome = session.wait().await;
    forwarder.abort();

    println!(
        "{}",
        outcome
            .to_json_line()
            .context("Failed to serialize session outcome")?
    );
    tracing::info!("Shutdown complete: {}", outcome.reason);

    Ok(ExitCode::from(outcome.exit_code()))
}

fn show_config(raw: &CastConfig, sources: &ConfigSources) -> Result<()> {
    if sources.files.is_empty() {
        println!("# No config files found, using defaults");
    }
    for path in &sources.files {
        println!("# Loaded: {}", path.display());
    }
    for var in &sources.env_overrides {
        println!("# Env override: {}", var);
    }
    for var in &sources.rejected_env {
        println!("# Env ignored (unparsable): {}", var);
    }
    print!("{}", raw.to_toml().context("Failed to render configuration")?);
    Ok(())
}
