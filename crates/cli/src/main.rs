mod config;
mod observer;
mod plans;
mod report;
mod watch;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use events::EventBus;
use orchestrator::{PhaseSequencer, ProgressMode, SequencerConfig};
use supervisor::ProcessSupervisor;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{StackcheckConfig, CONFIG_FILE};
use crate::plans::{Mode, PlanOptions};

/// Exit code for misconfiguration detected before any phase ran.
const EXIT_CONFIG_ERROR: u8 = 2;

const EVENT_LOG_FLUSH: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "stackcheck")]
#[command(
    about = "Run a backend's unit and integration test phases against a live server",
    long_about = None
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Only run tests whose name matches
    #[arg(short, long, global = true)]
    filter: Option<String>,

    /// Test threads passed to the test command
    #[arg(short, long, global = true)]
    parallel: Option<usize>,

    /// Run integration tests with two threads
    #[arg(long, global = true)]
    advanced: bool,

    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the report as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Prerequisites, then unit tests
    Unit,
    /// Prerequisites, server, health check, then integration tests
    Integration,
    /// Unit then integration tests (default)
    All,
    /// Re-run unit tests on change until Ctrl+C
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (config_path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(CONFIG_FILE), false),
    };
    let config = StackcheckConfig::load(&config_path, required).await?;
    let working_dir = config.working_dir(&config_path);
    tracing::debug!(working_dir = %working_dir.display(), "Configuration loaded");

    let options = PlanOptions {
        filter: cli.filter.clone(),
        parallel: cli.parallel,
        advanced: cli.advanced,
    };

    let mode = match cli.command.unwrap_or(Commands::All) {
        Commands::Unit => Mode::Unit,
        Commands::Integration => Mode::Integration,
        Commands::All => Mode::All,
        Commands::Watch => return run_watch(&config, &working_dir, &options).await,
    };

    let events = EventBus::new();
    let event_log = observer::log_events(&events);
    let plan = plans::build(mode, &config, &working_dir, &options, &events)?;

    let cancel = CancellationToken::new();
    let progress = if cli.no_progress || cli.json || !std::io::stderr().is_terminal() {
        ProgressMode::Hidden
    } else {
        ProgressMode::Terminal
    };
    let sequencer = PhaseSequencer::new(SequencerConfig {
        grace_period: config.run.grace_period,
        kill_timeout: config.run.kill_timeout,
        progress,
        tick: config.run.tick,
    })
    .with_events(events)
    .with_cancellation(cancel.clone());

    let interrupt = tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => {
                warn!("Interrupted, stopping the run");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signals"),
        }
    });

    let outcome = sequencer.run(plan.phases).await;
    interrupt.abort();

    if let Some(server) = &plan.server {
        if let Some(Err(e)) = server.shutdown().await {
            warn!(error = %e, "Failed to stop spawned server");
        }
    }
    drop(sequencer);
    drop(plan.server);
    if let Ok(Ok(count)) = tokio::time::timeout(EVENT_LOG_FLUSH, event_log).await {
        tracing::debug!(count, "Event log closed");
    }

    let report = outcome.context("Run configuration rejected")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report::render_failures(&report));
        print!("{}", report::render(&report));
    }

    Ok(ExitCode::from(report.exit_code() as u8))
}

async fn run_watch(
    config: &StackcheckConfig,
    working_dir: &std::path::Path,
    options: &PlanOptions,
) -> Result<ExitCode> {
    let spec = config.watch.command(working_dir, options.unit_threads());
    let supervisor = ProcessSupervisor::new().with_kill_timeout(config.run.kill_timeout);

    println!("Watching for changes (unit tests only). Press Ctrl+C to stop.");
    let outcome =
        watch::run(&spec, &supervisor, config.run.grace_period, shutdown_signal()).await?;
    info!(outcome = ?outcome, "Watcher finished");

    Ok(if outcome.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Completes on Ctrl+C, or on SIGTERM/SIGQUIT on unix.
#[cfg(unix)]
async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate =
        signal(SignalKind::terminate()).context("failed to create terminate signal stream")?;
    let mut quit = signal(SignalKind::quit()).context("failed to create quit signal stream")?;
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to create interrupt signal stream")?;

    tokio::select! {
        _ = terminate.recv() => {}
        _ = quit.recv() => {}
        _ = interrupt.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await.context("CTRL_C signal failed")
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "stackcheck=info,orchestrator=info,probe=info,supervisor=info".into()
            }),
        )
        .init();
}
