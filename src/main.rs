//! CLI entry point for the railway departure pipeline.
//!
//! Runs the realtime fetch, aggregation, enrichment and optional export
//! stages on a fixed interval against a shared SQLite store.

use anyhow::Result;
use clap::{Parser, Subcommand};
use railway_pipeline::clock::TokioClock;
use railway_pipeline::config::PipelineConfig;
use railway_pipeline::error::PipelineError;
use railway_pipeline::scheduler::Scheduler;
use railway_pipeline::stage::ProcessRunner;
use std::ffi::OsStr;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "railway_pipeline")]
#[command(about = "Collects realtime train departures and enriches them on a schedule", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run passes forever at a fixed interval until interrupted
    Run {
        /// Export the unified dataset at the end of every pass
        #[arg(long, default_value_t = false)]
        export: bool,

        #[command(flatten)]
        config: PipelineConfig,
    },
    /// Prepare the store and run a single pass
    Once {
        /// Export the unified dataset at the end of the pass
        #[arg(long, default_value_t = false)]
        export: bool,

        #[command(flatten)]
        config: PipelineConfig,
    },
    /// Only prepare the store, bootstrapping stations if needed
    Init {
        #[command(flatten)]
        config: PipelineConfig,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok(); // Load .env file

    let _file_guard = init_tracing();
    let cli = Cli::parse();

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<PipelineError>() {
            Some(PipelineError::Cancelled) => {
                info!("Interrupted before completion");
                ExitCode::SUCCESS
            }
            Some(pipeline_error) => {
                error!(error = %pipeline_error, "Pipeline terminated");
                ExitCode::from(pipeline_error.exit_code())
            }
            None => {
                error!(error = %e, "Pipeline terminated");
                ExitCode::FAILURE
            }
        },
    }
}

/// Logging setup: colored stderr + JSON rolling log file.
fn init_tracing() -> WorkerGuard {
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/railway_pipeline.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("railway_pipeline.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse().unwrap()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse().unwrap()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    file_guard
}

async fn execute(cli: Cli) -> Result<()> {
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let (config, export) = match &cli.command {
        Commands::Run { config, export } | Commands::Once { config, export } => (config, *export),
        Commands::Init { config } => (config, false),
    };
    debug!(config = %serde_json::to_string(config)?, export, "Resolved configuration");

    let mut scheduler = Scheduler::from_config(
        config,
        export,
        Arc::new(ProcessRunner::new()),
        Arc::new(TokioClock),
        cancel,
    )?;

    match cli.command {
        Commands::Run { .. } => {
            let summary = scheduler.run().await?;
            info!(passes_completed = summary.passes_completed, "Pipeline stopped");
        }
        Commands::Once { .. } => {
            let report = scheduler.run_single_pass().await?;
            info!(
                pass = report.pass.number,
                stages = report.stages.len(),
                exported = report.exported(),
                "Single pass complete"
            );
        }
        Commands::Init { .. } => {
            let status = scheduler.initialize().await?;
            info!(?status, db = %config.db_path.display(), "Store initialized");
        }
    }

    Ok(())
}

/// Cancels `token` on Ctrl+C (and SIGTERM on unix). Running stages are
/// left to finish or handle the interrupt themselves.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        wait_for_interrupt().await;
        warn!("Interrupt received, stopping after the current stage");
        token.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_interrupt() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_interrupt() {
    let _ = tokio::signal::ctrl_c().await;
}
