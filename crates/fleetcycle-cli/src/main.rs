//! fleetcycle — replace every host behind an ECS cluster without dropping
//! below the starting capacity.
//!
//! # Usage
//!
//! ```text
//! fleetcycle --cluster prod --capacity-group prod-ecs-asg
//! fleetcycle --config recycle.toml --dry-run --output json
//! ```

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use fleetcycle_core::{ConfigError, RecycleError, ShutdownSignal};

mod commands;

const DEFAULT_FILTER: &str = "info,fleetcycle=debug";

#[derive(Parser)]
#[command(
    name = "fleetcycle",
    about = "Zero-downtime rolling replacement of ECS container instances",
    version
)]
struct Cli {
    #[command(flatten)]
    recycle: commands::recycle::RecycleArgs,

    /// Log line format (logs go to stderr).
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Process exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    let code = if err.downcast_ref::<ConfigError>().is_some() {
        2
    } else if let Some(e) = err.downcast_ref::<RecycleError>() {
        e.exit_code()
    } else {
        1
    };
    u8::try_from(code).unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping at the next safe point");
            let _ = shutdown_tx.send(true);
        }
    });

    match commands::recycle::run(cli.recycle, ShutdownSignal::new(shutdown_rx)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
