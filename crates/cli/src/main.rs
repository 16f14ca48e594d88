use crate::{
    commands::Commands,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use engine_runtime::WarehouseFetcher;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "warehouse-fetch",
    version = "0.1.0",
    about = "Fetch complete query results from the team warehouses"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    // Logs go to stderr so stdout carries only data
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let code = match run(cli.command, &shutdown).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "Command failed");
            if shutdown.is_shutdown_requested() {
                ExitCode::ShutdownRequested
            } else {
                ExitCode::GeneralError
            }
        }
    };

    std::process::exit(code.as_i32());
}

async fn run(command: Commands, shutdown: &ShutdownCoordinator) -> Result<ExitCode, CliError> {
    match command {
        Commands::Fetch {
            connection,
            query,
            tuning,
            format,
            output,
            timestamp,
            allow_partial,
        } => {
            let spec = query.to_spec().await?;
            let options = tuning.to_options(shutdown.cancel_token())?;
            let (provider, service) = connection.connect()?;

            let outcome = WarehouseFetcher::new(provider, service)
                .fetch(spec, options)
                .await?;

            match &output {
                Some(path) => {
                    let path = if timestamp {
                        output::timestamped_path(path, outcome.started_at)
                    } else {
                        path.clone()
                    };
                    output::write_outcome(&outcome, format, &path).await?;
                    info!(path = %path.display(), rows = outcome.total_rows, "Wrote result");
                }
                None => output::print_outcome(&outcome, format)?,
            }

            if outcome.cancelled && shutdown.is_shutdown_requested() {
                return Ok(ExitCode::ShutdownRequested);
            }

            if outcome.is_partial() {
                warn!(
                    failed_pages = ?outcome.failed_pages,
                    abandoned_pages = ?outcome.abandoned_pages,
                    cancelled = outcome.cancelled,
                    timed_out = outcome.timed_out,
                    truncated = outcome.truncated,
                    "Result is partial"
                );
                if !allow_partial {
                    return Ok(ExitCode::PartialResult);
                }
            }

            Ok(ExitCode::Success)
        }
        Commands::Estimate {
            connection,
            query,
            tuning,
        } => {
            let spec = query.to_spec().await?;
            let options = tuning.to_options(shutdown.cancel_token())?;
            let (provider, service) = connection.connect()?;

            let preview = WarehouseFetcher::new(provider, service)
                .preview(&spec, &options)
                .await?;
            output::print_json(&preview)?;

            Ok(ExitCode::Success)
        }
    }
}
