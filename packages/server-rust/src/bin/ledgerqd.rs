use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use ledgerq_core::OperationCatalog;
use ledgerq_server::queue::LinesQueue;
use ledgerq_server::{App, ServerConfig};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Consumes newline-delimited JSON envelopes from stdin and saves them
/// through the configured storages and ledger.
#[derive(Parser, Debug)]
#[command(name = "ledgerqd", version)]
struct Args {
    /// Server config (storages, ledger, handler limits, health endpoint).
    #[arg(long, env = "LEDGERQ_CONFIG")]
    config: PathBuf,

    /// Operation definitions.
    #[arg(long, env = "LEDGERQ_OPERATIONS")]
    operations: PathBuf,

    #[arg(long, env = "LEDGERQ_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sqlx=warn,tower_http=warn".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(args: Args) -> anyhow::Result<bool> {
    let config = ServerConfig::load(&args.config)?;
    let catalog = OperationCatalog::load(&args.operations)?;
    info!(operations = catalog.len(), storages = config.storages.len(), "configuration loaded");

    let app = App::start(&config, &catalog, Arc::new(LinesQueue::stdin())).await?;

    let controller = app.controller();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                controller.trigger_shutdown();
            }
            Err(e) => error!(error = %e, "cannot listen for interrupts"),
        }
    });

    let report = app.wait().await;
    Ok(report.is_clean())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.log_format);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!(error = %format!("{e:#}"), "ledgerqd failed");
            ExitCode::FAILURE
        }
    }
}
