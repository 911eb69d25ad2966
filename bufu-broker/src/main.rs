use anyhow::{Context, Result};
use bufu_broker_core::{FileBroker, VERSION};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod server;

use cli::Cli;
use server::Shutdown;

fn main() -> Result<()> {
    // Parse CLI arguments first to get verbosity level
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter())),
        )
        .init();

    info!("BUFU File Broker v{}", VERSION);

    let config = cli.resolve_config()?;
    info!(
        "Serving {} files from {} using '{}' as index file prefix",
        config.file_mode,
        config.base_directory.display(),
        config.index_file_prefix
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.threads)
        .enable_all()
        .build()
        .context("Failed to build the request runtime")?;

    let broker = Arc::new(FileBroker::new(&config));
    let outcome = runtime.block_on(server::run(Arc::clone(&broker), &config.server));

    // Observers are plain threads, join them after the server is gone
    broker.shutdown();
    info!("main finished");

    match outcome? {
        Shutdown::Interrupted => Ok(()),
        Shutdown::Fatal(message) => {
            error!("Exiting after fatal error");
            anyhow::bail!(message)
        }
    }
}
