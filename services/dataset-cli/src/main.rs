//! Dataset CLI entry point.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use dataset_cache::{build_cache_backend, CacheConfig};
use dataset_cli::cli::Cli;
use dataset_cli::commands;
use dataset_reader::{DatasetOpener, FilesystemProvider, ReaderConfig};

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Cli::parse();

    let mut runtime_builder = tokio::runtime::Builder::new_multi_thread();
    runtime_builder.enable_all();
    if let Some(threads) = args.worker_threads {
        runtime_builder.worker_threads(threads);
    }
    let runtime = runtime_builder
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(run(args))
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .json()
        .with_writer(std::io::stderr)
        .init();

    #[cfg(feature = "netcdf")]
    dataset_reader::silence_hdf5_errors();

    let cache_config = CacheConfig::from_env().map_err(|e| anyhow!(e))?;
    let reader_config = ReaderConfig::from_env();
    reader_config.validate().map_err(|e| anyhow!(e))?;

    // The cache backend is built once here and shared by every open.
    let cache = build_cache_backend(&cache_config)
        .await
        .context("Failed to initialize dataset cache")?;
    let opener = DatasetOpener::new(FilesystemProvider::new(reader_config), Arc::clone(&cache));

    info!(
        backend = cache.name(),
        locator = %args.command.dataset().locator,
        "Running dataset command"
    );

    match commands::run(&args.command, &opener).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, kind = e.kind(), "Dataset command failed");
            eprintln!("{}", serde_json::to_string_pretty(&commands::error_body(&e))?);
            std::process::exit(1);
        }
    }
}
