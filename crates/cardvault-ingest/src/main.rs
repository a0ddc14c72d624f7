//! Cardvault Ingest - catalog split and seed tool

use anyhow::Context;
use cardvault_common::logging::{init_logging, LogConfig};
use cardvault_ingest::checkpoint::CheckpointStore;
use cardvault_ingest::cli::{Cli, Command, SeedArgs, SplitArgs};
use cardvault_ingest::config::IngestConfig;
use cardvault_ingest::error_log::ErrorLog;
use cardvault_ingest::retry::RetryController;
use cardvault_ingest::seed::sink::require_database_url;
use cardvault_ingest::seed::{
    load_index, plan_seed, AssetPipeline, HttpAssetSource, PassthroughCodec, PostgresSink,
    S3AssetStore, SeedOrchestrator,
};
use cardvault_ingest::split::run_split;
use cardvault_ingest::summary;
use clap::Parser;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::for_binary("cardvault-ingest", cli.verbose);

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        },
    };

    if let Err(e) = execute(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        drop(guard);
        process::exit(1);
    }
}

async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let mut config = IngestConfig::load().context("Failed to load configuration")?;
    cli.apply_paths(&mut config);

    match &cli.command {
        Command::Split(args) => split(args, &config).await,
        Command::Seed(args) => seed(args, &config).await,
    }
}

async fn split(args: &SplitArgs, config: &IngestConfig) -> anyhow::Result<()> {
    let options = args.to_options(config);
    info!(
        input = %options.bulk_file.display(),
        output = %options.data_dir.display(),
        languages = ?options.scan.languages,
        dry_run = options.dry_run,
        "Starting split"
    );

    let report = run_split(options).await?;
    println!("{}", summary::render_split(&report));
    Ok(())
}

async fn seed(args: &SeedArgs, config: &IngestConfig) -> anyhow::Result<()> {
    let paths = &config.paths;
    let index_file = paths.index_file();

    if args.list {
        let index = load_index(&index_file)?;
        println!("{}", summary::render_index(&index));
        return Ok(());
    }

    let options = args.to_options(config);
    let checkpoints = CheckpointStore::new(&paths.checkpoint_file);

    if args.filter.dry_run {
        let plan = plan_seed(&index_file, &paths.data_dir, &checkpoints, &options)?;
        println!("{}", summary::render_seed_plan(&plan));
        return Ok(());
    }

    // Fail on a missing index or unknown set before touching the database
    plan_seed(&index_file, &paths.data_dir, &checkpoints, &options)?;

    let database_url = require_database_url(config.database.url.as_deref())?;
    let sink = PostgresSink::connect(database_url, config.database.max_connections)
        .await
        .context("Failed to connect to database")?;

    let retry = RetryController::new(config.retry.policy());

    let assets = if options.skip_images {
        None
    } else {
        Some(AssetPipeline::new(
            Arc::new(HttpAssetSource::new(Duration::from_secs(
                config.seed.http_timeout_secs,
            ))?),
            Arc::new(PassthroughCodec),
            Arc::new(S3AssetStore::new(config.storage.clone())),
            retry,
            config.seed.asset_prefix.clone(),
        ))
    };

    let mut orchestrator = SeedOrchestrator::new(
        Arc::new(sink),
        assets,
        retry,
        checkpoints,
        ErrorLog::new(&paths.error_log),
        index_file,
        &paths.data_dir,
        options,
    );

    let mut report = orchestrator.run().await?;
    println!("{}", summary::render_seed(&report));

    match report.halted.take() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
