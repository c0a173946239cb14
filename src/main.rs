//! clipdex CLI entry point.

use anyhow::Result;
use clap::Parser;
use clipdex::cli::{commands, Cli, Commands};
use clipdex::config::Settings;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.as_ref().map(PathBuf::from);
    let settings = Settings::load_from(config_path.as_ref())?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_directive(&settings.general.log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Ensure data directories exist
    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;

    // Execute command
    match cli.command {
        Commands::Add {
            external_id,
            title,
            views,
            likes,
            duration,
            enqueue,
        } => {
            commands::run_add(&external_id, &title, views, likes, duration, enqueue, &settings).await?;
        }

        Commands::Sync { queue } => {
            commands::run_sync(queue, &settings).await?;
        }

        Commands::Enqueue {
            item_ids,
            reindex,
            queue,
            wait,
        } => {
            commands::run_enqueue(&item_ids, reindex, queue, wait, &settings).await?;
        }

        Commands::Process {
            item_id,
            force_reindex,
        } => {
            commands::run_process(item_id, force_reindex, &settings).await?;
        }

        Commands::Worker { queue, workers } => {
            commands::run_worker(queue, workers, &settings).await?;
        }

        Commands::Status { item_id } => {
            commands::run_status(item_id, &settings).await?;
        }

        Commands::Task { task_id } => {
            commands::run_task(&task_id, &settings).await?;
        }

        Commands::List { status } => {
            commands::run_list(status.as_deref(), &settings).await?;
        }

        Commands::Search {
            query,
            external_id,
            limit,
        } => {
            commands::run_search(&query, external_id.as_deref(), limit, &settings).await?;
        }

        Commands::Delete { item_id } => {
            commands::run_delete(item_id, &settings).await?;
        }

        Commands::Stats => {
            commands::run_stats(&settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(&action, settings, config_path)?;
        }
    }

    Ok(())
}
