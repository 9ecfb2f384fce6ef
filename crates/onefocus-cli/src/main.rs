use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use onefocus_core::{Bucket, BucketFilter};
use onefocus_sync::{SyncConfig, SyncPipeline};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "onefocus")]
#[command(about = "Mirror a task workspace into Postgres and summarize it")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Snapshot a single list.
    SnapshotList {
        list_id: String,
        /// Overrides the bucket registry for this list.
        #[arg(long)]
        bucket: Option<Bucket>,
    },
    /// Discover and snapshot every list in the configured workspace.
    SnapshotWorkspace,
    /// Summarize the latest snapshot.
    ContextPack {
        #[arg(long, default_value = "all")]
        bucket: BucketFilter,
        #[arg(long)]
        lookback: Option<usize>,
        #[arg(long)]
        due_soon_days: Option<u32>,
    },
    /// Create missing tables and indexes.
    InitDb,
    /// Run the cron-scheduled workspace crawl until interrupted.
    Schedule,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::SnapshotList { list_id, bucket } => {
            let pipeline = onefocus_sync::pipeline_from_env()?;
            let outcome = pipeline.snapshot_one_list(&list_id, bucket).await?;
            print_json(&outcome.persisted)?;
        }
        Commands::SnapshotWorkspace => {
            let report = onefocus_sync::snapshot_workspace_from_env().await?;
            print_json(&report)?;
        }
        Commands::ContextPack {
            bucket,
            lookback,
            due_soon_days,
        } => {
            let pipeline = onefocus_sync::pipeline_from_env()?;
            let mut options = pipeline.context_options(Utc::now());
            if let Some(lookback) = lookback {
                options.lookback = lookback;
            }
            if let Some(days) = due_soon_days {
                options.due_soon_days = days;
            }
            let pack = pipeline.build_context_pack(bucket, options).await?;
            print_json(&pack)?;
        }
        Commands::InitDb => {
            onefocus_sync::init_schema_from_env().await?;
            info!("schema is up to date");
        }
        Commands::Schedule => {
            let mut config = SyncConfig::from_env();
            config.scheduler_enabled = true;
            let pipeline = Arc::new(SyncPipeline::new(config)?);
            let Some(sched) = pipeline.maybe_build_scheduler().await? else {
                return Ok(());
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %pipeline.config().snapshot_cron, "scheduler running; ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        }
    }

    Ok(())
}
