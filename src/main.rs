// src/main.rs

//! forgecrawl: crawler engine CLI.
//!
//! Starts the worker loops against the configured queue, store, and lock
//! bindings, or validates configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use forgecrawl::config::{apply_env, load_config, DynamicSettings, SettingsChannel};
use forgecrawl::models::{Config, Queuable, TraversalPolicy};
use forgecrawl::pipeline::{Crawler, LoopSupervisor};
use forgecrawl::queue::{QueueName, QueueSet};
use forgecrawl::services::{Fetcher, MemoryLocker, Processor, UrlLocker};
use forgecrawl::storage::{DocumentStore, LocalStore, MemoryStore};
use forgecrawl::{AppError, Result};

#[derive(Parser, Debug)]
#[command(
    name = "forgecrawl",
    version,
    about = "Durable crawler engine for software-forge APIs"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "data/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the worker loops
    Run {
        /// Comma-separated organizations to seed as root requests
        #[arg(long, value_delimiter = ',')]
        orgs: Vec<String>,
    },
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    forgecrawl::logging::init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    apply_env(&mut config);

    match cli.command {
        Command::Run { orgs } => run(config, orgs).await,
        Command::Validate => validate(&config),
    }
}

async fn run(config: Config, orgs: Vec<String>) -> Result<()> {
    let queues = Arc::new(match config.queue.provider.as_str() {
        "memory" => QueueSet::memory(&config.queue.prefix),
        other => {
            return Err(AppError::config(format!(
                "queue provider '{}' is not wired into this binary",
                other
            )))
        }
    });
    let store: Arc<dyn DocumentStore> = match config.storage.provider.as_str() {
        "memory" => Arc::new(MemoryStore::new()),
        "local" => Arc::new(LocalStore::new(&config.storage.path)),
        other => {
            return Err(AppError::config(format!(
                "store provider '{}' is not wired into this binary",
                other
            )))
        }
    };
    let locker: Arc<dyn UrlLocker> = Arc::new(MemoryLocker::new());
    let fetcher = Arc::new(Fetcher::new(Arc::clone(&store), config.fetch.clone())?);

    let crawler = Arc::new(Crawler::new(
        Arc::clone(&queues),
        Some(locker),
        fetcher,
        store,
        Arc::new(Processor::new()),
        config.crawler.clone(),
    ));

    if !orgs.is_empty() {
        let api_base = config.fetch.api_base.trim_end_matches('/');
        let seeds = orgs
            .iter()
            .map(|org| {
                Queuable::root(
                    "org",
                    &format!("{}/orgs/{}", api_base, org),
                    TraversalPolicy::default(),
                )
            })
            .collect();
        queues.push(seeds, QueueName::Normal).await?;
        info!(count = orgs.len(), "seeded organization requests");
    }

    let supervisor = Arc::new(LoopSupervisor::new(crawler, config.crawler.loop_delay()));
    let settings = SettingsChannel::new(DynamicSettings {
        count: config.crawler.count,
    });
    let watcher = Arc::clone(&supervisor).watch(settings.subscribe());

    supervisor.run(config.crawler.count).await;
    info!(
        name = %config.crawler.name,
        count = config.crawler.count,
        "engine running; ctrl-c to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested; draining worker loops");
    supervisor.stop().await;
    while supervisor.status().await > 0 {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    watcher.abort();
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.crawler.max_attempts == 0 {
        return Err(AppError::config("max_attempts must be at least 1"));
    }
    if config.crawler.processing_ttl_ms == 0 {
        return Err(AppError::config("processing_ttl_ms must be positive"));
    }
    if !matches!(config.queue.provider.as_str(), "memory") {
        return Err(AppError::config(format!(
            "unknown queue provider '{}'",
            config.queue.provider
        )));
    }
    if !matches!(config.storage.provider.as_str(), "memory" | "local") {
        return Err(AppError::config(format!(
            "unknown store provider '{}'",
            config.storage.provider
        )));
    }

    println!("configuration OK");
    println!(
        "  crawler: {} ({} loops, {} attempts, ttl {} ms)",
        config.crawler.name,
        config.crawler.count,
        config.crawler.max_attempts,
        config.crawler.processing_ttl_ms
    );
    println!(
        "  queues:  {} ({}-priority/-soon/-normal/-dead)",
        config.queue.provider, config.queue.prefix
    );
    println!("  store:   {}", config.storage.provider);
    if !config.crawler.org_allowlist.is_empty() {
        println!("  orgs:    {}", config.crawler.org_allowlist.join(", "));
    }
    Ok(())
}
