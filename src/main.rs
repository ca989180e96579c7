//! Sumi-Engine main entry point
//!
//! Runs the crawl engine over the configured seeds. Fetching is simulated:
//! every URI gets a deterministic latency, status and set of outlinks derived
//! from a hash of its URL, so the scheduling, pause and checkpoint machinery
//! can be exercised without touching the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sumi_engine::checkpoint::find_available_checkpoints;
use sumi_engine::config::{load_config_with_hash, Config};
use sumi_engine::uri::status;
use sumi_engine::{
    CheckpointService, CrawlController, CrawlUri, Frontier, Pipeline, ProcessError,
    ProcessorChain, StatisticsTracker, WorkerContext,
};
use tracing_subscriber::EnvFilter;

/// Sumi-Engine: a continuous crawl scheduling engine
///
/// Sumi-Engine schedules URIs politely across many workers and can
/// checkpoint its full scheduling state so a crawl can be resumed later.
#[derive(Parser, Debug)]
#[command(name = "sumi-engine")]
#[command(version = "1.0.0")]
#[command(about = "A continuous crawl scheduling engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume from the named checkpoint instead of the configured seeds
    #[arg(long, value_name = "NAME", conflicts_with_all = ["dry_run", "list_checkpoints"])]
    recover: Option<String>,

    /// List valid checkpoints and exit
    #[arg(long, conflicts_with = "dry_run")]
    list_checkpoints: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,

    /// Simulated crawl: stop following links after this many hops
    #[arg(long, default_value_t = 2)]
    max_hops: u32,

    /// Simulated crawl: links found on every page
    #[arg(long, default_value_t = 3)]
    links_per_page: u32,

    /// Simulated crawl: upper bound of the per-URI fetch latency
    #[arg(long, default_value_t = 200)]
    latency_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.list_checkpoints {
        return handle_list_checkpoints(&config);
    }
    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    let code = handle_crawl(config, &cli).await?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if let Ok(filter) = EnvFilter::try_from_default_env() {
        filter
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_engine=info,warn"),
            1 => EnvFilter::new("sumi_engine=debug,info"),
            2 => EnvFilter::new("sumi_engine=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --list-checkpoints
fn handle_list_checkpoints(config: &Config) -> Result<()> {
    let dir = Path::new(&config.checkpoint.checkpoints_dir);
    let available = find_available_checkpoints(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?;

    if available.is_empty() {
        println!("No valid checkpoints in {}", dir.display());
        return Ok(());
    }
    println!("Valid checkpoints in {} (newest first):", dir.display());
    for checkpoint in available {
        println!("  {}", checkpoint.name());
    }
    Ok(())
}

/// Handles --dry-run: shows the effective configuration
fn handle_dry_run(config: &Config) {
    println!("=== Sumi-Engine Dry Run ===\n");

    println!("Controller:");
    println!("  Workers: {}", config.controller.max_workers);
    println!("  Pause at start: {}", config.controller.pause_at_start);
    println!("  Pause at finish: {}", config.controller.pause_at_finish);
    println!("  Run while empty: {}", config.controller.run_while_empty);
    println!("  Pause timeout: {}s", config.controller.pause_timeout_secs);

    println!("\nFrontier:");
    println!(
        "  Politeness delay: {}ms..{}ms (factor {})",
        config.frontier.min_delay_ms, config.frontier.max_delay_ms, config.frontier.delay_factor
    );
    println!(
        "  Retries: {} (connection failures wait {}s)",
        config.frontier.max_retries, config.frontier.retry_delay_secs
    );
    println!(
        "  Queue store: {}",
        config.frontier.queue_store.as_deref().unwrap_or("in memory")
    );

    println!("\nCheckpoints:");
    println!("  Directory: {}", config.checkpoint.checkpoints_dir);
    match config.checkpoint.interval_minutes {
        0 => println!("  Interval: operator requests only"),
        minutes => println!("  Interval: every {} minute(s)", minutes),
    }

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  - {}", seed.url);
    }

    println!("\n✓ Configuration is valid");
}

/// Runs a crawl to completion and returns the process exit code
async fn handle_crawl(config: Config, cli: &Cli) -> Result<i32> {
    let frontier = Arc::new(Frontier::open(config.frontier.clone())?);
    let stats = Arc::new(StatisticsTracker::new());
    frontier.add_listener(stats.clone());

    let pipeline = Pipeline::new(
        Arc::new(SimulatedFetch {
            max_hops: cli.max_hops,
            links_per_page: cli.links_per_page,
            latency_ms: cli.latency_ms,
        }),
        Arc::new(ScheduleOutlinks {
            frontier: frontier.clone(),
        }),
    );
    let controller = CrawlController::new(config.controller.clone(), frontier.clone(), pipeline);
    let checkpoints = Arc::new(CheckpointService::new(
        config.checkpoint.clone(),
        controller.clone(),
        stats.clone(),
    ));

    match &cli.recover {
        Some(name) => {
            checkpoints
                .set_recovery_checkpoint_by_name(name)
                .await
                .with_context(|| format!("failed to recover from {}", name))?;
        }
        None => {
            if checkpoints.has_available_checkpoints() {
                tracing::info!("Checkpoints exist; pass --recover <NAME> to resume one");
            }
            let mut seeded = 0;
            for seed in &config.seeds {
                if frontier.schedule(CrawlUri::new(&seed.url)?)? {
                    seeded += 1;
                }
            }
            tracing::info!("Scheduled {} seed URI(s)", seeded);
        }
    }

    checkpoints.start_auto_checkpoints();
    spawn_interrupt_handler(controller.clone(), checkpoints.clone());

    controller.request_crawl_start().await;

    let mut progress = tokio::time::interval(Duration::from_secs(30));
    progress.tick().await;
    loop {
        tokio::select! {
            _ = controller.wait_until_finished() => break,
            _ = progress.tick() => tracing::info!("Progress: {}", controller.status_report()),
        }
    }

    stats.print_statistics();
    let exit = controller.exit_status();
    println!("Crawl ended: {}", exit);
    Ok(exit.exit_code())
}

/// First Ctrl-C checkpoints then stops; later ones escalate the stop
fn spawn_interrupt_handler(controller: CrawlController, checkpoints: Arc<CheckpointService>) {
    tokio::spawn(async move {
        let mut presses = 0u32;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            if presses == 1 {
                tracing::warn!("Interrupted; checkpointing before stopping (Ctrl-C again to stop now)");
                let controller = controller.clone();
                let checkpoints = checkpoints.clone();
                tokio::spawn(async move {
                    if let Some(name) = checkpoints.request_checkpoint().await {
                        tracing::info!("Wrote checkpoint {}", name);
                    }
                    controller.request_crawl_stop();
                });
            } else {
                tracing::warn!("Interrupted again; stopping");
                controller.request_crawl_stop();
            }
        }
    });
}

/// Fetch chain that fabricates a response from the URL's hash
struct SimulatedFetch {
    max_hops: u32,
    links_per_page: u32,
    latency_ms: u64,
}

#[async_trait]
impl ProcessorChain for SimulatedFetch {
    async fn process(&self, uri: &mut CrawlUri, ctx: &WorkerContext) -> Result<(), ProcessError> {
        ctx.at_processor("fetch");
        let digest = Sha256::digest(uri.url.as_str().as_bytes());

        let latency = u64::from(digest[0]) * self.latency_ms / 255;
        tokio::time::sleep(Duration::from_millis(latency)).await;
        uri.fetch_duration_ms = Some(latency);

        if digest[1] % 25 == 0 && uri.fetch_attempts == 1 {
            uri.fetch_status = status::S_CONNECT_FAILED;
            return Ok(());
        }
        if digest[1] % 17 == 0 {
            uri.fetch_status = 404;
            return Ok(());
        }

        uri.fetch_status = 200;
        uri.content_size = 512 + u64::from(digest[2]) * 64;

        ctx.at_processor("extract");
        if uri.hops >= self.max_hops {
            return Ok(());
        }
        for i in 0..self.links_per_page {
            let link = if i == 0 && digest[3] % 3 == 0 {
                format!("https://site{}.example/", digest[4] % 16)
            } else {
                format!("p{}-{}", uri.hops + 1, i)
            };
            match uri.url.join(&link) {
                Ok(url) => uri.outlinks.push(url),
                Err(e) => return Err(ProcessError::Recoverable(e.to_string())),
            }
        }
        Ok(())
    }
}

/// Disposition chain that schedules discovered links
struct ScheduleOutlinks {
    frontier: Arc<Frontier>,
}

#[async_trait]
impl ProcessorChain for ScheduleOutlinks {
    async fn process(&self, uri: &mut CrawlUri, ctx: &WorkerContext) -> Result<(), ProcessError> {
        ctx.at_processor("schedule");
        for link in std::mem::take(&mut uri.outlinks) {
            let child = uri
                .discovered(link.as_str())
                .map_err(|e| ProcessError::Recoverable(e.to_string()))?;
            self.frontier
                .schedule(child)
                .map_err(|e| ProcessError::Severe(e.to_string()))?;
        }
        Ok(())
    }
}
