//! Swarm-Requests main entry point
//!
//! This is the command-line interface for fetching many URLs through a
//! bounded swarm engine.

use anyhow::Context;
use clap::Parser;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use swarm_requests::config::{load_config_with_hash, Config};
use swarm_requests::{EngineBuilder, RequestError, Response, ResponseCache, Swarm};
use tracing_subscriber::EnvFilter;

/// Swarm-Requests: many HTTP requests, bounded and in order
///
/// Fetches every URL through a fixed worker pool, respecting the configured
/// concurrency and rate limits, retrying transient failures and printing
/// one line per URL.
#[derive(Parser, Debug)]
#[command(name = "swarm-requests")]
#[command(version)]
#[command(about = "Fetch many URLs through a bounded, retrying swarm", long_about = None)]
struct Cli {
    /// URLs to fetch
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Read additional URLs from a file, one per line
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Print results as they complete instead of in input order
    #[arg(long)]
    unordered: bool,

    /// Also fetch every link found on each page, as a nested swarm
    #[arg(long)]
    links: bool,

    /// Serve successful GETs from this directory and store new ones in it
    #[arg(long, value_name = "DIR")]
    cache: Option<PathBuf>,

    /// Validate config and show the resolved settings without fetching
    #[arg(long)]
    dry_run: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Running totals for the final report
#[derive(Debug, Default)]
struct Tally {
    succeeded: Cell<usize>,
    failed: Cell<usize>,
}

impl Tally {
    fn record(&self, outcome: &Result<Response, RequestError>) {
        let counter = match outcome {
            Ok(_) => &self.succeeded,
            Err(_) => &self.failed,
        };
        counter.set(counter.get() + 1);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let (config, config_hash) = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            (config, Some(hash))
        }
        None => (Config::default(), None),
    };

    let mut urls = cli.urls.clone();
    if let Some(input) = &cli.input {
        urls.extend(read_url_file(input)?);
    }

    if cli.dry_run {
        handle_dry_run(&config, config_hash.as_deref(), &urls)?;
        return Ok(());
    }

    if urls.is_empty() {
        anyhow::bail!("No URLs given; pass them as arguments or with --input");
    }

    let options = FetchOptions {
        maintain_order: !cli.unordered,
        follow_links: cli.links,
        cache: cli.cache,
    };
    handle_fetch(&config, urls, options).await
}

/// How the fetch run behaves beyond the configuration file
#[derive(Debug)]
struct FetchOptions {
    maintain_order: bool,
    follow_links: bool,
    cache: Option<PathBuf>,
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("swarm_requests=info,warn"),
            1 => EnvFilter::new("swarm_requests=debug,info"),
            2 => EnvFilter::new("swarm_requests=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads one URL per line, skipping blanks and `#` comments
fn read_url_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Handles the --dry-run mode: validates config and shows what would be fetched
fn handle_dry_run(config: &Config, hash: Option<&str>, urls: &[String]) -> anyhow::Result<()> {
    let limits = config.threshold_limits()?;
    let retry = config.retry_strategy()?;

    println!("=== Swarm-Requests Dry Run ===\n");

    match hash {
        Some(hash) => println!("Config hash: {}\n", hash),
        None => println!("Config: built-in defaults\n"),
    }

    println!("Engine:");
    println!(
        "  Workers: {}",
        config.worker_count().unwrap_or(limits.max_in_flight)
    );
    match config.timeout() {
        Some(timeout) => println!("  Timeout: {:?}", timeout),
        None => println!("  Timeout: none"),
    }

    println!("\nThreshold:");
    println!("  Max in flight: {}", limits.max_in_flight);
    println!("  Min interval: {:?}", limits.min_interval);
    match limits.rate {
        Some(rate) => println!("  Rate cap: {} per {:?}", rate.max, rate.window),
        None => println!("  Rate cap: none"),
    }

    println!("\nRetry ({}):", config.retry.preset);
    println!("  Max retries: {}", retry.max_retries);
    println!("  Backoff: {:?}", retry.backoff);
    println!("  Retried statuses: {:?}", retry.classifier.statuses);

    println!("\nUser Agent: {}", config.user_agent.header_value());

    println!("\n✓ Configuration is valid");
    println!("✓ Would fetch {} URLs", urls.len());

    Ok(())
}

/// Handles the main fetch operation
async fn handle_fetch(config: &Config, urls: Vec<String>, options: FetchOptions) -> anyhow::Result<()> {
    let FetchOptions {
        maintain_order,
        follow_links,
        cache,
    } = options;

    let mut builder = EngineBuilder::from_config(config)?;
    if let Some(dir) = cache {
        let cache = ResponseCache::open(&dir)
            .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;
        tracing::info!("Using response cache in {}", cache.dir().display());
        builder = builder.short_circuit(cache.clone()).preprocessor(cache);
    }
    let engine = builder.build();
    tracing::info!("Fetching {} URLs", urls.len());

    let tally = Tally::default();
    let swarm = engine.swarm(urls, maintain_order);

    if follow_links {
        let tally = &tally;
        let engine = &engine;
        swarm
            .consume(|outcome| {
                print_outcome(&outcome, 0);
                tally.record(&outcome);
                let links: Vec<String> = match &outcome {
                    Ok(response) => response.links().iter().map(|u| u.to_string()).collect(),
                    Err(_) => Vec::new(),
                };
                async move {
                    // Created inside consume, so it runs ahead of the outer swarm
                    let nested = engine.swarm(links, maintain_order);
                    drain(nested, 1, tally).await;
                }
            })
            .await;
    } else {
        drain(swarm, 0, &tally).await;
    }

    engine.shutdown(false).await;

    tracing::info!(
        "Done: {} succeeded, {} failed",
        tally.succeeded.get(),
        tally.failed.get()
    );
    Ok(())
}

async fn drain(mut swarm: Swarm, indent: usize, tally: &Tally) {
    while let Some(outcome) = swarm.next().await {
        print_outcome(&outcome, indent);
        tally.record(&outcome);
    }
}

fn print_outcome(outcome: &Result<Response, RequestError>, indent: usize) {
    let pad = "  ".repeat(indent);
    match outcome {
        Ok(response) => println!(
            "{}{} {} {} bytes{}{}",
            pad,
            response.status().as_u16(),
            response.url(),
            response.bytes().len(),
            response
                .title()
                .map(|title| format!(" \"{}\"", title))
                .unwrap_or_default(),
            if response.attempts() == 0 { " (cached)" } else { "" }
        ),
        Err(e) => println!("{}ERR {} ({})", pad, e.url(), e),
    }
}
