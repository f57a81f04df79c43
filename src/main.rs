//! Ripple-Crawl main entry point
//!
//! This is the command-line interface for the Ripple-Crawl batch crawler.

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use ripple_crawl::config::{load_config_with_hash, validate, Config, OutputFormat};
use ripple_crawl::crawler::{Crawler, HtmlExtractor, LineSource, UrlSource};
use ripple_crawl::output::{open_sink, print_statistics, CrawlStats};
use ripple_crawl::sitemap::{discover, Discovery};
use serde_json::json;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Ripple-Crawl: a polite, streaming batch crawler
///
/// Ripple-Crawl fetches a list of URLs with a bounded pool of workers while
/// respecting robots.txt, per-domain crawl delays and server throttling, and
/// streams one result per URL as soon as it completes.
#[derive(Parser, Debug)]
#[command(name = "ripple-crawl")]
#[command(version = "1.0.0")]
#[command(about = "A polite, streaming batch crawler", long_about = None)]
struct Cli {
    /// URLs to crawl
    #[arg(value_name = "URLS")]
    urls: Vec<String>,

    /// Path to TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Read URLs from a file, one per line ("-" for stdin)
    #[arg(short, long, value_name = "FILE")]
    input: Option<String>,

    /// Discover URLs from a site's sitemaps
    #[arg(long, value_name = "SITE")]
    sitemap: Option<String>,

    /// Maximum sitemap documents to fetch during discovery
    #[arg(long, default_value_t = 50)]
    max_sitemaps: usize,

    /// Override the User-Agent
    #[arg(long)]
    user_agent: Option<String>,

    /// Override the per-domain crawl delay (seconds)
    #[arg(long)]
    crawl_delay: Option<f64>,

    /// Override the request timeout (seconds)
    #[arg(long)]
    timeout: Option<u64>,

    /// Whether to obey robots.txt
    #[arg(long, value_name = "BOOL")]
    respect_robots: Option<bool>,

    /// Override the number of workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum)]
    format: Option<Format>,

    /// Write JSON lines to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<String>,

    /// SQLite database path (for --format sqlite)
    #[arg(long, value_name = "FILE")]
    database: Option<String>,

    /// Extract a table from every page instead of writing crawl results
    /// (CSS selector, or js=NAME for a JSON script variable)
    #[arg(long, value_name = "SELECTOR")]
    table: Option<String>,

    /// Which matching table to extract (1-based)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    table_index: u64,

    /// Validate config and show what would be crawled without crawling
    #[arg(long)]
    dry_run: bool,

    /// Print crawl statistics when done
    #[arg(long)]
    stats: bool,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Jsonl,
    Sqlite,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Jsonl => OutputFormat::Jsonl,
            Format::Sqlite => OutputFormat::Sqlite,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    let config = load_effective_config(&cli)?;
    let crawler = Crawler::with_http(config).context("Failed to set up crawler")?;

    let mut urls = collect_urls(&cli)?;
    let discovery = match &cli.sitemap {
        Some(site) => {
            let discovery = discover(
                crawler.fetcher().as_ref(),
                site,
                &crawler.fetch_options(),
                &crawler.config().crawler,
                cli.max_sitemaps,
            )
            .await
            .with_context(|| format!("Sitemap discovery failed for {}", site))?;
            urls.extend(discovery.urls.iter().cloned());
            Some(discovery)
        }
        None => None,
    };

    if urls.is_empty() {
        bail!("No URLs to crawl (pass URLs, --input or --sitemap)");
    }

    if cli.dry_run {
        handle_dry_run(crawler.config(), &urls, discovery.as_ref());
        return Ok(());
    }

    if let Some(selector) = &cli.table {
        let index = usize::try_from(cli.table_index - 1).context("--table-index is too large")?;
        return handle_tables(&crawler, urls, selector, index, cli.output.as_deref()).await;
    }

    handle_crawl(&crawler, urls, discovery, cli.stats).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// Logs go to stderr so JSON lines on stdout stay clean.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ripple_crawl=info,warn"),
            1 => EnvFilter::new("ripple_crawl=debug,info"),
            2 => EnvFilter::new("ripple_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads the config file (if any), applies CLI overrides and validates
fn load_effective_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading configuration from: {}", path.display());
            let (config, hash) = load_config_with_hash(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            config
        }
        None => Config::default(),
    };

    if let Some(user_agent) = &cli.user_agent {
        config.crawler.user_agent = user_agent.clone();
    }
    if let Some(delay) = cli.crawl_delay {
        config.crawler.crawl_delay = delay;
    }
    if let Some(timeout) = cli.timeout {
        config.crawler.timeout = timeout;
    }
    if let Some(respect) = cli.respect_robots {
        config.crawler.respect_robots_txt = respect;
    }
    if let Some(workers) = cli.workers {
        config.crawler.max_workers = workers;
    }
    if let Some(format) = cli.format {
        config.output.format = format.into();
    }
    if let Some(path) = &cli.output {
        config.output.jsonl_path = Some(path.clone());
    }
    if let Some(path) = &cli.database {
        config.output.database_path = path.clone();
    }

    validate(&config).context("Invalid configuration")?;
    Ok(config)
}

/// Gathers URLs from the command line and the input file
fn collect_urls(cli: &Cli) -> anyhow::Result<Vec<String>> {
    let mut urls = cli.urls.clone();

    match cli.input.as_deref() {
        Some("-") => {
            let mut source = LineSource::new(io::stdin().lock());
            urls.extend(source.urls().context("Failed to read URLs from stdin")?);
        }
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open {}", path))?;
            let mut source = LineSource::new(BufReader::new(file));
            urls.extend(
                source
                    .urls()
                    .with_context(|| format!("Failed to read URLs from {}", path))?,
            );
        }
        None => {}
    }

    Ok(urls)
}

/// Handles the --dry-run mode: shows the effective settings and the URL list
fn handle_dry_run(config: &Config, urls: &[String], discovery: Option<&Discovery>) {
    println!("=== Ripple-Crawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  User agent: {}", config.crawler.user_agent);
    println!("  Crawl delay: {}s", config.crawler.crawl_delay);
    println!("  Timeout: {}s", config.crawler.timeout);
    println!("  Respect robots.txt: {}", config.crawler.respect_robots_txt);
    println!("  Workers: {}", config.crawler.max_workers);
    println!("  Throttle retries: {}", config.crawler.max_retries);
    println!(
        "  Backoff: {}s base, {}s cap",
        config.crawler.backoff_base, config.crawler.backoff_cap
    );
    println!("  Throttle statuses: {:?}", config.crawler.throttle_status_codes);

    println!("\nOutput:");
    println!("  Format: {:?}", config.output.format);
    match config.output.format {
        OutputFormat::Jsonl => println!(
            "  File: {}",
            config.output.jsonl_path.as_deref().unwrap_or("<stdout>")
        ),
        OutputFormat::Sqlite => println!("  Database: {}", config.output.database_path),
    }

    if !config.extract.is_empty() {
        println!("\nExtraction Fields ({}):", config.extract.len());
        for (name, expr) in &config.extract {
            println!("  - {} = {}", name, expr);
        }
    }

    if let Some(discovery) = discovery {
        println!("\nSitemap Discovery ({}):", discovery.domain);
        for sitemap in &discovery.sitemaps {
            println!("  - {}", sitemap);
        }
        println!(
            "  Crawl delay after robots.txt: {:.2}s",
            discovery.state.crawl_delay_seconds
        );
    }

    println!("\nURLs ({}):", urls.len());
    for url in urls.iter().take(20) {
        println!("  - {}", url);
    }
    if urls.len() > 20 {
        println!("  ... and {} more", urls.len() - 20);
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main crawl operation
async fn handle_crawl(
    crawler: &Crawler,
    urls: Vec<String>,
    discovery: Option<Discovery>,
    show_stats: bool,
) -> anyhow::Result<()> {
    let mut sink = open_sink(&crawler.config().output).context("Failed to open output")?;

    let registry = crawler.new_registry();
    if let Some(discovery) = &discovery {
        registry
            .initialize_from_discovery(&discovery.domain, &discovery.state)
            .await;
    }

    let started = Instant::now();
    let mut stream = crawler.start_with_registry(urls, registry);

    let cancel = stream.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing in-flight requests");
            cancel.cancel();
        }
    });

    let mut stats = CrawlStats::new();
    let mut write_error = None;
    while let Some(result) = stream.next().await {
        stats.record(&result);
        if let Err(e) = sink.write(&result) {
            tracing::error!("Failed to write result for {}: {}", result.url, e);
            write_error = Some(e);
            stream.cancel();
            break;
        }
    }

    sink.finish().context("Failed to finish output")?;
    if let Some(e) = write_error {
        return Err(e).context("Failed to write results");
    }

    stats.duration = Some(started.elapsed());
    tracing::info!(
        "Crawl finished: {} results ({} ok, {} errors, {} skipped) in {:.1}s",
        stats.total_results,
        stats.count(ripple_crawl::crawler::CrawlOutcome::Success),
        stats.error_count(),
        stats.skipped_count(),
        started.elapsed().as_secs_f64()
    );
    if stream.is_cancelled() {
        tracing::warn!("Crawl was cancelled before all URLs were processed");
    }

    if show_stats {
        stats.domains = stream.registry().snapshot().await;
        print_statistics(&stats);
    }

    Ok(())
}

/// Handles --table: crawls the URLs and writes one JSON line per page,
/// holding either the extracted table or the reason there is none
async fn handle_tables(
    crawler: &Crawler,
    urls: Vec<String>,
    selector: &str,
    index: usize,
    output: Option<&str>,
) -> anyhow::Result<()> {
    let mut out: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {}", path))?;
            Box::new(BufWriter::new(file))
        }
        None => Box::new(io::stdout().lock()),
    };

    let mut stream = crawler.start(urls);
    let mut extracted = 0usize;
    while let Some(result) = stream.next().await {
        let line = if !result.outcome.is_success() {
            let error = result
                .error
                .clone()
                .unwrap_or_else(|| format!("HTTP {}", result.status_code));
            json!({ "url": result.url, "error": error })
        } else {
            match HtmlExtractor.extract_table(&result.body, selector, index) {
                Ok(table) => {
                    extracted += 1;
                    json!({ "url": result.url, "table": table.to_json() })
                }
                Err(e) => {
                    tracing::warn!("No table in {}: {}", result.url, e);
                    json!({ "url": result.url, "error": e.to_string() })
                }
            }
        };
        writeln!(out, "{}", line).context("Failed to write table")?;
    }

    out.flush().context("Failed to write table")?;
    tracing::info!("Extracted {} table(s) matching '{}'", extracted, selector);
    Ok(())
}
