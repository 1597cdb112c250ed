//! Ambry-Scrape main entry point
//!
//! Command-line interface for validating scrape configurations and
//! rehearsing crawls offline against a fixture surface. In production the
//! library is embedded by the Ambry browser shell; this binary exists for
//! operators.

use ambry_scrape::config::load_config_with_hash;
use ambry_scrape::crawler::CrawlRunner;
use ambry_scrape::recorder::{LocalSession, MemoryStore, PageRecorder};
use ambry_scrape::surface::{BrowsingSurface, FixtureSurface};
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use url::Url;

/// Ambry-Scrape: the autonomous capture crawler of the Ambry archiving browser
#[derive(Parser, Debug)]
#[command(name = "ambry-scrape")]
#[command(version = "1.0.0")]
#[command(about = "Autonomous capture crawler for web archiving", long_about = None)]
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

    /// Validate the config and print the crawl plan without crawling
    #[arg(long, conflicts_with = "fixture")]
    plan: bool,

    /// Rehearse the crawl against a directory of HTML files
    #[arg(long, value_name = "DIR")]
    fixture: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.plan {
        print_plan(&config);
        return Ok(());
    }

    match cli.fixture {
        Some(dir) => run_fixture_crawl(config, &dir).await,
        None => {
            print_plan(&config);
            println!("\nNothing to drive: pass --fixture DIR to rehearse the crawl offline.");
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("ambry_scrape=info,warn"),
            1 => EnvFilter::new("ambry_scrape=debug,info"),
            2 => EnvFilter::new("ambry_scrape=trace,debug"),
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

/// Prints what the crawl would do, without driving a surface
fn print_plan(config: &ambry_scrape::config::Config) {
    println!("=== Ambry-Scrape Plan ===\n");

    println!("Crawl:");
    println!("  First page: {}", config.scrape.first_page);
    println!("  Link selector: {}", config.scrape.link_selector);
    println!("  PPM limit: {}", config.scrape.ppm_limit);
    println!("  Dry run: {}", config.scrape.dry_run);

    println!("\nRoot URL prefixes ({}):", config.scrape.root_urls.len());
    for root in &config.scrape.root_urls {
        println!("  - {}", root);
    }

    println!("\nReporting:");
    println!("  Interval: {}ms", config.report.interval_ms);

    match &config.overview.all_pages_url {
        Some(url) => println!("\nOverview after finish: {}", url),
        None => println!("\nOverview after finish: (none)"),
    }

    println!("\n✓ Configuration is valid");
}

/// Runs the crawl against a fixture surface built from a directory
async fn run_fixture_crawl(
    config: ambry_scrape::config::Config,
    dir: &std::path::Path,
) -> anyhow::Result<()> {
    let origin = origin_of(&config.scrape.root_urls)?;
    tracing::info!("Building fixture surface from {} at {}", dir.display(), origin);

    let fixture = FixtureSurface::from_directory(dir, &origin)
        .with_context(|| format!("failed to read fixture directory {}", dir.display()))?;
    let surface: Arc<dyn BrowsingSurface> = Arc::new(fixture.clone());

    let store = Arc::new(MemoryStore::new());
    let session = Arc::new(LocalSession::new("fixture"));

    let recorder = Arc::new(PageRecorder::new(store.clone(), session.clone()));
    let pump = recorder.attach(Arc::clone(&surface));

    let runner = CrawlRunner::new(&config, surface, session)?;
    runner.set_reporter(Arc::new(|_runner, status| {
        tracing::info!(
            state = %status.state,
            visited = status.pages_visited,
            remaining = status.pages_remaining,
            ppm = status.ppm,
            "progress"
        );
    }));

    runner.start().await?;
    pump.abort();

    println!("\n=== Rehearsal complete ===");
    println!("Visited pages: {}", runner.current_status().pages_visited);
    println!("Recorded pages:");
    for page in store.pages() {
        println!("  [{}] {} — {}", page.id.0, page.url, page.title);
    }

    Ok(())
}

/// Derives the fixture origin from the first configured root prefix
fn origin_of(roots: &[String]) -> anyhow::Result<Url> {
    let first = roots
        .first()
        .context("config has no root-urls to derive a fixture origin from")?;
    let mut origin = Url::parse(first).context("invalid root URL")?;
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    Ok(origin)
}
