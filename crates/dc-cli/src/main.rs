//! CLI entry point for dircrawl.
//!
//! This binary crawls a directory tree (expanding `.zip` archives on the way)
//! and reports on the files matching a glob filter.
//!
//! # Usage
//!
//! ```bash
//! dircrawl [OPTIONS] <COMMAND>
//!
//! # Print every matching file, archive entries as `archive.zip!entry`
//! dircrawl --filter '*.csv' list ./exports --sizes
//!
//! # Crawl statistics only
//! dircrawl -p 16 summary /srv/data
//!
//! # CSV report of every emitted file
//! dircrawl report ./exports --format csv --output report.csv
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

use std::io::Write;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::WrapErr;
use dc_core::CrawlerConfig;
use dc_crawler::{Crawler, FileOrigin, StatsSnapshot};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// CLI ARGUMENT TYPES
// =============================================================================

/// Recursive file crawler with transparent ZIP expansion.
///
/// Walks a directory tree, follows symlinks, looks inside `.zip` archives and
/// streams every file matching the filter, at most `--parallel` at a time.
#[derive(Parser)]
#[command(name = "dircrawl", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,

    /// Maximum number of files streamed at the same time.
    ///
    /// Defaults to 5, or the value from `--config`.
    #[arg(short, long, global = true, env = "DIRCRAWL_PARALLEL")]
    parallel: Option<usize>,

    /// Glob pattern selecting the files to stream.
    ///
    /// Patterns without `/` match the file name at any depth. Defaults to `*`,
    /// or the value from `--config`.
    #[arg(short, long, global = true, env = "DIRCRAWL_FILTER")]
    filter: Option<String>,

    /// JSON configuration file with `parallel` and `filter` keys.
    #[arg(long, global = true, env = "DIRCRAWL_CONFIG")]
    config: Option<Utf8PathBuf>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Print every matching file as its stream is consumed.
    List {
        /// File or directory to crawl.
        path: Utf8PathBuf,

        /// Print the byte count next to each path.
        #[arg(short, long)]
        sizes: bool,
    },

    /// Crawl and print statistics.
    Summary {
        /// File or directory to crawl.
        path: Utf8PathBuf,
    },

    /// Generate a report of every matching file.
    Report {
        /// File or directory to crawl.
        path: Utf8PathBuf,

        /// Output format.
        #[arg(long, value_enum, default_value_t = ReportFormat::Json)]
        format: ReportFormat,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },
}

/// Report output format.
#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    /// JSON format.
    Json,
    /// CSV format.
    Csv,
}

/// One consumed file.
#[derive(Debug, Clone, Serialize)]
struct FileRecord {
    path: Utf8PathBuf,
    origin: FileOrigin,
    size: u64,
}

impl FileRecord {
    /// Returns the path as shown to users, `archive.zip!entry` for entries.
    fn display_path(&self) -> String {
        match &self.origin {
            FileOrigin::Filesystem => self.path.to_string(),
            FileOrigin::Archive { archive } => format!("{archive}!{}", self.path),
        }
    }
}

// =============================================================================
// INITIALIZATION FUNCTIONS
// =============================================================================

/// Initializes the tracing subscriber for logging.
///
/// Respects the `RUST_LOG` environment variable if set. Otherwise, uses
/// `debug` level if `--verbose` is set, or `info` level by default.
/// Logs go to stderr so they never mix with command output.
fn init_tracing(verbose: bool, no_color: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose { "debug" } else { "info" };
        EnvFilter::new(level)
    });

    // Check if colors should be disabled (flag or NO_COLOR env var)
    let use_ansi = !no_color && std::env::var("NO_COLOR").is_err();

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(use_ansi)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

/// Builds a [`CrawlerConfig`] from CLI arguments.
///
/// Command-line values override the config file, which overrides defaults.
///
/// # Errors
///
/// Returns an error if the config file can't be loaded or the merged
/// configuration is invalid.
fn build_config(cli: &Cli) -> color_eyre::Result<CrawlerConfig> {
    let mut config = match &cli.config {
        Some(path) => CrawlerConfig::from_json_file(path)
            .wrap_err_with(|| format!("Failed to load config file {path}"))?,
        None => CrawlerConfig::default(),
    };

    if let Some(parallel) = cli.parallel {
        config = config.with_parallel(parallel);
    }
    if let Some(filter) = &cli.filter {
        config = config.with_filter(filter.as_str());
    }

    config.validate()?;
    Ok(config)
}

/// Streams every emitted file to the end and hands its record to `on_consumed`.
fn consume_streams<F>(crawler: &Crawler, on_consumed: F)
where
    F: Fn(FileRecord) + Send + Sync + 'static,
{
    let on_consumed = Arc::new(on_consumed);
    crawler.subscribe(move |event| {
        let Some(mut stream) = event.take_stream() else {
            return;
        };
        let path = event.path().to_owned();
        let origin = event.origin().clone();
        let on_consumed = Arc::clone(&on_consumed);

        tokio::spawn(async move {
            match tokio::io::copy(&mut stream, &mut tokio::io::sink()).await {
                Ok(size) => on_consumed(FileRecord { path, origin, size }),
                // The crawl itself reports the failure.
                Err(e) => debug!(path = %path, error = %e, "Stream read failed"),
            }
        });
    });
}

/// Runs a crawl, attaching the path to any failure.
async fn crawl(crawler: &Crawler, path: &Utf8Path) -> color_eyre::Result<()> {
    crawler
        .crawl(path)
        .await
        .wrap_err_with(|| format!("Failed to crawl {path}"))
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

/// Prints every file as soon as its stream has been consumed.
///
/// # Errors
///
/// Returns an error if the crawl fails.
async fn run_list(config: CrawlerConfig, path: &Utf8Path, sizes: bool) -> color_eyre::Result<()> {
    let crawler = Crawler::new(config)?;

    consume_streams(&crawler, move |record| {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = if sizes {
            writeln!(handle, "{}\t{}", record.size, record.display_path())
        } else {
            writeln!(handle, "{}", record.display_path())
        };
    });

    crawl(&crawler, path).await
}

/// Crawls and prints statistics.
///
/// # Errors
///
/// Returns an error if the crawl fails.
async fn run_summary(config: CrawlerConfig, path: &Utf8Path) -> color_eyre::Result<()> {
    let parallel = config.parallel;
    let crawler = Crawler::new(config)?;
    consume_streams(&crawler, |_| {});

    crawl(&crawler, path).await?;
    print_stats_summary(&crawler.stats(), parallel);
    Ok(())
}

/// Generates a crawl report in the specified format.
///
/// # Errors
///
/// Returns an error if the crawl or writing the report fails.
async fn run_report(
    config: CrawlerConfig,
    path: &Utf8Path,
    format: ReportFormat,
    output: Option<Utf8PathBuf>,
) -> color_eyre::Result<()> {
    info!(path = %path, "Generating report");

    let crawler = Crawler::new(config)?;
    let records: Arc<Mutex<Vec<FileRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    consume_streams(&crawler, move |record| sink.lock().push(record));

    crawl(&crawler, path).await?;

    let mut files = std::mem::take(&mut *records.lock());
    files.sort_by_cached_key(FileRecord::display_path);

    let content = match format {
        ReportFormat::Json => generate_json_report(&crawler.stats(), &files)?,
        ReportFormat::Csv => generate_csv_report(&files),
    };

    if let Some(output_path) = output {
        std::fs::write(output_path.as_std_path(), &content)?;
        info!(path = %output_path, "Report written");
    } else {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        write!(handle, "{content}")?;
    }

    Ok(())
}

// =============================================================================
// OUTPUT HELPERS
// =============================================================================

/// Prints a summary of crawl statistics.
fn print_stats_summary(stats: &StatsSnapshot, parallel: usize) {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();

    let _ = writeln!(handle);
    let _ = writeln!(handle, "Crawl Summary");
    let _ = writeln!(handle, "=============");
    let _ = writeln!(handle);
    let _ = writeln!(handle, "Directories listed:  {}", stats.directories);
    let _ = writeln!(handle, "Files seen:          {}", stats.files);
    let _ = writeln!(
        handle,
        "Archives expanded:   {} ({} entries)",
        stats.archives, stats.entries
    );
    let _ = writeln!(handle);
    let _ = writeln!(handle, "Emitted:             {}", stats.emitted);
    let _ = writeln!(handle, "  Completed:         {}", stats.completed);
    let _ = writeln!(handle, "  Failed:            {}", stats.failed);
    let _ = writeln!(handle, "Filtered out:        {}", stats.filtered);
    let _ = writeln!(handle, "Bytes read:          {}", stats.bytes);
    let _ = writeln!(
        handle,
        "Peak in flight:      {} of {parallel}",
        stats.peak_in_flight
    );
    let _ = writeln!(handle);
    let _ = writeln!(
        handle,
        "Match rate: {:.1}%",
        stats.emitted_percent()
    );
}

/// Generates a JSON report.
fn generate_json_report(stats: &StatsSnapshot, files: &[FileRecord]) -> color_eyre::Result<String> {
    #[derive(Serialize)]
    struct Report<'a> {
        stats: &'a StatsSnapshot,
        files: &'a [FileRecord],
    }

    let report = Report { stats, files };
    serde_json::to_string_pretty(&report)
        .map_err(|e| color_eyre::eyre::eyre!("Failed to serialize JSON: {}", e))
}

/// Generates a CSV report.
fn generate_csv_report(files: &[FileRecord]) -> String {
    use std::fmt::Write;

    let mut output = String::from("path,origin,archive,size\n");

    for file in files {
        let escaped_path = escape_csv(file.path.as_str());
        let (origin, archive) = match &file.origin {
            FileOrigin::Filesystem => ("filesystem", String::new()),
            FileOrigin::Archive { archive } => ("archive", escape_csv(archive.as_str())),
        };
        let size = file.size;

        let _ = writeln!(output, "{escaped_path},{origin},{archive},{size}");
    }

    output
}

/// Escapes a string for CSV output.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_owned()
    }
}

// =============================================================================
// MAIN ENTRY POINT
// =============================================================================

/// Application entry point.
#[tokio::main(flavor = "current_thread")]
async fn main() -> color_eyre::Result<()> {
    // 1. Install color-eyre FIRST (before any potential panics)
    color_eyre::install()?;

    // 2. Parse CLI arguments
    let cli = Cli::parse();

    // 3. Initialize tracing (handles --no-color for log output)
    init_tracing(cli.verbose, cli.no_color);

    // 4. Merge configuration
    let config = build_config(&cli)?;

    // 5. Route to appropriate command
    match &cli.command {
        Commands::List { path, sizes } => run_list(config, path, *sizes).await,
        Commands::Summary { path } => run_summary(config, path).await,
        Commands::Report {
            path,
            format,
            output,
        } => run_report(config, path, *format, output.clone()).await,
    }
}
