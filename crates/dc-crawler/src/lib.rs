//! Recursive file crawler with transparent ZIP expansion.
//!
//! This crate walks a directory tree, follows symlinks, expands `.zip`
//! archives in place, and hands every file matching a glob filter to
//! subscribed observers as an async byte stream. At most `parallel` streams
//! are in flight at any time; the rest wait their turn in FIFO order.
//!
//! # Overview
//!
//! The main entry point is [`Crawler`], which combines:
//!
//! - [`TreeWalker`]: Directory, file and archive traversal
//! - [`ZipDecoder`]: Streaming ZIP entry decoding (any [`ArchiveDecoder`] works)
//! - [`GlobFilter`]: Glob matching on file names and paths
//! - [`Gate`]: Bounded FIFO admission of emissions
//! - [`EmissionSink`]: Observer registry handing out [`FileStream`]s
//! - [`CrawlStats`]: Atomic statistics
//!
//! # Example
//!
//! ```no_run
//! use dc_crawler::{Crawler, CrawlerConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), dc_crawler::CrawlError> {
//! let crawler = Crawler::new(CrawlerConfig::default().with_filter("*.csv"))?;
//!
//! crawler.subscribe(|event| {
//!     println!("{}", event.path());
//!     if let Some(stream) = event.take_stream() {
//!         stream.discard();
//!     }
//! });
//!
//! crawler.crawl("./exports").await?;
//! println!("{} files", crawler.stats().emitted);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Crawler::crawl(path)
//!     │
//!     └── TreeWalker::visit
//!             │
//!             ├── directory ── visit children ── join_all
//!             │
//!             ├── *.zip ────── ArchiveDecoder ── entry ─┐
//!             │                                         │
//!             └── file ─────── GlobFilter ──────────────┤
//!                                                       ▼
//!                                      Gate (FIFO, ≤ parallel in flight)
//!                                                       │
//!                                                       ▼
//!                                      EmissionSink ── observers
//! ```
//!
//! # Completion
//!
//! A crawl resolves once every matched file has been emitted and its stream
//! consumed, and rejects with the first error raised anywhere. An observer
//! that never finishes its stream keeps the crawl pending; there are no
//! timeouts.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod archive;
pub mod completion;
mod error;
pub mod filter;
mod gate;
mod sink;
mod stats;
mod walker;

pub use archive::{ArchiveDecoder, ZipDecoder};
pub use completion::{Completion, Outcome};
pub use dc_core::{ConfigError, CrawlerConfig};
pub use error::{ConsumerFailure, CrawlError};
pub use filter::{AcceptAllFilter, FileFilter, GlobFilter};
pub use gate::Gate;
pub use sink::{ByteStream, EmissionSink, FileEvent, FileOrigin, FileStream, SubscriptionId};
pub use stats::{CrawlStats, StatsSnapshot};
pub use walker::TreeWalker;

use std::num::NonZeroUsize;
use std::sync::Arc;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use tracing::{info, warn};

/// Recursive crawler emitting matched files to observers.
///
/// A crawler can run any number of crawls, one after another or at the same
/// time; they share its gate, observers and statistics.
///
/// Up to `parallel` archives are decoded at once, each holding a thread of
/// the runtime's blocking pool, so `parallel` must stay below the runtime's
/// `max_blocking_threads` (512 unless configured).
#[derive(Debug)]
pub struct Crawler {
    config: CrawlerConfig,
    walker: TreeWalker,
}

impl Crawler {
    /// Creates a crawler using the configured glob pattern as its filter.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Config`] if `parallel` is zero or the pattern is
    /// empty or invalid.
    pub fn new(config: CrawlerConfig) -> Result<Self, CrawlError> {
        config.validate()?;
        let filter = GlobFilter::new(&config.filter)?;
        Self::with_filter(config, filter)
    }

    /// Creates a crawler with a custom filter.
    ///
    /// `config.filter` is kept for reporting only.
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::Config`] if `parallel` is zero.
    pub fn with_filter(config: CrawlerConfig, filter: impl FileFilter) -> Result<Self, CrawlError> {
        let parallelism = NonZeroUsize::new(config.parallel)
            .ok_or_else(|| ConfigError::invalid_option("parallel", "must be at least 1"))?;

        let stats = Arc::new(CrawlStats::new());
        let walker = TreeWalker::new(
            Arc::new(filter),
            Arc::new(ZipDecoder::new(parallelism.get())),
            Gate::new(parallelism),
            Arc::new(EmissionSink::new(Arc::clone(&stats))),
            stats,
        );

        Ok(Self { config, walker })
    }

    /// Replaces the archive decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: impl ArchiveDecoder) -> Self {
        self.walker = self.walker.with_decoder(Arc::new(decoder));
        self
    }

    /// Returns the configuration this crawler was built from.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &CrawlerConfig {
        &self.config
    }

    /// Registers an observer for every file emitted from now on.
    ///
    /// See [`FileEvent`] for how observers consume streams.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&FileEvent) + Send + Sync + 'static,
    {
        self.walker.sink().subscribe(handler)
    }

    /// Removes an observer. Returns `false` if it wasn't registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.walker.sink().unsubscribe(id)
    }

    /// Crawls a file or directory.
    ///
    /// Relative paths are resolved against the working directory. The
    /// resolution is lexical: `.` and `..` are normalized, symlinks are left
    /// alone, so emitted paths keep the caller's spelling.
    ///
    /// # Errors
    ///
    /// Returns the first error raised anywhere in the crawl, e.g.
    /// [`CrawlError::NotFound`] if `path` doesn't exist.
    pub async fn crawl(&self, path: impl AsRef<Utf8Path>) -> Result<(), CrawlError> {
        let root = resolve(path.as_ref())?;
        info!(
            path = %root,
            parallel = self.config.parallel,
            filter = %self.config.filter,
            "Starting crawl"
        );

        match self.walker.visit(root.clone()).await {
            Ok(()) => {
                let stats = self.stats();
                info!(
                    path = %root,
                    emitted = stats.emitted,
                    filtered = stats.filtered,
                    archives = stats.archives,
                    "Crawl complete"
                );
                Ok(())
            }
            Err(e) => {
                warn!(path = %root, error = %e, "Crawl failed");
                Err(e)
            }
        }
    }

    /// Returns current statistics, cumulative over all crawls.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        let mut snapshot = self.walker.stats().snapshot();
        snapshot.peak_in_flight = self.walker.gate().peak() as u64;
        snapshot
    }
}

/// Makes `path` absolute and lexically normalized.
fn resolve(path: &Utf8Path) -> Result<Utf8PathBuf, CrawlError> {
    let absolute = if path.is_absolute() {
        path.to_owned()
    } else {
        let cwd = std::env::current_dir().map_err(|e| CrawlError::stat(path, e))?;
        let cwd = Utf8PathBuf::from_path_buf(cwd).map_err(CrawlError::NonUtf8Path)?;
        cwd.join(path)
    };

    let mut resolved = Utf8PathBuf::new();
    for component in absolute.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other.as_str()),
        }
    }
    Ok(resolved)
}
