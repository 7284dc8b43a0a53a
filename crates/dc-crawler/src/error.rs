//! Error types for the dc-crawler crate.
//!
//! This module provides the [`CrawlError`] type for every failure a crawl can
//! report through its completion.

use camino::{Utf8Path, Utf8PathBuf};
use dc_core::ConfigError;

/// Boxed error reported by an observer while consuming a stream.
pub type ConsumerFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while crawling.
///
/// There are no retries anywhere in the crawler: the first error raised at any
/// level rejects that level's completion and propagates up to the top-level
/// [`Crawler::crawl`](crate::Crawler::crawl) result.
///
/// # Examples
///
/// ```
/// use dc_crawler::CrawlError;
///
/// fn describe(err: &CrawlError) -> &'static str {
///     match err {
///         CrawlError::NotFound { .. } => "missing path",
///         CrawlError::Stat { .. } => "stat failed",
///         CrawlError::List { .. } => "listing failed",
///         CrawlError::Archive { .. } => "bad archive",
///         CrawlError::Stream { .. } => "read failed",
///         CrawlError::Consumer { .. } => "handler failed",
///         CrawlError::NonUtf8Path(_) => "non UTF-8 path",
///         CrawlError::Config(_) => "bad configuration",
///     }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// The path does not exist.
    #[error("path does not exist: {path}")]
    NotFound {
        /// The missing path.
        path: Utf8PathBuf,
    },

    /// Failed to stat a path for a reason other than it being missing.
    #[error("failed to stat {path}: {source}")]
    Stat {
        /// The path that couldn't be inspected.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to enumerate a directory.
    #[error("failed to list directory {path}: {source}")]
    List {
        /// The directory being listed.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The archive container is malformed or couldn't be read.
    #[error("failed to read archive {path}: {source}")]
    Archive {
        /// The archive file.
        path: Utf8PathBuf,
        /// The underlying decode or I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading an emitted file or archive entry failed.
    #[error("failed to read {path}: {source}")]
    Stream {
        /// The emitted path.
        path: Utf8PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An observer reported a failure while consuming an emitted stream.
    #[error("consumer failed on {path}: {source}")]
    Consumer {
        /// The emitted path.
        path: Utf8PathBuf,
        /// The failure reported by the observer.
        #[source]
        source: ConsumerFailure,
    },

    /// A path is not valid UTF-8.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(std::path::PathBuf),

    /// Invalid crawler configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl CrawlError {
    /// Creates the error for a failed stat, mapping a missing path to
    /// [`CrawlError::NotFound`].
    pub fn stat(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound { path }
        } else {
            Self::Stat { path, source }
        }
    }

    /// Creates a new [`CrawlError::List`] error.
    #[inline]
    pub fn list(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::List {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`CrawlError::Archive`] error.
    #[inline]
    pub fn archive(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`CrawlError::Stream`] error.
    #[inline]
    pub fn stream(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Self::Stream {
            path: path.into(),
            source,
        }
    }

    /// Creates a new [`CrawlError::Consumer`] error.
    #[inline]
    pub fn consumer(path: impl Into<Utf8PathBuf>, source: impl Into<ConsumerFailure>) -> Self {
        Self::Consumer {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Returns `true` if the crawl failed because a path was missing.
    #[inline]
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        match self {
            Self::NotFound { path }
            | Self::Stat { path, .. }
            | Self::List { path, .. }
            | Self::Archive { path, .. }
            | Self::Stream { path, .. }
            | Self::Consumer { path, .. } => Some(path),
            Self::NonUtf8Path(_) | Self::Config(_) => None,
        }
    }
}
