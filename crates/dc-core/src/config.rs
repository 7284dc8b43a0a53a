//! Configuration structures for the dircrawl workspace.
//!
//! [`CrawlerConfig`] controls a single crawler instance: how many files may be
//! in flight at once and which paths are emitted. It implements [`Default`]
//! and deserializes with per-field defaults, so a partial JSON file is enough.

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of files processed concurrently.
pub const DEFAULT_PARALLEL: usize = 5;

/// Default filter pattern (every non-hidden file).
pub const DEFAULT_FILTER: &str = "*";

/// Configuration for a crawler instance.
///
/// Immutable for the lifetime of the crawler built from it.
///
/// # Examples
///
/// ```
/// use dc_core::CrawlerConfig;
///
/// let config = CrawlerConfig::default();
/// assert_eq!(config.parallel, 5);
/// assert_eq!(config.filter, "*");
///
/// let config = CrawlerConfig::default().with_parallel(2).with_filter("*.txt");
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum number of files whose streams may be in flight at once.
    ///
    /// Must be at least 1.
    pub parallel: usize,

    /// Glob pattern selecting which files are emitted.
    ///
    /// Patterns without a `/` match against the file name alone.
    pub filter: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            parallel: DEFAULT_PARALLEL,
            filter: DEFAULT_FILTER.to_owned(),
        }
    }
}

impl CrawlerConfig {
    /// Sets the parallelism bound.
    #[must_use]
    pub const fn with_parallel(mut self, parallel: usize) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the filter pattern.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Checks option values that can be validated without compiling the filter.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] if `parallel` is zero or the
    /// filter pattern is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 {
            return Err(ConfigError::invalid_option(
                "parallel",
                "must be at least 1",
            ));
        }
        if self.filter.is_empty() {
            return Err(ConfigError::invalid_option("filter", "must not be empty"));
        }
        Ok(())
    }

    /// Loads a configuration from a JSON file.
    ///
    /// Missing fields take their default values. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file can't be read,
    /// [`ConfigError::Parse`] if it isn't valid JSON, and
    /// [`ConfigError::InvalidOption`] if a value is out of range.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}
