//! Path filtering for emitted files.
//!
//! This module provides the [`FileFilter`] trait and the glob-based
//! [`GlobFilter`] the crawler builds from its configured pattern. The same
//! predicate decides inclusion for plain files (matched on their absolute
//! path) and archive entries (matched on their path inside the archive).
//!
//! # Matching rules
//!
//! - `*` and `?` never match `/` (`literal_separator`), `**` spans directories.
//! - A pattern without `/` is matched against the file name, so `*.txt`
//!   selects text files at any depth.
//! - A pattern containing `/` is matched against the whole path.
//! - Path segments starting with `.` only match patterns that start with `.`
//!   or contain `/.`; the default `*` skips dot-files.
//!
//! # Examples
//!
//! ```
//! use dc_crawler::{FileFilter, GlobFilter};
//! use camino::Utf8Path;
//!
//! let filter = GlobFilter::new("*.txt")?;
//!
//! assert!(filter.should_process(Utf8Path::new("/srv/data/notes.txt")));
//! assert!(filter.should_process(Utf8Path::new("docs/readme.txt")));
//! assert!(!filter.should_process(Utf8Path::new("/srv/data/image.png")));
//! assert!(!filter.should_process(Utf8Path::new("/srv/data/.hidden.txt")));
//! # Ok::<(), dc_core::ConfigError>(())
//! ```

use camino::{Utf8Component, Utf8Path};
use dc_core::ConfigError;
use globset::{GlobBuilder, GlobMatcher};

/// A predicate deciding which files are emitted.
///
/// # Thread Safety
///
/// Filters must be [`Send`] and [`Sync`] because they are shared by every
/// task of a crawl. They must also be `'static`.
///
/// # Examples
///
/// ```
/// use dc_crawler::FileFilter;
/// use camino::Utf8Path;
///
/// struct LargeLogs;
///
/// impl FileFilter for LargeLogs {
///     fn should_process(&self, path: &Utf8Path) -> bool {
///         path.extension() == Some("log")
///     }
/// }
/// ```
pub trait FileFilter: Send + Sync + 'static {
    /// Returns `true` if the file at the given path should be emitted.
    fn should_process(&self, path: &Utf8Path) -> bool;
}

/// A filter that accepts all files, dot-files included.
///
/// # Examples
///
/// ```
/// use dc_crawler::{FileFilter, AcceptAllFilter};
/// use camino::Utf8Path;
///
/// let filter = AcceptAllFilter;
/// assert!(filter.should_process(Utf8Path::new(".env")));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllFilter;

impl FileFilter for AcceptAllFilter {
    #[inline]
    fn should_process(&self, _path: &Utf8Path) -> bool {
        true
    }
}

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobFilter {
    /// The pattern as configured.
    pattern: String,

    /// Compiled matcher.
    matcher: GlobMatcher,

    /// Whether the pattern is matched against the file name.
    match_base: bool,

    /// Whether dot-prefixed segments may match.
    match_dot: bool,
}

impl GlobFilter {
    /// Compiles a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] for the `filter` option if the
    /// pattern is empty or isn't a valid glob.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        if pattern.is_empty() {
            return Err(ConfigError::invalid_option("filter", "must not be empty"));
        }

        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .backslash_escape(true)
            .build()
            .map_err(|e| ConfigError::invalid_option("filter", e.to_string()))?
            .compile_matcher();

        Ok(Self {
            pattern: pattern.to_owned(),
            matcher,
            match_base: !pattern.contains('/'),
            match_dot: pattern.starts_with('.') || pattern.contains("/."),
        })
    }

    /// Returns the pattern this filter was compiled from.
    #[inline]
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Checks the dot-file rule against the segments the pattern applies to.
    fn passes_dot_rule(&self, path: &Utf8Path) -> bool {
        if self.match_dot {
            return true;
        }
        if self.match_base {
            return !path.file_name().is_some_and(|name| name.starts_with('.'));
        }
        !path.components().any(|component| match component {
            Utf8Component::Normal(segment) => segment.starts_with('.'),
            _ => false,
        })
    }
}

impl FileFilter for GlobFilter {
    fn should_process(&self, path: &Utf8Path) -> bool {
        if !self.passes_dot_rule(path) {
            return false;
        }

        if self.matcher.is_match(path.as_str()) {
            return true;
        }

        self.match_base
            && path
                .file_name()
                .is_some_and(|name| self.matcher.is_match(name))
    }
}

/// Matches a single path against a pattern.
///
/// Convenience for one-off checks; the crawler compiles its pattern once with
/// [`GlobFilter::new`].
///
/// # Errors
///
/// Returns [`ConfigError::InvalidOption`] if the pattern is invalid.
///
/// # Examples
///
/// ```
/// use dc_crawler::filter::matches;
/// use camino::Utf8Path;
///
/// assert!(matches(Utf8Path::new("/a/b/three.txt"), "three.txt")?);
/// assert!(!matches(Utf8Path::new("/a/b/two.txt"), "three.txt")?);
/// # Ok::<(), dc_core::ConfigError>(())
/// ```
pub fn matches(path: &Utf8Path, pattern: &str) -> Result<bool, ConfigError> {
    Ok(GlobFilter::new(pattern)?.should_process(path))
}

// Implement FileFilter for boxed filters
impl<F: FileFilter + ?Sized> FileFilter for Box<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}

// Implement FileFilter for Arc-wrapped filters (useful for shared filters)
impl<F: FileFilter + ?Sized> FileFilter for std::sync::Arc<F> {
    fn should_process(&self, path: &Utf8Path) -> bool {
        (**self).should_process(path)
    }
}
