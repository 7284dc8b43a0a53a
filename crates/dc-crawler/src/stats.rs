//! Crawl statistics with atomic counters.
//!
//! This module provides [`CrawlStats`] for counting traversal and emission
//! events and [`StatsSnapshot`] for point-in-time views.
//!
//! # Thread Safety
//!
//! All counters use [`AtomicU64`] with [`Relaxed`](std::sync::atomic::Ordering::Relaxed)
//! ordering. Statistics are informational and never drive control flow.
//!
//! # Examples
//!
//! ```
//! use dc_crawler::CrawlStats;
//!
//! let stats = CrawlStats::new();
//! stats.increment_files();
//! stats.increment_emitted();
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.emitted, 1);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic counters for crawl statistics.
///
/// Shared by every task of a crawler and cumulative across its crawls.
#[derive(Debug, Default)]
pub struct CrawlStats {
    /// Directories listed.
    directories: AtomicU64,
    /// Regular files seen (archives included).
    files: AtomicU64,
    /// Archives expanded.
    archives: AtomicU64,
    /// Non-directory archive entries seen.
    entries: AtomicU64,
    /// Files and entries handed to observers.
    emitted: AtomicU64,
    /// Files and entries rejected by the filter.
    filtered: AtomicU64,
    /// Emitted streams that reached end of data or were discarded.
    completed: AtomicU64,
    /// Emitted streams that failed (read or consumer errors).
    failed: AtomicU64,
    /// Bytes delivered through emitted streams.
    bytes: AtomicU64,
}

impl CrawlStats {
    /// Creates a new [`CrawlStats`] with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the directories counter.
    #[inline]
    pub fn increment_directories(&self) {
        self.directories.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the regular files counter.
    #[inline]
    pub fn increment_files(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the archives counter.
    #[inline]
    pub fn increment_archives(&self) {
        self.archives.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the archive entries counter.
    #[inline]
    pub fn increment_entries(&self) {
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the emitted counter.
    #[inline]
    pub fn increment_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the filtered-out counter.
    #[inline]
    pub fn increment_filtered(&self) {
        self.filtered.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the completed streams counter.
    #[inline]
    pub fn increment_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Increments the failed streams counter.
    #[inline]
    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Adds to the delivered bytes counter.
    #[inline]
    pub fn add_bytes(&self, count: u64) {
        self.bytes.fetch_add(count, Ordering::Relaxed);
    }

    /// Returns a point-in-time snapshot of all statistics.
    ///
    /// `peak_in_flight` is left at zero; the crawler fills it in from its gate.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            directories: self.directories.load(Ordering::Relaxed),
            files: self.files.load(Ordering::Relaxed),
            archives: self.archives.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            emitted: self.emitted.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            peak_in_flight: 0,
        }
    }
}

/// A point-in-time snapshot of crawl statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Directories listed.
    pub directories: u64,
    /// Regular files seen (archives included).
    pub files: u64,
    /// Archives expanded.
    pub archives: u64,
    /// Non-directory archive entries seen.
    pub entries: u64,
    /// Files and entries handed to observers.
    pub emitted: u64,
    /// Files and entries rejected by the filter.
    pub filtered: u64,
    /// Emitted streams that reached end of data or were discarded.
    pub completed: u64,
    /// Emitted streams that failed.
    pub failed: u64,
    /// Bytes delivered through emitted streams.
    pub bytes: u64,
    /// Highest number of emissions in flight at the same time.
    pub peak_in_flight: u64,
}

impl StatsSnapshot {
    /// Returns the number of emitted streams that have not settled yet.
    ///
    /// After a crawl resolves this is zero; a non-zero value on a stalled
    /// crawl counts the streams nobody is consuming.
    ///
    /// # Examples
    ///
    /// ```
    /// use dc_crawler::StatsSnapshot;
    ///
    /// let snap = StatsSnapshot { emitted: 10, completed: 7, failed: 1, ..Default::default() };
    /// assert_eq!(snap.unsettled(), 2);
    /// ```
    #[inline]
    #[must_use]
    pub const fn unsettled(&self) -> u64 {
        self.emitted.saturating_sub(self.completed + self.failed)
    }

    /// Returns the percentage of regular files and entries that were emitted.
    ///
    /// Returns 100.0 if nothing was considered.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Acceptable for statistics display
    pub fn emitted_percent(&self) -> f64 {
        let considered = self.emitted + self.filtered;
        if considered == 0 {
            return 100.0;
        }

        (self.emitted as f64 / considered as f64) * 100.0
    }
}
