//! Recursive traversal of directories, files and archives.
//!
//! [`TreeWalker::visit`] classifies a path and returns a future that settles
//! once everything beneath it has been emitted and consumed:
//!
//! - directories are listed once and their children visited and joined,
//! - archives are expanded entry by entry,
//! - matching plain files are queued on the gate for emission,
//! - everything else resolves immediately.
//!
//! Symlinks are followed. Link cycles are not detected.

use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use tracing::{debug, trace};

use crate::archive::{ArchiveDecoder, ArchiveEntry, ArchiveEvent};
use crate::completion::{self, Completion, Outcome};
use crate::error::CrawlError;
use crate::filter::FileFilter;
use crate::gate::Gate;
use crate::sink::{EmissionSink, FileOrigin};
use crate::stats::CrawlStats;

/// Walks a tree and feeds matched files through the gate to the sink.
///
/// Cloning is cheap; clones share the filter, decoder, gate, sink and
/// statistics.
#[derive(Clone)]
pub struct TreeWalker {
    filter: Arc<dyn FileFilter>,
    decoder: Arc<dyn ArchiveDecoder>,
    gate: Gate,
    sink: Arc<EmissionSink>,
    stats: Arc<CrawlStats>,
}

impl std::fmt::Debug for TreeWalker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWalker")
            .field("gate", &self.gate)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

impl TreeWalker {
    /// Creates a walker from its collaborators.
    #[must_use]
    pub fn new(
        filter: Arc<dyn FileFilter>,
        decoder: Arc<dyn ArchiveDecoder>,
        gate: Gate,
        sink: Arc<EmissionSink>,
        stats: Arc<CrawlStats>,
    ) -> Self {
        Self {
            filter,
            decoder,
            gate,
            sink,
            stats,
        }
    }

    /// Replaces the archive decoder.
    #[must_use]
    pub fn with_decoder(mut self, decoder: Arc<dyn ArchiveDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Returns the gate emissions are queued on.
    #[inline]
    #[must_use]
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Returns the sink emissions are published to.
    #[inline]
    #[must_use]
    pub fn sink(&self) -> &EmissionSink {
        &self.sink
    }

    /// Returns the shared statistics counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    /// Visits a path and everything beneath it.
    ///
    /// Nothing happens until the returned future is polled. It resolves once
    /// every matched file below `path` has been emitted and consumed, and
    /// rejects with the first failure.
    pub fn visit(&self, path: Utf8PathBuf) -> BoxFuture<'static, Outcome> {
        Box::pin(self.clone().visit_path(path))
    }

    async fn visit_path(self, path: Utf8PathBuf) -> Outcome {
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => return Err(CrawlError::stat(path, e)),
        };

        if metadata.is_dir() {
            self.walk_directory(path).await
        } else if metadata.is_file() {
            self.visit_file(path).await
        } else {
            trace!(path = %path, "Skipping special file");
            Ok(())
        }
    }

    async fn walk_directory(self, dir: Utf8PathBuf) -> Outcome {
        self.stats.increment_directories();

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| CrawlError::list(dir.clone(), e))?;

        let mut children = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CrawlError::list(dir.clone(), e))?
        {
            let child = Utf8PathBuf::from_path_buf(entry.path()).map_err(CrawlError::NonUtf8Path)?;
            children.push(self.visit(child));
        }

        debug!(path = %dir, children = children.len(), "Listed directory");
        completion::join_all(children).await
    }

    async fn visit_file(self, path: Utf8PathBuf) -> Outcome {
        self.stats.increment_files();

        if self.decoder.handles(&path) {
            return self.expand(path).await;
        }

        if !self.filter.should_process(&path) {
            self.stats.increment_filtered();
            trace!(path = %path, "Filtered out");
            return Ok(());
        }

        let sink = Arc::clone(&self.sink);
        self.gate.submit(move || emit_file(sink, path)).await
    }

    /// Expands an archive, emitting its matching entries.
    ///
    /// Resolves once the archive is exhausted and every emitted entry has
    /// settled. An archive failure rejects immediately, as does the first
    /// entry failure; entries already in flight keep running either way.
    async fn expand(self, archive: Utf8PathBuf) -> Outcome {
        self.stats.increment_archives();
        debug!(path = %archive, "Expanding archive");

        let mut events = self.decoder.open(&archive);
        let mut in_flight: FuturesUnordered<Completion> = FuturesUnordered::new();
        let mut exhausted = false;

        loop {
            tokio::select! {
                event = events.next(), if !exhausted => match event {
                    Some(ArchiveEvent::Entry(entry)) => {
                        if let Some(emission) = self.expand_entry(&archive, entry) {
                            in_flight.push(emission);
                        }
                    }
                    Some(ArchiveEvent::Error(e)) => return Err(CrawlError::archive(archive, e)),
                    None => exhausted = true,
                },
                Some(outcome) = in_flight.next(), if !in_flight.is_empty() => outcome?,
                else => break,
            }
        }

        debug!(path = %archive, "Archive exhausted");
        Ok(())
    }

    /// Queues one archive entry for emission, or drains it.
    fn expand_entry(&self, archive: &Utf8Path, entry: ArchiveEntry) -> Option<Completion> {
        if entry.is_dir() {
            entry.drain();
            return None;
        }

        self.stats.increment_entries();
        if !self.filter.should_process(entry.path()) {
            self.stats.increment_filtered();
            entry.drain();
            return None;
        }

        let sink = Arc::clone(&self.sink);
        let origin = FileOrigin::Archive {
            archive: archive.to_owned(),
        };
        let (path, reader) = entry.into_parts();
        Some(
            self.gate
                .submit(move || sink.emit(path, origin, Box::pin(reader))),
        )
    }
}

/// Opens a plain file and emits it. Runs once the gate admits it.
async fn emit_file(sink: Arc<EmissionSink>, path: Utf8PathBuf) -> Outcome {
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| CrawlError::stream(path.clone(), e))?;
    sink.emit(path, FileOrigin::Filesystem, Box::pin(file)).await
}
