//! Emission of matched files to observers.
//!
//! The [`EmissionSink`] publishes one [`FileEvent`] per matched file or archive
//! entry to every subscribed observer. The event carries a [`FileStream`];
//! the emission's completion settles when that stream is read to end of data,
//! fails while reading, or is explicitly discarded or failed by its consumer.
//!
//! Observers are plain synchronous callbacks. An observer that wants the bytes
//! takes the stream with [`FileEvent::take_stream`] and reads it on a task of
//! its own:
//!
//! ```no_run
//! use dc_crawler::{Crawler, CrawlerConfig};
//! use tokio::io::AsyncReadExt;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), dc_crawler::CrawlError> {
//! let crawler = Crawler::new(CrawlerConfig::default())?;
//! crawler.subscribe(|event| {
//!     if let Some(mut stream) = event.take_stream() {
//!         tokio::spawn(async move {
//!             let mut contents = Vec::new();
//!             if let Err(e) = stream.read_to_end(&mut contents).await {
//!                 eprintln!("{e}");
//!             }
//!         });
//!     }
//! });
//! crawler.crawl("./data").await?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use camino::{Utf8Path, Utf8PathBuf};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use smallvec::SmallVec;
use tokio::io::{AsyncRead, ReadBuf};
use tracing::{debug, warn};

use crate::completion::{self, Completion, Outcome, Settler};
use crate::error::{ConsumerFailure, CrawlError};
use crate::stats::CrawlStats;

/// Byte source behind an emitted stream.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Observer callback invoked once per emitted file.
type Observer = Arc<dyn Fn(&FileEvent) + Send + Sync>;

/// Where an emitted file came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FileOrigin {
    /// A regular file on disk.
    Filesystem,
    /// An entry inside an archive.
    Archive {
        /// The archive file the entry was read from.
        archive: Utf8PathBuf,
    },
}

/// Handle identifying an observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// The byte stream of one emitted file.
///
/// Reading it to end of data resolves the emission; a read error rejects it
/// with [`CrawlError::Stream`]. Consumers that don't need the bytes call
/// [`discard`](Self::discard); consumers that fail call [`fail`](Self::fail).
/// Dropping the stream before any of these leaves the emission, and with it
/// the whole crawl, unsettled.
pub struct FileStream {
    path: Utf8PathBuf,
    reader: ByteStream,
    settler: Option<Settler>,
    stats: Arc<CrawlStats>,
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStream")
            .field("path", &self.path)
            .field("settled", &self.settler.is_none())
            .finish_non_exhaustive()
    }
}

impl FileStream {
    /// Returns the emitted path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Skips the rest of the stream and resolves the emission.
    pub fn discard(mut self) {
        self.finish(Ok(()));
    }

    /// Rejects the emission with a consumer failure.
    pub fn fail(mut self, error: impl Into<ConsumerFailure>) {
        let error = CrawlError::consumer(self.path.clone(), error);
        self.finish(Err(error));
    }

    /// Settles the emission once; later calls are no-ops.
    fn finish(&mut self, outcome: Outcome) {
        let Some(settler) = self.settler.take() else {
            return;
        };
        match &outcome {
            Ok(()) => self.stats.increment_completed(),
            Err(_) => self.stats.increment_failed(),
        }
        debug!(path = %self.path, ok = outcome.is_ok(), "Emission settled");
        settler.settle(outcome);
    }

    /// Drops the stream without settling and without the drop warning.
    fn abandon(mut self) {
        drop(self.settler.take());
    }
}

impl AsyncRead for FileStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let capacity = buf.remaining();

        match this.reader.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = buf.filled().len() - before;
                if read > 0 {
                    this.stats.add_bytes(read as u64);
                } else if capacity > 0 {
                    this.finish(Ok(()));
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                let cause = io::Error::new(e.kind(), e.to_string());
                let path = this.path.clone();
                this.finish(Err(CrawlError::stream(path, cause)));
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for FileStream {
    fn drop(&mut self) {
        if self.settler.is_some() {
            warn!(
                path = %self.path,
                "Stream dropped before end of data, crawl will not settle"
            );
        }
    }
}

/// Notification published for every emitted file.
#[derive(Debug)]
pub struct FileEvent {
    path: Utf8PathBuf,
    origin: FileOrigin,
    stream: Mutex<Option<FileStream>>,
}

impl FileEvent {
    /// Returns the emitted path.
    ///
    /// Absolute for files on disk, the in-archive path for archive entries.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns where the file came from.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> &FileOrigin {
        &self.origin
    }

    /// Takes the byte stream. Only the first caller gets it.
    pub fn take_stream(&self) -> Option<FileStream> {
        self.stream.lock().take()
    }
}

/// Observer registry and fan-out point for emitted files.
pub struct EmissionSink {
    observers: RwLock<SmallVec<[(SubscriptionId, Observer); 4]>>,
    next_id: AtomicU64,
    stats: Arc<CrawlStats>,
}

impl std::fmt::Debug for EmissionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmissionSink")
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}

impl EmissionSink {
    /// Creates a sink with no observers, counting into `stats`.
    #[must_use]
    pub fn new(stats: Arc<CrawlStats>) -> Self {
        Self {
            observers: RwLock::new(SmallVec::new()),
            next_id: AtomicU64::new(0),
            stats,
        }
    }

    /// Registers an observer for every subsequent emission.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&FileEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(handler)));
        id
    }

    /// Removes an observer. Returns `false` if it wasn't registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        observers.len() != before
    }

    #[cfg(test)]
    fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Publishes a file to the current observers.
    ///
    /// The returned completion resolves when the stream is read to end of data
    /// or discarded and rejects on a read or consumer failure. Observers are
    /// invoked synchronously, in registration order, before this returns.
    pub fn emit(&self, path: Utf8PathBuf, origin: FileOrigin, reader: ByteStream) -> Completion {
        let (settler, completion) = completion::pair();
        self.stats.increment_emitted();

        let stream = FileStream {
            path: path.clone(),
            reader,
            settler: Some(settler),
            stats: Arc::clone(&self.stats),
        };
        let event = FileEvent {
            path,
            origin,
            stream: Mutex::new(Some(stream)),
        };

        let observers: SmallVec<[Observer; 4]> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        debug!(path = %event.path, observers = observers.len(), "Emitting file");
        for observer in &observers {
            observer(&event);
        }

        if let Some(untaken) = event.take_stream() {
            warn!(
                path = %event.path,
                observers = observers.len(),
                "No observer took the stream, crawl will not settle"
            );
            untaken.abandon();
        }

        completion
    }
}
