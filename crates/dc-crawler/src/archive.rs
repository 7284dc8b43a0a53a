//! Streaming archive decoding.
//!
//! An [`ArchiveDecoder`] turns an archive file into a sequence of
//! [`ArchiveEvent`]s, one per entry in stream order, each entry carrying its
//! own byte reader. [`ZipDecoder`] reads ZIP local headers front to back on
//! the blocking pool and never consults the central directory.
//!
//! Entry bytes flow through a small bounded channel, so the decoder only runs
//! ahead of the consumer by a few chunks. Dropping an [`EntryReader`] skips the
//! rest of its entry.
//!
//! A decoder waiting on a slow consumer parks a blocking-pool thread, and
//! `tokio::fs` shares that pool. [`ZipDecoder`] therefore caps how many
//! archives decode at once; the rest wait for a slot without holding a
//! thread.

use std::io::{self, Read};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use camino::{Utf8Path, Utf8PathBuf};
use dc_core::DEFAULT_PARALLEL;
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, trace};

/// Entry events buffered ahead of the expander.
const EVENT_BUFFER: usize = 4;

/// Data chunks buffered per entry.
const CHUNK_BUFFER: usize = 4;

/// Size of a single data chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Decodes archive files into entry streams.
///
/// # Thread Safety
///
/// Decoders are shared by every task of a crawl and must be [`Send`],
/// [`Sync`] and `'static`.
pub trait ArchiveDecoder: Send + Sync + 'static {
    /// Returns `true` if the file at `path` should be expanded by this decoder.
    fn handles(&self, path: &Utf8Path) -> bool;

    /// Starts decoding the archive at `path`.
    ///
    /// Failures, including failing to open the file, arrive as
    /// [`ArchiveEvent::Error`]. Must be called from within a tokio runtime.
    fn open(&self, path: &Utf8Path) -> ArchiveEvents;
}

/// Events produced while decoding one archive.
#[derive(Debug)]
pub enum ArchiveEvent {
    /// The next entry in stream order.
    Entry(ArchiveEntry),
    /// The archive itself is unreadable; no further events follow.
    Error(io::Error),
}

/// Receiving end of a decoder's event stream.
///
/// Dropping it stops the decoder at the next entry boundary.
#[derive(Debug)]
pub struct ArchiveEvents {
    rx: mpsc::Receiver<ArchiveEvent>,
}

impl ArchiveEvents {
    /// Creates a connected sender and event stream for custom decoders.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<ArchiveEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Waits for the next event. Returns `None` once the archive is exhausted.
    pub async fn next(&mut self) -> Option<ArchiveEvent> {
        self.rx.recv().await
    }
}

/// Kind of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory marker.
    Directory,
    /// A file with content.
    File,
}

/// One entry of an archive.
#[derive(Debug)]
pub struct ArchiveEntry {
    path: Utf8PathBuf,
    kind: EntryKind,
    reader: EntryReader,
}

impl ArchiveEntry {
    /// Creates an entry. Used by decoders.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>, kind: EntryKind, reader: EntryReader) -> Self {
        Self {
            path: path.into(),
            kind,
            reader,
        }
    }

    /// Returns the entry's path inside the archive.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the entry kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Returns `true` for directory markers.
    #[inline]
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Splits the entry into its path and byte reader.
    #[must_use]
    pub fn into_parts(self) -> (Utf8PathBuf, EntryReader) {
        (self.path, self.reader)
    }

    /// Skips the entry's content.
    pub fn drain(self) {
        trace!(path = %self.path, "Draining archive entry");
    }
}

/// Async reader over one entry's bytes.
#[derive(Debug)]
pub struct EntryReader {
    chunks: mpsc::Receiver<io::Result<Vec<u8>>>,
    current: Vec<u8>,
    offset: usize,
}

impl EntryReader {
    /// Creates a connected chunk sender and reader for custom decoders.
    ///
    /// Dropping the sender ends the entry; sending an error fails the read.
    #[must_use]
    pub fn channel(capacity: usize) -> (mpsc::Sender<io::Result<Vec<u8>>>, Self) {
        let (tx, chunks) = mpsc::channel(capacity.max(1));
        (
            tx,
            Self {
                chunks,
                current: Vec::new(),
                offset: 0,
            },
        )
    }

    /// Returns a reader with no content.
    #[must_use]
    pub fn empty() -> Self {
        Self::channel(1).1
    }
}

impl AsyncRead for EntryReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.offset < this.current.len() {
                let available = &this.current[this.offset..];
                let count = available.len().min(buf.remaining());
                buf.put_slice(&available[..count]);
                this.offset += count;
                return Poll::Ready(Ok(()));
            }

            match ready!(this.chunks.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.current = chunk;
                    this.offset = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

/// Decoder for ZIP archives, selected by the `.zip` extension.
///
/// The extension check is case-sensitive and the file signature is never
/// inspected: a `.zip` that isn't a ZIP fails to decode, and a ZIP under any
/// other name is treated as a plain file.
///
/// At most `max_active` archives are read at a time, each on its own
/// blocking-pool thread. Keep it below the runtime's `max_blocking_threads`
/// so filesystem calls always find a free thread.
#[derive(Debug, Clone)]
pub struct ZipDecoder {
    slots: Arc<Semaphore>,
}

impl ZipDecoder {
    /// Creates a decoder reading at most `max_active` archives at once.
    ///
    /// A limit of zero is treated as one.
    #[must_use]
    pub fn new(max_active: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_active.max(1))),
        }
    }

    /// Returns the number of archives that may start decoding right now.
    #[inline]
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

impl Default for ZipDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL)
    }
}

impl ArchiveDecoder for ZipDecoder {
    fn handles(&self, path: &Utf8Path) -> bool {
        path.extension() == Some("zip")
    }

    fn open(&self, path: &Utf8Path) -> ArchiveEvents {
        let (tx, events) = ArchiveEvents::channel(EVENT_BUFFER);
        let path = path.to_owned();
        let slots = Arc::clone(&self.slots);

        tokio::spawn(async move {
            let Ok(permit) = slots.acquire_owned().await else {
                let _ = tx
                    .send(ArchiveEvent::Error(io::Error::other("archive decoder closed")))
                    .await;
                return;
            };
            if tx.is_closed() {
                trace!(path = %path, "Archive abandoned before decoding");
                return;
            }

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                if let Err(e) = read_zip_stream(&path, &tx) {
                    debug!(path = %path, error = %e, "Archive decoding failed");
                    // Nobody is listening anymore if this fails.
                    let _ = tx.blocking_send(ArchiveEvent::Error(e));
                }
            });
        });
        events
    }
}

/// Walks the local headers of a ZIP file, forwarding entries to `events`.
///
/// Returns `Ok` when the entries are exhausted or the receiver is gone.
fn read_zip_stream(path: &Utf8Path, events: &mpsc::Sender<ArchiveEvent>) -> io::Result<()> {
    let mut reader = io::BufReader::new(std::fs::File::open(path)?);

    loop {
        let entry = zip::read::read_zipfile_from_stream(&mut reader)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let Some(mut entry) = entry else {
            trace!(path = %path, "Reached end of archive entries");
            return Ok(());
        };

        let kind = if entry.is_dir() {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        let (chunks, reader_side) = EntryReader::channel(CHUNK_BUFFER);
        let event = ArchiveEvent::Entry(ArchiveEntry::new(entry.name(), kind, reader_side));
        if events.blocking_send(event).is_err() {
            return Ok(());
        }

        if kind == EntryKind::File {
            forward_entry(&mut entry, &chunks)?;
        }
        // Dropping the entry consumes whatever the reader left unread.
    }
}

/// Copies one entry's bytes into its chunk channel.
///
/// Stops early, without error, when the entry's reader has been dropped.
fn forward_entry(entry: &mut impl Read, chunks: &mpsc::Sender<io::Result<Vec<u8>>>) -> io::Result<()> {
    loop {
        let mut chunk = vec![0; CHUNK_SIZE];
        let count = match entry.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(count) => count,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = chunks.blocking_send(Err(io::Error::new(e.kind(), e.to_string())));
                return Err(e);
            }
        };
        chunk.truncate(count);
        if chunks.blocking_send(Ok(chunk)).is_err() {
            return Ok(());
        }
    }
}
