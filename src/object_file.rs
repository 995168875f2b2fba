// src/object_file.rs
//
//! File-shaped access to a single remote object.
//!
//! One [`ObjectFile`] is either a range reader (`reader`) or a write bridge
//! (`writer`), never both. The reader keeps a virtual cursor and turns each
//! `read` into one ranged GET; the writer feeds a background upload task
//! through a one-slot byte channel so every `write` backpressures on the
//! store's own consumption rate.
//!
//! The inherent `*_async` methods are the primary surface; the
//! `std::io::{Read, Write, Seek}` impls bridge them onto the shared runtime
//! for blocking consumers such as columnar file writers.

use std::io;
use std::sync::Arc;

use anyhow::anyhow;
use bytes::Bytes;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::WRITE_PIPE_CAPACITY;
use crate::object_store::{ObjectBody, ObjectStore};
use crate::s3_client::{block_on_file, global_rt_handle};

/// Seek relative to the start of the object.
pub const SEEK_START: i32 = 0;
/// Seek relative to the current cursor.
pub const SEEK_CURRENT: i32 = 1;
/// Seek relative to the end of the object.
pub const SEEK_END: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Unopened,
    Read,
    Write,
}

/// Errors surfaced by [`ObjectFile`] operations.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("file is not open for reading")]
    NotReadable,

    #[error("file is not open for writing")]
    NotWritable,

    #[error("seek: invalid whence {0}")]
    InvalidWhence(i32),

    #[error("seek: offset {0} out of range")]
    InvalidOffset(i64),

    #[error("store reported invalid object size {0}")]
    InvalidSize(i64),

    #[error("operation cancelled")]
    Cancelled,

    /// Terminal write-path error. Sticky: once recorded, every later `write`
    /// returns a clone of the same underlying error.
    #[error("upload failed: {0}")]
    Upload(Arc<anyhow::Error>),

    /// Per-call read-path store failure; does not poison the handle.
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl From<FileError> for io::Error {
    fn from(err: FileError) -> io::Error {
        let kind = match &err {
            FileError::NotReadable | FileError::NotWritable => io::ErrorKind::Unsupported,
            FileError::InvalidWhence(_) | FileError::InvalidOffset(_) => {
                io::ErrorKind::InvalidInput
            }
            FileError::InvalidSize(_) => io::ErrorKind::InvalidData,
            FileError::Cancelled => io::ErrorKind::Interrupted,
            FileError::Upload(_) => io::ErrorKind::BrokenPipe,
            FileError::Transport(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// File handle over one remote object, open for either reading or writing.
///
/// Not for concurrent use: operations take `&mut self` and callers serialize
/// externally. The only internal synchronization is the pipe hand-off and
/// the one-shot join on the upload task.
pub struct ObjectFile {
    store: Arc<dyn ObjectStore>,
    key: String,
    cancel: CancellationToken,
    mode: Mode,

    // read state
    size: u64,
    cursor: u64,

    // write state
    pipe: Option<mpsc::Sender<Bytes>>,
    upload: Option<JoinHandle<anyhow::Result<()>>>,
    pending: Option<Arc<anyhow::Error>>,
}

impl ObjectFile {
    fn unopened(store: Arc<dyn ObjectStore>, cancel: Option<CancellationToken>) -> Self {
        Self {
            store,
            key: String::new(),
            cancel: cancel.unwrap_or_default(),
            mode: Mode::Unopened,
            size: 0,
            cursor: 0,
            pipe: None,
            upload: None,
            pending: None,
        }
    }

    /// Open `key` for random-access reads. One metadata lookup establishes
    /// the object length for the handle's lifetime.
    pub async fn reader_async(
        store: Arc<dyn ObjectStore>,
        key: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<Self, FileError> {
        Self::unopened(store, cancel).open_async(key).await
    }

    /// Blocking variant of [`ObjectFile::reader_async`].
    pub fn reader(
        store: Arc<dyn ObjectStore>,
        key: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<Self, FileError> {
        block_on_file(Self::reader_async(store, key, cancel))
    }

    /// Open `key` (or this handle's own key when `key` is empty) for reading.
    ///
    /// A handle that already has the same key open for reading hands its
    /// cached size to the new handle and skips the metadata round trip;
    /// columnar readers clone a handle per column this way. Every other
    /// combination performs the lookup.
    pub async fn open_async(&self, key: &str) -> Result<Self, FileError> {
        let key = if key.is_empty() { self.key.as_str() } else { key };

        let size = if self.mode == Mode::Read && key == self.key {
            self.size
        } else {
            let reported = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(FileError::Cancelled),
                res = self.store.head(key) => res?,
            };
            if reported < 0 {
                return Err(FileError::InvalidSize(reported));
            }
            reported as u64
        };

        debug!("opened {} for reading ({} bytes)", key, size);

        Ok(Self {
            store: Arc::clone(&self.store),
            key: key.to_string(),
            cancel: self.cancel.clone(),
            mode: Mode::Read,
            size,
            cursor: 0,
            pipe: None,
            upload: None,
            pending: None,
        })
    }

    /// Blocking variant of [`ObjectFile::open_async`].
    pub fn open(&self, key: &str) -> Result<Self, FileError> {
        block_on_file(self.open_async(key))
    }

    /// Create `key` for sequential writes. The upload task starts
    /// immediately and runs concurrently with subsequent `write` calls,
    /// pulling chunks out of the pipe as the store consumes them.
    pub fn writer(
        store: Arc<dyn ObjectStore>,
        key: &str,
        cancel: Option<CancellationToken>,
    ) -> Result<Self, FileError> {
        let mut file = Self::unopened(store, cancel);
        file.key = key.to_string();
        file.mode = Mode::Write;

        let (tx, rx) = mpsc::channel::<Bytes>(WRITE_PIPE_CAPACITY);
        let body: ObjectBody = Box::pin(ReceiverStream::new(rx).map(Ok));

        let task_store = Arc::clone(&file.store);
        let task_key = file.key.clone();
        let task_cancel = file.cancel.clone();
        let task = global_rt_handle().spawn(async move {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => Err(anyhow!("upload of {} cancelled", task_key)),
                res = task_store.put(&task_key, body) => res,
            }
        });

        debug!("created {} for writing", file.key);
        file.pipe = Some(tx);
        file.upload = Some(task);
        Ok(file)
    }

    /// Object key this handle addresses.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Object length in bytes, as established at open time. Zero for
    /// write-mode handles.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Resolve `offset` against `whence` (0 start, 1 current, 2 end) and
    /// move the cursor. Returns the new absolute offset.
    pub fn seek_to(&mut self, offset: i64, whence: i32) -> Result<u64, FileError> {
        if self.mode != Mode::Read {
            return Err(FileError::NotReadable);
        }
        if !(SEEK_START..=SEEK_END).contains(&whence) {
            return Err(FileError::InvalidWhence(whence));
        }

        let base: i64 = match whence {
            SEEK_CURRENT => self.cursor as i64,
            SEEK_END => self.size as i64,
            _ => 0,
        };
        let resolved = match base.checked_add(offset) {
            Some(v) => v,
            None => return Err(FileError::InvalidOffset(offset)),
        };
        if resolved < 0 || resolved as u64 > self.size {
            return Err(FileError::InvalidOffset(resolved));
        }

        self.cursor = resolved as u64;
        Ok(self.cursor)
    }

    /// Read at the cursor into `buf`. `Ok(0)` means end of stream (or an
    /// empty destination buffer); neither case contacts the store. The
    /// range request is clamped to the object tail, and the cursor advances
    /// only on success.
    pub async fn read_async(&mut self, buf: &mut [u8]) -> Result<usize, FileError> {
        if self.mode != Mode::Read {
            return Err(FileError::NotReadable);
        }
        if self.cursor >= self.size {
            return Ok(0);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let start = self.cursor;
        let end = (start + buf.len() as u64 - 1).min(self.size - 1);
        let n = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FileError::Cancelled),
            res = fill_from_range(self.store.as_ref(), &self.key, start, end, buf) => res?,
        };

        self.cursor += n as u64;
        Ok(n)
    }

    /// Write `buf` into the upload pipe. Suspends until the background task
    /// has drained the previously buffered chunk into the in-flight upload.
    pub async fn write_async(&mut self, buf: &[u8]) -> Result<usize, FileError> {
        if self.mode != Mode::Write {
            return Err(FileError::NotWritable);
        }
        if let Some(err) = &self.pending {
            return Err(FileError::Upload(Arc::clone(err)));
        }
        let Some(pipe) = &self.pipe else {
            return Err(FileError::NotWritable);
        };

        let payload = Bytes::copy_from_slice(buf);
        let sent = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FileError::Cancelled),
            res = pipe.send(payload) => res,
        };
        match sent {
            Ok(()) => Ok(buf.len()),
            Err(_) => {
                // Receiver gone: the upload task terminated. Its terminal
                // error is the one callers need to see, and it stays sticky.
                let cause = Arc::new(self.harvest_upload_result().await);
                self.pending = Some(Arc::clone(&cause));
                Err(FileError::Upload(cause))
            }
        }
    }

    /// Signal end-of-input and wait for the upload to finish. For read-mode
    /// handles this is a no-op. A second call returns the sticky error (or
    /// `Ok`) without waiting again.
    pub async fn close_async(&mut self) -> Result<(), FileError> {
        // Dropping the sender is what lets the store observe end-of-input.
        drop(self.pipe.take());

        let Some(task) = self.upload.take() else {
            return match &self.pending {
                Some(err) => Err(FileError::Upload(Arc::clone(err))),
                None => Ok(()),
            };
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(FileError::Cancelled),
            res = task => res,
        };
        match outcome {
            Ok(Ok(())) => match &self.pending {
                Some(err) => Err(FileError::Upload(Arc::clone(err))),
                None => {
                    debug!("closed {} after upload completion", self.key);
                    Ok(())
                }
            },
            Ok(Err(e)) => {
                let cause = Arc::new(e);
                self.pending = Some(Arc::clone(&cause));
                Err(FileError::Upload(cause))
            }
            Err(join) => {
                let cause = Arc::new(anyhow::Error::new(join).context("upload task aborted"));
                self.pending = Some(Arc::clone(&cause));
                Err(FileError::Upload(cause))
            }
        }
    }

    /// Blocking variant of [`ObjectFile::close_async`].
    pub fn close(&mut self) -> Result<(), FileError> {
        block_on_file(self.close_async())
    }

    // Await the upload task and normalize its outcome into the error that
    // explains why the pipe rejected data.
    async fn harvest_upload_result(&mut self) -> anyhow::Error {
        match self.upload.take() {
            Some(task) => match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => anyhow!("upload finished before the pipe was closed"),
                Err(join) => anyhow::Error::new(join).context("upload task aborted"),
            },
            None => anyhow!("upload already terminated"),
        }
    }
}

impl Drop for ObjectFile {
    fn drop(&mut self) {
        // An unfinished writer must not commit a truncated object.
        if let Some(task) = self.upload.take() {
            warn!("dropping {} with an unfinished upload; aborting", self.key);
            task.abort();
        }
    }
}

/// Issue one ranged GET and drain it into `buf`, stopping when the buffer is
/// full or the range stream ends. A store that returns more bytes than the
/// requested window has the excess discarded. The cursor is the caller's
/// concern.
async fn fill_from_range(
    store: &dyn ObjectStore,
    key: &str,
    start: u64,
    end: u64,
    buf: &mut [u8],
) -> Result<usize, FileError> {
    debug!("ranged read of {} [{}, {}]", key, start, end);
    let mut chunks = store.get_range(key, start, end).await?;

    let mut filled = 0usize;
    while filled < buf.len() {
        match chunks.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(buf.len() - filled);
                buf[filled..filled + take].copy_from_slice(&chunk[..take]);
                filled += take;
            }
            Some(Err(e)) => return Err(FileError::Transport(e)),
            None => break,
        }
    }
    Ok(filled)
}

// -----------------------------------------------------------------------------
// Blocking std::io surface
// -----------------------------------------------------------------------------

impl io::Read for ObjectFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        block_on_file(self.read_async(buf)).map_err(io::Error::from)
    }
}

impl io::Write for ObjectFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        block_on_file(self.write_async(buf)).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        // The pipe holds at most one chunk and the upload task drains it
        // without prompting; there is no buffered state to force out.
        Ok(())
    }
}

impl io::Seek for ObjectFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let (offset, whence) = match pos {
            io::SeekFrom::Start(n) => {
                let n = i64::try_from(n).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "seek offset overflows")
                })?;
                (n, SEEK_START)
            }
            io::SeekFrom::Current(n) => (n, SEEK_CURRENT),
            io::SeekFrom::End(n) => (n, SEEK_END),
        };
        self.seek_to(offset, whence).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::ObjectDataStream;
    use async_trait::async_trait;

    struct FixedSizeStore(i64);

    #[async_trait]
    impl ObjectStore for FixedSizeStore {
        async fn head(&self, _key: &str) -> anyhow::Result<i64> {
            Ok(self.0)
        }

        async fn get_range(
            &self,
            _key: &str,
            _start: u64,
            _end: u64,
        ) -> anyhow::Result<ObjectDataStream> {
            let empty: ObjectDataStream = Box::pin(futures::stream::empty());
            Ok(empty)
        }

        async fn put(&self, _key: &str, _body: ObjectBody) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn reader_with_size(size: i64) -> ObjectFile {
        ObjectFile::reader_async(Arc::new(FixedSizeStore(size)), "obj", None)
            .await
            .expect("open reader")
    }

    #[tokio::test]
    async fn seek_resolves_against_each_origin() {
        let mut file = reader_with_size(11).await;
        assert_eq!(file.seek_to(0, SEEK_START).unwrap(), 0);
        assert_eq!(file.seek_to(5, SEEK_START).unwrap(), 5);
        assert_eq!(file.seek_to(3, SEEK_CURRENT).unwrap(), 8);
        assert_eq!(file.seek_to(-2, SEEK_CURRENT).unwrap(), 6);
        assert_eq!(file.seek_to(0, SEEK_END).unwrap(), 11);
        assert_eq!(file.seek_to(-11, SEEK_END).unwrap(), 0);
    }

    #[tokio::test]
    async fn seek_rejects_unknown_whence() {
        let mut file = reader_with_size(11).await;
        assert!(matches!(file.seek_to(0, 3), Err(FileError::InvalidWhence(3))));
        assert!(matches!(file.seek_to(0, -1), Err(FileError::InvalidWhence(-1))));
    }

    #[tokio::test]
    async fn seek_rejects_out_of_range_offsets() {
        let mut file = reader_with_size(11).await;
        assert!(matches!(file.seek_to(12, SEEK_START), Err(FileError::InvalidOffset(12))));
        assert!(matches!(file.seek_to(-1, SEEK_START), Err(FileError::InvalidOffset(-1))));
        assert!(matches!(file.seek_to(1, SEEK_END), Err(FileError::InvalidOffset(12))));
        // A failed seek leaves the cursor alone.
        assert_eq!(file.seek_to(0, SEEK_CURRENT).unwrap(), 0);
    }

    #[tokio::test]
    async fn open_rejects_negative_reported_size() {
        let result = ObjectFile::reader_async(Arc::new(FixedSizeStore(-1)), "obj", None).await;
        assert!(matches!(result, Err(FileError::InvalidSize(-1))));
    }

    #[tokio::test]
    async fn operations_require_the_matching_mode() {
        let mut reader = reader_with_size(11).await;
        assert!(matches!(reader.write_async(b"nope").await, Err(FileError::NotWritable)));

        let mut writer =
            ObjectFile::writer(Arc::new(FixedSizeStore(0)), "obj", None).expect("create writer");
        assert!(matches!(writer.seek_to(0, SEEK_START), Err(FileError::NotReadable)));
        let mut buf = [0u8; 4];
        assert!(matches!(writer.read_async(&mut buf).await, Err(FileError::NotReadable)));
        let _ = writer.close_async().await;
    }
}
