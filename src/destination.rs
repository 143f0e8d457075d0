//! Destinations of downloaded data, written part by part.
use crate::source::PartNumber;

use std::collections::HashMap;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeekExt as _, AsyncWrite};

/// A window of the destination that one part writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPart {
    pub part_number: PartNumber,
    /// Offset of the window within the object.
    pub offset: u64,
    pub size: u64,
    /// Bytes at the start of the window already written by an earlier
    /// attempt.
    pub have_written: u64,
}

impl DestinationPart {
    /// Bytes left to fetch for this part.
    pub fn remaining(&self) -> u64 {
        self.size - self.have_written
    }

    pub fn is_complete(&self) -> bool {
        self.have_written >= self.size
    }
}

/// Partition `[0, total_size)` into parts of `part_size` bytes.
///
/// `written` maps a part's offset to the bytes an earlier attempt already
/// wrote there. Entries that do not line up with a part are ignored.
pub fn partition(
    total_size: u64,
    part_size: u64,
    written: &HashMap<u64, u64>,
) -> Vec<DestinationPart> {
    let part_size = part_size.max(1);
    let mut parts = Vec::new();
    let mut part_number = PartNumber::default();
    let mut offset = 0;
    while offset < total_size {
        let size = part_size.min(total_size - offset);
        let have_written = written.get(&offset).copied().unwrap_or(0).min(size);
        parts.push(DestinationPart {
            part_number: part_number.increment(),
            offset,
            size,
            have_written,
        });
        offset += size;
    }
    parts
}

/// Somewhere downloaded bytes go.
///
/// Writers returned by [`writer`](Destination::writer) are independent, so
/// parts over disjoint windows can be written concurrently.
pub trait Destination: Send + Sync {
    type Writer: AsyncWrite + Unpin + Send;
    type Reader: AsyncRead + Unpin + Send;

    /// Stable identity of the destination for resumption, or `None` if
    /// downloads to it cannot be resumed.
    fn destination_key(&self) -> Option<String>;

    /// Get ready to receive `total_size` bytes (unknown for streamed
    /// downloads).
    ///
    /// With `resuming` set, previously written content should be kept.
    /// Returns whether it was: `false` means earlier progress is gone and
    /// every part must be fetched in full.
    fn prepare(
        &self,
        total_size: Option<u64>,
        resuming: bool,
    ) -> impl Future<Output = io::Result<bool>> + Send;

    /// A writer positioned at `offset`.
    fn writer(&self, offset: u64) -> impl Future<Output = io::Result<Self::Writer>> + Send;

    /// Read back what was written, from the start.
    fn reader(&self) -> impl Future<Output = io::Result<Self::Reader>> + Send;

    /// Cut the destination into parts, honoring earlier partial writes.
    fn slice(
        &self,
        total_size: u64,
        part_size: u64,
        written: &HashMap<u64, u64>,
    ) -> Vec<DestinationPart> {
        partition(total_size, part_size, written)
    }
}

/// A local file, written through an independent handle per part.
#[derive(Debug, Clone)]
pub struct FileDestination {
    path: PathBuf,
}

impl FileDestination {
    pub fn new<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Destination for FileDestination {
    type Writer = tokio::fs::File;
    type Reader = tokio::fs::File;

    fn destination_key(&self) -> Option<String> {
        Some(format!("file:{}", self.path.display()))
    }

    async fn prepare(&self, total_size: Option<u64>, resuming: bool) -> io::Result<bool> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let kept = match (resuming, total_size) {
            (true, Some(total)) => tokio::fs::metadata(&self.path)
                .await
                .map(|meta| meta.len() == total)
                .unwrap_or(false),
            _ => false,
        };
        if kept {
            return Ok(true);
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        if let Some(total) = total_size {
            file.set_len(total).await?;
        }
        Ok(false)
    }

    async fn writer(&self, offset: u64) -> io::Result<Self::Writer> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(file)
    }

    async fn reader(&self) -> io::Result<Self::Reader> {
        tokio::fs::File::open(&self.path).await
    }
}

/// An in-memory buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryDestination {
    buf: Arc<Mutex<Vec<u8>>>,
    key: Option<String>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make downloads to this buffer resumable under the identity `key`.
    pub fn with_key<T: Into<String>>(self, key: T) -> Self {
        Self {
            key: Some(key.into()),
            ..self
        }
    }

    /// Copy of the current content.
    pub fn contents(&self) -> Vec<u8> {
        self.buf.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Destination for MemoryDestination {
    type Writer = MemoryWriter;
    type Reader = io::Cursor<Vec<u8>>;

    fn destination_key(&self) -> Option<String> {
        self.key.clone()
    }

    async fn prepare(&self, total_size: Option<u64>, resuming: bool) -> io::Result<bool> {
        let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        let total = total_size.unwrap_or(0) as usize;
        if resuming && total_size.is_some() && buf.len() == total {
            return Ok(true);
        }
        buf.clear();
        buf.resize(total, 0);
        Ok(false)
    }

    async fn writer(&self, offset: u64) -> io::Result<Self::Writer> {
        Ok(MemoryWriter {
            buf: self.buf.clone(),
            pos: offset as usize,
        })
    }

    async fn reader(&self) -> io::Result<Self::Reader> {
        Ok(io::Cursor::new(self.contents()))
    }
}

/// Writer into a [`MemoryDestination`].
#[derive(Debug)]
pub struct MemoryWriter {
    buf: Arc<Mutex<Vec<u8>>>,
    pos: usize,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let end = self.pos + data.len();
        {
            let mut buf = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
            if buf.len() < end {
                buf.resize(end, 0);
            }
            buf[self.pos..end].copy_from_slice(data);
        }
        self.pos = end;
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
