//! Sources of data to upload, cut into parts.
//!
//! A [`DataSource`] hands out [`SourcePart`]s one after another. Seekable
//! sources ([`FileSource`], [`BytesSource`]) know their size, can be reset
//! and give out parts that read their own byte range independently, so
//! parts can be uploaded in parallel and a transfer can be resumed. Stream
//! sources ([`ReaderSource`]) are read once, in order.
use bytes::{Bytes, BytesMut};
use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::io::{self, SeekFrom};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncSeekExt as _};

/// Number we assign to a part, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartNumber(NonZeroU32);

impl Default for PartNumber {
    fn default() -> Self {
        Self(NonZeroU32::MIN)
    }
}

impl PartNumber {
    /// Returns `None` for 0, which is never a valid part number.
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Increment the `PartNumber` by 1, returning the previous part number.
    pub fn increment(&mut self) -> PartNumber {
        let prev = *self;
        self.0 = self.0.saturating_add(1);
        prev
    }
}

impl Display for PartNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "part_{}", self.0)
    }
}

#[derive(Debug, Clone)]
enum Body {
    Bytes(Bytes),
    File(Arc<PathBuf>),
}

/// A contiguous byte range of a source, the unit of upload and retry.
#[derive(Debug, Clone)]
pub struct SourcePart {
    part_number: PartNumber,
    offset: u64,
    size: u64,
    body: Body,
}

impl SourcePart {
    /// A part whose content is already in memory.
    pub fn from_bytes(part_number: PartNumber, offset: u64, data: Bytes) -> Self {
        Self {
            part_number,
            offset,
            size: data.len() as u64,
            body: Body::Bytes(data),
        }
    }

    /// A part that reads `[offset, offset + size)` of the file at `path`
    /// through its own handle.
    pub fn from_file_range(
        part_number: PartNumber,
        offset: u64,
        size: u64,
        path: Arc<PathBuf>,
    ) -> Self {
        Self {
            part_number,
            offset,
            size,
            body: Body::File(path),
        }
    }

    pub fn part_number(&self) -> PartNumber {
        self.part_number
    }

    /// Offset of the part within the whole source.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Read the content of the part from its start.
    pub async fn read(&self) -> io::Result<Bytes> {
        match &self.body {
            Body::Bytes(data) => Ok(data.clone()),
            Body::File(path) => {
                let mut file = tokio::fs::File::open(path.as_path()).await?;
                file.seek(SeekFrom::Start(self.offset)).await?;
                let len = usize::try_from(self.size)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let mut buf = BytesMut::zeroed(len);
                file.read_exact(&mut buf).await?;
                Ok(buf.freeze())
            }
        }
    }
}

/// Something that can be cut into parts for upload.
pub trait DataSource: Send + Sync {
    /// Cut off the next part of at most `size` bytes.
    ///
    /// Returns `None` when the source is exhausted. Parts are numbered from
    /// 1 without gaps and calls are serialized internally, so concurrent
    /// callers each get a distinct part.
    fn slice(&self, size: u64) -> impl Future<Output = io::Result<Option<SourcePart>>> + Send;

    /// Rewind to the beginning, numbering parts from 1 again.
    ///
    /// Stream sources cannot be rewound and return an error.
    fn reset(&self) -> impl Future<Output = io::Result<()>> + Send;

    /// Size of the whole source, if it can be known up front.
    fn total_size(&self) -> Option<u64>;

    /// Stable identity of the source for resumption, or `None` if transfers
    /// from this source cannot be resumed.
    fn source_key(&self) -> Option<String>;

    /// Whether parts can be read independently of each other.
    fn is_seekable(&self) -> bool {
        self.total_size().is_some()
    }
}

#[derive(Debug, Default)]
struct Cursor {
    offset: u64,
    part_number: PartNumber,
}

impl Cursor {
    /// Advance past the next range of at most `size` bytes of a source of
    /// `total` bytes, returning the range's part number, offset and length.
    fn advance(&mut self, size: u64, total: u64) -> Option<(PartNumber, u64, u64)> {
        let remaining = total.saturating_sub(self.offset);
        let len = remaining.min(size);
        if len == 0 {
            return None;
        }
        let offset = self.offset;
        self.offset += len;
        Some((self.part_number.increment(), offset, len))
    }
}

/// A local file, read with an independent handle per part.
#[derive(Debug)]
pub struct FileSource {
    path: Arc<PathBuf>,
    size: u64,
    key: String,
    cursor: Mutex<Cursor>,
}

impl FileSource {
    /// Open the file at `path`.
    ///
    /// The source key is the canonical path together with the modification
    /// time, so a file that changed between attempts is not resumed.
    pub async fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = tokio::fs::canonicalize(path.as_ref()).await?;
        let meta = tokio::fs::metadata(&path).await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        let key = format!("file:{}@{}", path.display(), mtime);
        Ok(Self {
            path: Arc::new(path),
            size: meta.len(),
            key,
            cursor: Mutex::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataSource for FileSource {
    async fn slice(&self, size: u64) -> io::Result<Option<SourcePart>> {
        let next = self
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .advance(size, self.size);
        Ok(next.map(|(part_number, offset, len)| {
            SourcePart::from_file_range(part_number, offset, len, self.path.clone())
        }))
    }

    async fn reset(&self) -> io::Result<()> {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = Cursor::default();
        Ok(())
    }

    fn total_size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn source_key(&self) -> Option<String> {
        Some(self.key.clone())
    }
}

/// Bytes held in memory.
#[derive(Debug)]
pub struct BytesSource {
    data: Bytes,
    key: Option<String>,
    cursor: Mutex<Cursor>,
}

impl BytesSource {
    /// A source over `data` that is not resumable.
    pub fn new<B: Into<Bytes>>(data: B) -> Self {
        Self {
            data: data.into(),
            key: None,
            cursor: Mutex::default(),
        }
    }

    /// Make transfers from this source resumable under the identity `key`.
    pub fn with_key<T: Into<String>>(self, key: T) -> Self {
        Self {
            key: Some(key.into()),
            ..self
        }
    }
}

impl DataSource for BytesSource {
    async fn slice(&self, size: u64) -> io::Result<Option<SourcePart>> {
        let next = self
            .cursor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .advance(size, self.data.len() as u64);
        Ok(next.map(|(part_number, offset, len)| {
            let start = offset as usize;
            let data = self.data.slice(start..start + len as usize);
            SourcePart::from_bytes(part_number, offset, data)
        }))
    }

    async fn reset(&self) -> io::Result<()> {
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = Cursor::default();
        Ok(())
    }

    fn total_size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn source_key(&self) -> Option<String> {
        self.key.clone()
    }
}

/// A one-shot stream of bytes.
///
/// Parts are read into memory in order. The total size is unknown, so
/// uploads from a `ReaderSource` run serially and are never resumed.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: tokio::sync::Mutex<ReaderState<R>>,
}

#[derive(Debug)]
struct ReaderState<R> {
    reader: R,
    offset: u64,
    part_number: PartNumber,
    done: bool,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(ReaderState {
                reader,
                offset: 0,
                part_number: PartNumber::default(),
                done: false,
            }),
        }
    }
}

impl<R> DataSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn slice(&self, size: u64) -> io::Result<Option<SourcePart>> {
        let mut state = self.inner.lock().await;
        if state.done {
            return Ok(None);
        }
        let limit = usize::try_from(size).unwrap_or(usize::MAX);
        let mut buf = BytesMut::with_capacity(limit.min(8 << 20));
        while buf.len() < limit {
            let n = (&mut state.reader)
                .take((limit - buf.len()) as u64)
                .read_buf(&mut buf)
                .await?;
            if n == 0 {
                state.done = true;
                break;
            }
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let offset = state.offset;
        state.offset += buf.len() as u64;
        let part_number = state.part_number.increment();
        Ok(Some(SourcePart::from_bytes(
            part_number,
            offset,
            buf.freeze(),
        )))
    }

    async fn reset(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "a stream source cannot be reset",
        ))
    }

    fn total_size(&self) -> Option<u64> {
        None
    }

    fn source_key(&self) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    async fn drain<S: DataSource>(source: &S, size: u64) -> Vec<SourcePart> {
        let mut parts = Vec::new();
        while let Some(part) = source.slice(size).await.unwrap() {
            parts.push(part);
        }
        parts
    }

    #[tokio::test]
    async fn bytes_source_partitions_without_gaps() {
        let source = BytesSource::new(vec![7u8; 10]);
        let parts = drain(&source, 4).await;
        let shape: Vec<_> = parts
            .iter()
            .map(|p| (p.part_number().get(), p.offset(), p.size()))
            .collect();
        assert_eq!(shape, vec![(1, 0, 4), (2, 4, 4), (3, 8, 2)]);

        source.reset().await.unwrap();
        let again = source.slice(4).await.unwrap().unwrap();
        assert_eq!(again.part_number().get(), 1);
        assert_eq!(again.offset(), 0);
    }

    #[tokio::test]
    async fn file_parts_read_their_own_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        file.write_all(&data).unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).await.unwrap();
        assert_eq!(source.total_size(), Some(1000));
        assert!(source.source_key().unwrap().starts_with("file:"));

        let parts = drain(&source, 300).await;
        assert_eq!(parts.len(), 4);
        // Read out of order; each part has its own handle.
        for part in parts.iter().rev() {
            let body = part.read().await.unwrap();
            let start = part.offset() as usize;
            assert_eq!(&body[..], &data[start..start + part.size() as usize]);
        }
    }

    #[tokio::test]
    async fn reader_source_is_sequential_and_final() {
        let data = vec![1u8; 10];
        let source = ReaderSource::new(&data[..]);
        assert!(!source.is_seekable());

        let parts = drain(&source, 4).await;
        let sizes: Vec<_> = parts.iter().map(SourcePart::size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(parts[2].part_number().get(), 3);
        assert!(source.slice(4).await.unwrap().is_none());
        assert!(source.reset().await.is_err());
    }

    #[tokio::test]
    async fn empty_source_has_no_parts() {
        let source = BytesSource::new(Vec::new());
        assert!(source.slice(4).await.unwrap().is_none());
    }

    #[test]
    fn part_number_display() {
        let mut n = PartNumber::default();
        assert_eq!(n.increment().to_string(), "part_1");
        assert_eq!(n.get(), 2);
        assert!(PartNumber::new(0).is_none());
    }
}
