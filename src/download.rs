//! The download engine.
//!
//! A probe establishes the object's size and entity tag. The destination is
//! cut into parts that are fetched as ranges, each of which must come from
//! the same version of the object. Bytes are decoded before they reach the
//! destination, and how far each part got is recorded so an interrupted
//! download only fetches what is missing.
use crate::TransferConfig;
use crate::cancel::CancelCause;
use crate::checksum::{Checksum, ChecksumHasher};
use crate::client::DownloadApi;
use crate::client::request::{GetRangeRequest, HeadRequest, ObjectInfo};
use crate::destination::{Destination, DestinationPart};
use crate::error::{Error, ErrorKind, Result};
use crate::fingerprint::Fingerprint;
use crate::ledger::{CheckpointRecord, Ledger, LedgerWriter};
use crate::progress::{PartProgress, Progresses};
use crate::scheduler::{Placed, Scheduler};
use crate::source::PartNumber;
use crate::uri::ObjectUri;

use bytes::Bytes;
use flate2::write::GzDecoder;
use futures::{Stream, StreamExt as _};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write as _};
use std::sync::{Mutex, PoisonError};
use tokio::io::{AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

/// A downloaded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedObject {
    pub uri: ObjectUri,
    pub etag: String,
    /// Bytes in the destination.
    pub size: u64,
}

/// A part that is fully in the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedPart {
    pub part_number: PartNumber,
    pub offset: u64,
    pub size: u64,
    /// Bytes fetched by this attempt, as opposed to an earlier one.
    pub fetched: u64,
    /// SHA-256 of the part, when this attempt fetched all of it.
    pub checksum: Option<Checksum>,
}

impl Placed for DownloadedPart {
    fn offset(&self) -> u64 {
        self.offset
    }
}

/// Downloads objects with a [`DownloadApi`].
///
/// Built by [`DownloadBuilder`](crate::DownloadBuilder).
#[derive(Debug)]
pub struct Downloader<C> {
    client: C,
    ledger: Ledger,
    config: TransferConfig,
}

impl<C: DownloadApi> Downloader<C> {
    pub(crate) fn new(client: C, ledger: Ledger, config: TransferConfig) -> Self {
        Self {
            client,
            ledger,
            config,
        }
    }

    /// Download the object at `uri` into `dest`.
    ///
    /// Objects of unknown size or stored with a content encoding are fetched
    /// whole in one streamed request, which is not resumable.
    pub async fn download<D, T>(&self, uri: T, dest: &D) -> Result<DownloadedObject>
    where
        D: Destination,
        T: Into<ObjectUri>,
    {
        let uri = uri.into();
        let req = HeadRequest {
            uri: uri.clone(),
            endpoints: self.config.endpoints.clone(),
        };
        let info = self.client.head(req).await?;
        let size = match (info.size, &info.content_encoding) {
            (Some(size), None) => size,
            _ => return self.download_streamed(uri, &info, dest).await,
        };

        let part_size = self.config.part_size;
        let fingerprint = dest
            .destination_key()
            .map(|key| Fingerprint::new(&uri, key, part_size, size, &self.config.endpoints));
        let written = fingerprint
            .as_ref()
            .map(|fp| self.replay(fp, &info.etag))
            .unwrap_or_default();
        let kept = dest.prepare(Some(size), !written.is_empty()).await?;
        let written = if kept { written } else { HashMap::new() };
        let log = PartLog::open(&self.ledger, fingerprint.as_ref(), !written.is_empty());

        let parts = dest.slice(size, part_size, &written);
        debug!(%uri, etag = %info.etag, size, parts = parts.len(), resumed = !written.is_empty(), "downloading");
        let queue = Mutex::new(VecDeque::from(parts));
        let progresses = Progresses::new(Some(size), self.config.on_progress.clone());
        let scheduler = Scheduler::with_concurrency(self.config.concurrency);

        let queue = &queue;
        let progresses = &progresses;
        let (uri_ref, etag, log_ref) = (&uri, info.etag.as_str(), &log);
        let next = || async move {
            let next = queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front();
            Ok::<_, Error>(next)
        };
        let work = |part: DestinationPart, cause: CancelCause| async move {
            let progress = progresses.add_part(part.size);
            progress.set_in_flight(part.have_written);
            let done = self
                .fetch_part(uri_ref, etag, dest, &part, &progress, log_ref, &cause)
                .await
                .map_err(|e| e.in_part(uri_ref, part.part_number))?;
            progress.commit();
            Ok::<_, Error>(done)
        };
        let result = scheduler.run(next, work).await;
        log.close();

        match result {
            Ok(parts) => {
                if let Some(expected) = &info.checksum {
                    match verify(dest, size, expected).await {
                        Err(e) if e.kind() == ErrorKind::Integrity => {
                            warn!(%uri, error = %e, "downloaded object does not match its checksum");
                            if let Some(fp) = &fingerprint {
                                self.ledger.delete(fp);
                            }
                            return Err(e);
                        }
                        verified => verified?,
                    }
                }
                if let Some(fp) = &fingerprint {
                    self.ledger.delete(fp);
                }
                let fetched: u64 = parts.iter().map(|p| p.fetched).sum();
                debug!(%uri, size, fetched, "download complete");
                Ok(DownloadedObject {
                    uri,
                    etag: info.etag,
                    size,
                })
            }
            Err(e) => {
                if e.kind() == ErrorKind::IdentityMismatch {
                    // Bytes already written belong to a version that is gone.
                    if let Some(fp) = &fingerprint {
                        self.ledger.delete(fp);
                    }
                }
                Err(e)
            }
        }
    }

    /// Bytes written by earlier attempts, keyed by part offset.
    fn replay(&self, fingerprint: &Fingerprint, etag: &str) -> HashMap<u64, u64> {
        let Some(reader) = self.ledger.open_for_reading(fingerprint) else {
            return HashMap::new();
        };
        let mut written = HashMap::new();
        for record in reader.records() {
            if record.session_id != etag {
                debug!(recorded = %record.session_id, current = %etag, "object changed since last attempt");
                return HashMap::new();
            }
            written.insert(record.offset, record.size);
        }
        written
    }

    #[allow(clippy::too_many_arguments)]
    async fn fetch_part<D: Destination>(
        &self,
        uri: &ObjectUri,
        etag: &str,
        dest: &D,
        part: &DestinationPart,
        progress: &PartProgress,
        log: &PartLog,
        cause: &CancelCause,
    ) -> Result<DownloadedPart> {
        let attempts = self.config.part_attempts.max(1);
        let mut have_written = part.have_written;
        let mut fetched_total = 0;
        let mut attempt = 1;
        loop {
            if have_written >= part.size {
                trace!(part = %part.part_number, "part already downloaded");
                return Ok(DownloadedPart {
                    part_number: part.part_number,
                    offset: part.offset,
                    size: part.size,
                    fetched: fetched_total,
                    checksum: None,
                });
            }

            let mut fetched = 0;
            let range = Window {
                start: part.offset + have_written,
                len: part.size - have_written,
                base: have_written,
            };
            let result = self
                .fetch_range(uri, etag, dest, &range, progress, &mut fetched, cause)
                .await;
            have_written += fetched;
            fetched_total += fetched;

            match result {
                Ok(checksum) => {
                    let checksum = (range.base == 0).then_some(checksum);
                    log.append(&part_record(etag, part, part.size, checksum.as_ref()));
                    trace!(part = %part.part_number, fetched, "part downloaded");
                    return Ok(DownloadedPart {
                        part_number: part.part_number,
                        offset: part.offset,
                        size: part.size,
                        fetched: fetched_total,
                        checksum,
                    });
                }
                Err(e) => {
                    if fetched > 0 {
                        log.append(&part_record(etag, part, have_written, None));
                    }
                    if e.is_retryable() && attempt < attempts && !cause.is_cancelled() {
                        debug!(part = %part.part_number, attempt, have_written, error = %e, "retrying part");
                        attempt += 1;
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Fetch `range` into the destination, counting bytes written in
    /// `fetched` even when it fails.
    #[allow(clippy::too_many_arguments)]
    async fn fetch_range<D: Destination>(
        &self,
        uri: &ObjectUri,
        etag: &str,
        dest: &D,
        range: &Window,
        progress: &PartProgress,
        fetched: &mut u64,
        cause: &CancelCause,
    ) -> Result<Checksum> {
        let req = GetRangeRequest {
            uri: uri.clone(),
            range: Some(range.start..range.start + range.len),
            if_match: Some(etag.to_owned()),
            endpoints: self.config.endpoints.clone(),
        };
        let resp = tokio::select! {
            biased;
            _ = cause.cancelled() => return Err(Error::cancelled()),
            resp = self.client.get_range(req) => resp?,
        };
        if resp.etag != etag {
            return Err(Error::identity_mismatch(etag, resp.etag));
        }
        let decoder = Decoder::new(resp.content_encoding.as_deref())?;

        let mut writer = dest.writer(range.start).await?;
        let mut sink = Sink {
            writer: &mut writer,
            limit: range.len,
            written: 0,
            hasher: ChecksumHasher::new(),
        };
        let copied = copy_body(resp.body, decoder, &mut sink, cause, |n| {
            progress.set_in_flight(range.base + n)
        })
        .await;
        *fetched = sink.written;
        let hasher = sink.hasher;
        let flushed = writer.flush().await;
        copied?;
        flushed?;

        if *fetched != range.len {
            return Err(Error::short_body(range.len, *fetched));
        }
        Ok(hasher.finish())
    }

    async fn download_streamed<D: Destination>(
        &self,
        uri: ObjectUri,
        info: &ObjectInfo,
        dest: &D,
    ) -> Result<DownloadedObject> {
        debug!(%uri, etag = %info.etag, encoding = ?info.content_encoding, "downloading in one stream");
        dest.prepare(None, false).await?;
        let req = GetRangeRequest {
            uri: uri.clone(),
            range: None,
            if_match: Some(info.etag.clone()),
            endpoints: self.config.endpoints.clone(),
        };
        let resp = self.client.get_range(req).await?;
        if resp.etag != info.etag {
            return Err(Error::identity_mismatch(info.etag.as_str(), resp.etag));
        }
        let decoder = Decoder::new(resp.content_encoding.as_deref())?;

        let progresses = Progresses::new(None, self.config.on_progress.clone());
        let progress = progresses.add_part(u64::MAX);
        let mut raw = ChecksumHasher::new();
        let body = resp.body.map(|chunk| {
            if let Ok(chunk) = &chunk {
                raw.update(chunk);
            }
            chunk
        });

        let mut writer = dest.writer(0).await?;
        let mut sink = Sink {
            writer: &mut writer,
            limit: u64::MAX,
            written: 0,
            hasher: ChecksumHasher::new(),
        };
        let copied = copy_body(body, decoder, &mut sink, &CancelCause::new(), |n| {
            progress.set_in_flight(n)
        })
        .await;
        let size = sink.written;
        let flushed = writer.flush().await;
        copied?;
        flushed?;

        if let Some(expected) = &info.checksum {
            let found = raw.finish();
            if found != *expected {
                return Err(Error::checksum_mismatch(&found, expected));
            }
        }
        debug!(%uri, size, "streamed download complete");
        Ok(DownloadedObject {
            uri,
            etag: info.etag.clone(),
            size,
        })
    }
}

/// Check the first `size` bytes of `dest` against `expected`.
async fn verify<D: Destination>(dest: &D, size: u64, expected: &Checksum) -> Result<()> {
    let mut reader = dest.reader().await?;
    let mut hasher = ChecksumHasher::new();
    let mut buf = vec![0; VERIFY_CHUNK];
    let mut read = 0;
    while read < size {
        let want = (size - read).min(VERIFY_CHUNK as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(Error::short_body(size, read));
        }
        hasher.update(&buf[..n]);
        read += n as u64;
    }
    let found = hasher.finish();
    if found != *expected {
        return Err(Error::checksum_mismatch(&found, expected));
    }
    Ok(())
}

const VERIFY_CHUNK: usize = 256 * 1024;

struct Window {
    start: u64,
    len: u64,
    /// Bytes of the part written before `start`.
    base: u64,
}

fn part_record(
    etag: &str,
    part: &DestinationPart,
    written: u64,
    checksum: Option<&Checksum>,
) -> CheckpointRecord {
    CheckpointRecord {
        session_id: etag.to_owned(),
        part_token: String::new(),
        offset: part.offset,
        part_number: part.part_number.get(),
        size: written,
        expires_at: None,
        digest: checksum.map(Checksum::to_hex),
    }
}

/// Decodes the content encoding of a response as it arrives.
enum Decoder {
    Identity,
    Gzip(GzDecoder<Vec<u8>>),
}

impl Decoder {
    fn new(encoding: Option<&str>) -> Result<Self> {
        match encoding.map(str::trim) {
            None | Some("") | Some("identity") => Ok(Self::Identity),
            Some("gzip") | Some("x-gzip") => Ok(Self::Gzip(GzDecoder::new(Vec::new()))),
            Some(_) => Err(Error::from_kind(
                ErrorKind::Remote,
                "unsupported content encoding",
            )),
        }
    }

    /// Decode `chunk`, inflating on the blocking thread pool.
    async fn decode(self, chunk: Bytes) -> io::Result<(Self, Bytes)> {
        match self {
            Self::Identity => Ok((Self::Identity, chunk)),
            Self::Gzip(mut decoder) => {
                let (decoder, data) = blocking(move || {
                    decoder.write_all(&chunk)?;
                    let data = Bytes::from(std::mem::take(decoder.get_mut()));
                    Ok((decoder, data))
                })
                .await?;
                Ok((Self::Gzip(decoder), data))
            }
        }
    }

    async fn finish(self) -> io::Result<Bytes> {
        match self {
            Self::Identity => Ok(Bytes::new()),
            Self::Gzip(decoder) => blocking(move || decoder.finish().map(Bytes::from)).await,
        }
    }
}

async fn blocking<T, F>(f: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(io::Error::other)?
}

/// Where decoded bytes of one response go.
struct Sink<'a, W> {
    writer: &'a mut W,
    limit: u64,
    written: u64,
    hasher: ChecksumHasher,
}

impl<W: AsyncWrite + Unpin> Sink<'_, W> {
    /// Write `data`, failing once more bytes arrive than the response may
    /// carry. Bytes up to the limit are still written.
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let room = self.limit - self.written;
        let len = (data.len() as u64).min(room) as usize;
        self.writer.write_all(&data[..len]).await?;
        self.hasher.update(&data[..len]);
        self.written += len as u64;
        if len < data.len() {
            let found = self.written + (data.len() - len) as u64;
            return Err(Error::short_body(self.limit, found));
        }
        Ok(())
    }
}

async fn copy_body<B, W, F>(
    mut body: B,
    mut decoder: Decoder,
    sink: &mut Sink<'_, W>,
    cause: &CancelCause,
    on_written: F,
) -> Result<()>
where
    B: Stream<Item = Result<Bytes>> + Unpin,
    W: AsyncWrite + Unpin,
    F: Fn(u64),
{
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cause.cancelled() => return Err(Error::cancelled()),
            chunk = body.next() => chunk,
        };
        let Some(chunk) = chunk else {
            break;
        };
        let (next, data) = decoder.decode(chunk?).await?;
        decoder = next;
        if !data.is_empty() {
            sink.write(&data).await?;
            on_written(sink.written);
        }
    }
    let tail = decoder.finish().await?;
    if !tail.is_empty() {
        sink.write(&tail).await?;
        on_written(sink.written);
    }
    Ok(())
}

/// The ledger writer of one download attempt.
struct PartLog {
    writer: Mutex<Option<LedgerWriter>>,
}

impl PartLog {
    fn open(ledger: &Ledger, fingerprint: Option<&Fingerprint>, resuming: bool) -> Self {
        let writer = fingerprint.and_then(|fp| {
            if resuming {
                ledger.open_for_appending(fp)
            } else {
                ledger.open_for_creating_new(fp)
            }
        });
        Self {
            writer: Mutex::new(writer),
        }
    }

    fn append(&self, record: &CheckpointRecord) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(w) = writer.as_ref() else {
            return;
        };
        if let Err(e) = w.append(record) {
            warn!(key = %w.key(), error = %e, "cannot append to ledger, no longer recording parts");
            *writer = None;
        }
    }

    fn close(&self) {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(Err(e)) = writer.map(LedgerWriter::close) {
            warn!(error = %e, "cannot flush ledger");
        }
    }
}
