use resumable_transfer::checksum::Checksum;
use resumable_transfer::error::{Error, Result};
use resumable_transfer::request::*;
use resumable_transfer::{BlockApi, DownloadApi, MultipartApi, ObjectUri};

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use futures::{StreamExt as _, stream};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write as _;
use std::ops::Range;
use std::sync::{Mutex, MutexGuard};

const CHUNK: usize = 64 << 10;

/// A failure to inject into a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A retryable failure, e.g. a dropped connection.
    Transient,
    /// A definitive rejection.
    Hard,
    /// Report a checksum that does not match the body.
    WrongChecksum,
    /// The session is gone.
    Expired,
    /// Send this many bytes of the body, then drop the connection.
    Cut(usize),
    /// Flip every bit of the body, keeping the entity tag.
    Corrupt,
}

#[derive(Debug)]
struct Object {
    data: Bytes,
    etag: String,
    encoding: Option<String>,
    size_known: bool,
}

#[derive(Debug, Default)]
struct Session {
    key: String,
    parts: BTreeMap<u32, Bytes>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: HashMap<String, Object>,
    sessions: HashMap<String, Session>,
    blocks: HashMap<String, Bytes>,
    /// Faults keyed by part number for uploads and range start for
    /// downloads, with how many times they fire.
    faults: HashMap<u64, (Fault, usize)>,
    /// Blocks whose next context is handed out already expired.
    stale_blocks: HashSet<u32>,
    /// Object to swap in after the next probe.
    replacement: Option<(String, Bytes)>,
    next_id: usize,
    initiated: usize,
    uploaded: Vec<u32>,
    completed: Vec<Vec<u32>>,
    ranges: Vec<Option<Range<u64>>>,
    in_flight: usize,
    max_in_flight: usize,
}

impl Inner {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn fault(&mut self, at: u64) -> Option<Fault> {
        let (fault, times) = self.faults.get_mut(&at)?;
        let fault = *fault;
        *times -= 1;
        if *times == 0 {
            self.faults.remove(&at);
        }
        Some(fault)
    }
}

/// An in-memory object store speaking every protocol of the crate.
#[derive(Debug, Default)]
pub struct MockStore {
    inner: Mutex<Inner>,
}

fn object_key(uri: &ObjectUri) -> String {
    uri.to_string()
}

fn etag_of(data: &[u8]) -> String {
    format!("\"{}\"", &Checksum::of(data).to_hex()[..16])
}

fn body(data: Bytes, cut: Option<usize>) -> BodyStream {
    let end = cut.unwrap_or(data.len()).min(data.len());
    let mut chunks: Vec<Result<Bytes>> = (0..end)
        .step_by(CHUNK)
        .map(|start| Ok(data.slice(start..(start + CHUNK).min(end))))
        .collect();
    if cut.is_some() {
        chunks.push(Err(Error::transient("connection reset by peer")));
    }
    stream::iter(chunks).boxed()
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Make the request for part `part_number` (uploads) or the range
    /// starting at `offset` (downloads) fail `times` times.
    pub fn inject(&self, at: u64, fault: Fault, times: usize) {
        self.lock().faults.insert(at, (fault, times));
    }

    /// Report the context of the next upload of block `part_number` as
    /// already expired.
    pub fn expire_block_context(&self, part_number: u32) {
        self.lock().stale_blocks.insert(part_number);
    }

    pub fn put_object<T: Into<ObjectUri>>(&self, uri: T, data: &[u8]) -> String {
        self.put(uri.into(), Bytes::copy_from_slice(data), None, true)
    }

    /// Store `data` compressed, the way an object uploaded with a content
    /// encoding is stored.
    pub fn put_gzipped<T: Into<ObjectUri>>(&self, uri: T, data: &[u8]) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        let compressed = encoder.finish().unwrap();
        self.put(uri.into(), Bytes::from(compressed), Some("gzip"), true)
    }

    /// Store an object whose size is not reported by the probe.
    pub fn put_unsized<T: Into<ObjectUri>>(&self, uri: T, data: &[u8]) -> String {
        self.put(uri.into(), Bytes::copy_from_slice(data), None, false)
    }

    fn put(&self, uri: ObjectUri, data: Bytes, encoding: Option<&str>, size_known: bool) -> String {
        let etag = etag_of(&data);
        let object = Object {
            data,
            etag: etag.clone(),
            encoding: encoding.map(str::to_owned),
            size_known,
        };
        self.lock().objects.insert(object_key(&uri), object);
        etag
    }

    /// Overwrite the object right after the next probe of it.
    pub fn replace_after_probe<T: Into<ObjectUri>>(&self, uri: T, data: &[u8]) {
        let key = object_key(&uri.into());
        self.lock().replacement = Some((key, Bytes::copy_from_slice(data)));
    }

    pub fn object<T: Into<ObjectUri>>(&self, uri: T) -> Option<Vec<u8>> {
        let key = object_key(&uri.into());
        self.lock().objects.get(&key).map(|o| o.data.to_vec())
    }

    pub fn initiated(&self) -> usize {
        self.lock().initiated
    }

    /// Part numbers sent since the last call, in ascending order.
    pub fn take_uploaded(&self) -> Vec<u32> {
        let mut uploaded = std::mem::take(&mut self.lock().uploaded);
        uploaded.sort_unstable();
        uploaded
    }

    /// Part numbers of every completion request, in request order.
    pub fn completed(&self) -> Vec<Vec<u32>> {
        self.lock().completed.clone()
    }

    /// Ranges requested since the last call, in ascending order.
    pub fn take_ranges(&self) -> Vec<Option<Range<u64>>> {
        let mut ranges = std::mem::take(&mut self.lock().ranges);
        ranges.sort_by_key(|r| r.as_ref().map(|r| r.start));
        ranges
    }

    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Count a part in flight until the next scheduling point.
    async fn in_flight(&self) {
        {
            let mut inner = self.lock();
            inner.in_flight += 1;
            inner.max_in_flight = inner.max_in_flight.max(inner.in_flight);
        }
        tokio::task::yield_now().await;
        self.lock().in_flight -= 1;
    }

    fn accept_part(&self, at: u32, body: &Bytes) -> Result<Option<Checksum>> {
        let mut inner = self.lock();
        inner.uploaded.push(at);
        match inner.fault(at as u64) {
            Some(Fault::Transient) => Err(Error::transient("service unavailable")),
            Some(Fault::Hard) => Err(Error::remote(400, "invalid part")),
            Some(Fault::Expired) => Err(Error::session_expired("gone")),
            Some(Fault::WrongChecksum) => Ok(Some(Checksum::of(b"something else"))),
            Some(Fault::Cut(_) | Fault::Corrupt) | None => Ok(Some(Checksum::of(body))),
        }
    }
}

impl MultipartApi for MockStore {
    async fn initiate(&self, req: InitiateRequest) -> Result<InitiatedSession> {
        let mut inner = self.lock();
        inner.initiated += 1;
        let id = inner.id("upload");
        let session = Session {
            key: object_key(req.uri()),
            parts: BTreeMap::new(),
        };
        inner.sessions.insert(id.clone(), session);
        Ok(InitiatedSession::new(id))
    }

    async fn upload_part(&self, req: UploadPartRequest) -> Result<UploadPartResponse> {
        let number = req.part_number().get();
        let checksum = self.accept_part(number, req.body())?;
        self.in_flight().await;

        let mut inner = self.lock();
        let Some(session) = inner.sessions.get_mut(req.session_id()) else {
            return Err(Error::session_expired(req.session_id()));
        };
        session.parts.insert(number, req.body().clone());
        req.progress().set_in_flight(req.body().len() as u64);
        Ok(UploadPartResponse::new(etag_of(req.body()), checksum))
    }

    async fn complete(&self, req: CompleteRequest) -> Result<CompletedObject> {
        let mut inner = self.lock();
        let numbers: Vec<u32> = req.parts().iter().map(|p| p.part_number.get()).collect();
        inner.completed.push(numbers.clone());

        let Some(session) = inner.sessions.remove(req.session_id()) else {
            return Err(Error::session_expired(req.session_id()));
        };
        let mut data = Vec::new();
        for part in req.parts() {
            let Some(body) = session.parts.get(&part.part_number.get()) else {
                return Err(Error::remote(400, "part was never uploaded"));
            };
            if etag_of(body) != part.etag {
                return Err(Error::remote(400, "entity tag does not match the part"));
            }
            data.extend_from_slice(body);
        }
        let etag = etag_of(&data);
        let object = Object {
            data: Bytes::from(data),
            etag: etag.clone(),
            encoding: None,
            size_known: true,
        };
        inner.objects.insert(session.key, object);
        Ok(CompletedObject::new(req.uri().clone(), etag))
    }
}

impl BlockApi for MockStore {
    async fn make_block(&self, req: MakeBlockRequest) -> Result<BlockResponse> {
        let number = req.part_number().get();
        let checksum = self.accept_part(number, req.body())?;
        self.in_flight().await;

        let mut inner = self.lock();
        let context = inner.id("ctx");
        inner.blocks.insert(context.clone(), req.body().clone());
        req.progress().set_in_flight(req.body().len() as u64);
        let mut resp = BlockResponse::new(context);
        if inner.stale_blocks.remove(&number) {
            resp = resp.expires_at(1);
        }
        Ok(match checksum {
            Some(checksum) => resp.checksum(checksum),
            None => resp,
        })
    }

    async fn make_file(&self, req: MakeFileRequest) -> Result<CompletedObject> {
        let mut inner = self.lock();
        inner.completed.push(Vec::new());

        let mut data = Vec::new();
        for context in req.contexts() {
            let Some(block) = inner.blocks.get(context) else {
                return Err(Error::remote(400, "unknown block context"));
            };
            data.extend_from_slice(block);
        }
        if data.len() as u64 != req.size() {
            return Err(Error::remote(400, "size does not match the blocks"));
        }
        let etag = etag_of(&data);
        let object = Object {
            data: Bytes::from(data),
            etag: etag.clone(),
            encoding: None,
            size_known: true,
        };
        inner.objects.insert(object_key(req.uri()), object);
        Ok(CompletedObject::new(req.uri().clone(), etag))
    }
}

impl DownloadApi for MockStore {
    async fn head(&self, req: HeadRequest) -> Result<ObjectInfo> {
        let mut inner = self.lock();
        let key = object_key(req.uri());
        let Some(object) = inner.objects.get(&key) else {
            return Err(Error::remote(404, "no such key"));
        };
        let mut info = ObjectInfo::new(
            object.size_known.then_some(object.data.len() as u64),
            object.etag.clone(),
        );
        info.content_encoding = object.encoding.clone();
        info.checksum = Some(Checksum::of(&object.data));

        if inner.replacement.as_ref().is_some_and(|(k, _)| *k == key) {
            if let Some((key, data)) = inner.replacement.take() {
                let object = Object {
                    etag: etag_of(&data),
                    data,
                    encoding: None,
                    size_known: true,
                };
                inner.objects.insert(key, object);
            }
        }
        Ok(info)
    }

    async fn get_range(&self, req: GetRangeRequest) -> Result<RangeResponse> {
        let mut inner = self.lock();
        inner.ranges.push(req.range());
        let start = req.range().map_or(0, |r| r.start);
        let fault = inner.fault(start);

        let Some(object) = inner.objects.get(&object_key(req.uri())) else {
            return Err(Error::remote(404, "no such key"));
        };
        if let Some(expected) = req.if_match() {
            if expected != object.etag {
                return Err(Error::identity_mismatch(expected, object.etag.as_str()));
            }
        }
        let data = match req.range() {
            Some(r) => object.data.slice(r.start as usize..(r.end as usize).min(object.data.len())),
            None => object.data.clone(),
        };
        let cut = match fault {
            Some(Fault::Transient) => return Err(Error::transient("service unavailable")),
            Some(Fault::Hard) => return Err(Error::remote(403, "access denied")),
            Some(Fault::Cut(n)) => Some(n),
            _ => None,
        };
        let data = match fault {
            Some(Fault::Corrupt) => data.iter().map(|b| !b).collect(),
            _ => data,
        };
        let resp = RangeResponse::new(object.etag.clone(), body(data, cut));
        Ok(match &object.encoding {
            Some(encoding) => resp.content_encoding(encoding.as_str()),
            None => resp,
        })
    }
}
