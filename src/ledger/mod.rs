//! The resumable ledger: an append-only log of completed parts.
//!
//! A ledger is keyed by the digest of a [`Fingerprint`] and stored by a
//! [`ResumableRecorder`]. Its first line is the fingerprint's canonical form,
//! every following line is one [`CheckpointRecord`] in JSON.
//!
//! Ledger failures never abort a transfer. A ledger that cannot be read means
//! the transfer starts fresh, one that cannot be written means this attempt
//! will not be resumable.
use crate::fingerprint::{Fingerprint, LedgerKey};

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::io::{self, BufRead as _, BufReader, Lines, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

mod file;
pub use file::FileRecorder;

mod memory;
pub use memory::{MemoryRecorder, NoopRecorder};

/// Readable side of a stored ledger.
pub trait ReadableMedium: Read + Debug + Send {}
impl<T: Read + Debug + Send> ReadableMedium for T {}

/// Append-only side of a stored ledger.
pub trait WritableMedium: Write + Debug + Send {}
impl<T: Write + Debug + Send> WritableMedium for T {}

/// Storage for ledgers, addressed by [`LedgerKey`].
///
/// Implementations only move bytes. Header verification and record parsing
/// happen in [`Ledger`].
pub trait ResumableRecorder: Debug + Send + Sync {
    /// Open an existing ledger for reading. Returns an error of kind
    /// `NotFound` when nothing is stored under `key`.
    fn open_for_read(&self, key: &LedgerKey) -> io::Result<Box<dyn ReadableMedium>>;

    /// Open an existing ledger for appending. Returns an error of kind
    /// `NotFound` when nothing is stored under `key`.
    fn open_for_append(&self, key: &LedgerKey) -> io::Result<Box<dyn WritableMedium>>;

    /// Create a ledger, truncating whatever was stored under `key`.
    fn open_for_create_new(&self, key: &LedgerKey) -> io::Result<Box<dyn WritableMedium>>;

    /// Remove the ledger. Removing a ledger that does not exist succeeds.
    fn delete(&self, key: &LedgerKey) -> io::Result<()>;
}

/// One completed (or, for downloads, partially completed) part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    /// Upload id, block chain id, or the identity of the downloaded object.
    #[serde(rename = "sid")]
    pub session_id: String,
    /// Opaque server token for the part: entity tag or block context.
    #[serde(rename = "token")]
    pub part_token: String,
    #[serde(rename = "off")]
    pub offset: u64,
    #[serde(rename = "pnum")]
    pub part_number: u32,
    /// Bytes covered by this record, starting at `offset`.
    pub size: u64,
    /// Unix seconds after which the record must not be reused.
    #[serde(rename = "exat")]
    pub expires_at: Option<u64>,
    /// Hex SHA-256 of the covered bytes, when known.
    pub digest: Option<String>,
}

impl CheckpointRecord {
    /// Whether the record has expired as of `now`.
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        let Some(exat) = self.expires_at else {
            return false;
        };
        let now = now.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        exat <= now
    }
}

/// Typed access to ledgers in a [`ResumableRecorder`].
#[derive(Debug, Clone)]
pub struct Ledger {
    recorder: Arc<dyn ResumableRecorder>,
}

impl Ledger {
    pub fn new(recorder: Arc<dyn ResumableRecorder>) -> Self {
        Self { recorder }
    }

    /// Open the ledger for `fingerprint` for reading.
    ///
    /// Returns `None` if there is no ledger, it cannot be read, or its header
    /// does not match `fingerprint` byte for byte.
    pub fn open_for_reading(&self, fingerprint: &Fingerprint) -> Option<LedgerReader> {
        let key = fingerprint.key();
        let medium = match self.recorder.open_for_read(&key) {
            Ok(medium) => medium,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                trace!(%key, "no ledger to resume from");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "cannot open ledger for reading");
                return None;
            }
        };

        let mut lines = BufReader::new(medium).lines();
        let expected = fingerprint.canonical_bytes();
        match lines.next() {
            Some(Ok(header)) if header.as_bytes() == expected.as_slice() => {
                debug!(%key, "opened ledger for reading");
                Some(LedgerReader { lines })
            }
            Some(Err(e)) => {
                warn!(%key, error = %e, "cannot read ledger header");
                None
            }
            _ => {
                warn!(%key, "ledger header does not match, ignoring ledger");
                None
            }
        }
    }

    /// Open the existing ledger for `fingerprint` for appending.
    ///
    /// Returns `None` unless a ledger with a matching header already exists.
    pub fn open_for_appending(&self, fingerprint: &Fingerprint) -> Option<LedgerWriter> {
        self.open_for_reading(fingerprint)?;
        let key = fingerprint.key();
        match self.recorder.open_for_append(&key) {
            Ok(medium) => Some(LedgerWriter::new(key, medium)),
            Err(e) => {
                warn!(%key, error = %e, "cannot open ledger for appending");
                None
            }
        }
    }

    /// Create a fresh ledger for `fingerprint`, writing its header.
    ///
    /// Returns `None` if the ledger cannot be created, in which case the
    /// transfer goes on without being resumable.
    pub fn open_for_creating_new(&self, fingerprint: &Fingerprint) -> Option<LedgerWriter> {
        let key = fingerprint.key();
        let created = self.recorder.open_for_create_new(&key).and_then(|mut medium| {
            let mut header = fingerprint.canonical_bytes();
            header.push(b'\n');
            medium.write_all(&header)?;
            medium.flush()?;
            Ok(medium)
        });
        match created {
            Ok(medium) => {
                debug!(%key, "created new ledger");
                Some(LedgerWriter::new(key, medium))
            }
            Err(e) => {
                warn!(%key, error = %e, "cannot create ledger, transfer will not be resumable");
                None
            }
        }
    }

    /// Delete the ledger for `fingerprint`, if any.
    pub fn delete(&self, fingerprint: &Fingerprint) {
        let key = fingerprint.key();
        match self.recorder.delete(&key) {
            Ok(()) => debug!(%key, "deleted ledger"),
            Err(e) => warn!(%key, error = %e, "cannot delete ledger"),
        }
    }
}

/// Reads checkpoint records in the order they were appended.
#[derive(Debug)]
pub struct LedgerReader {
    lines: Lines<BufReader<Box<dyn ReadableMedium>>>,
}

impl LedgerReader {
    /// Returns the next unexpired record, or `None` at the end of the ledger.
    ///
    /// Expired records are skipped. A line that does not parse ends the
    /// ledger: it can only be the torn tail of an interrupted append.
    pub fn next(&mut self) -> io::Result<Option<CheckpointRecord>> {
        self.next_at(SystemTime::now())
    }

    pub(crate) fn next_at(&mut self, now: SystemTime) -> io::Result<Option<CheckpointRecord>> {
        loop {
            let Some(line) = self.lines.next().transpose()? else {
                return Ok(None);
            };
            let record = match serde_json::from_str::<CheckpointRecord>(&line) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "stopping at unparseable ledger line");
                    return Ok(None);
                }
            };
            if record.is_expired_at(now) {
                trace!(part = record.part_number, offset = record.offset, "skipping expired record");
                continue;
            }
            return Ok(Some(record));
        }
    }

    /// Drain the remaining unexpired records, stopping at the first I/O error.
    pub fn records(mut self) -> Vec<CheckpointRecord> {
        let mut records = Vec::new();
        loop {
            match self.next() {
                Ok(Some(record)) => records.push(record),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stopping at unreadable ledger line");
                    break;
                }
            }
        }
        records
    }
}

/// The single writer of a ledger during one transfer attempt.
///
/// Appends from concurrent part workers are serialized by an internal lock.
#[derive(Debug)]
pub struct LedgerWriter {
    key: LedgerKey,
    medium: Mutex<Box<dyn WritableMedium>>,
}

impl LedgerWriter {
    fn new(key: LedgerKey, medium: Box<dyn WritableMedium>) -> Self {
        Self {
            key,
            medium: Mutex::new(medium),
        }
    }

    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    /// Append one record and flush it.
    pub fn append(&self, record: &CheckpointRecord) -> io::Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut medium = self.medium.lock().unwrap_or_else(PoisonError::into_inner);
        medium.write_all(&line)?;
        medium.flush()
    }

    /// Flush and release the medium.
    pub fn close(self) -> io::Result<()> {
        let mut medium = self
            .medium
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        medium.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uri::{Endpoints, ObjectUri};
    use std::time::Duration;

    fn fingerprint(key: &str) -> Fingerprint {
        let uri = ObjectUri::from(("bucket", key));
        Fingerprint::new(&uri, "/src", 4, 10, &Endpoints::new(["e1"]))
    }

    fn record(part_number: u32, expires_at: Option<u64>) -> CheckpointRecord {
        CheckpointRecord {
            session_id: "upload-1".into(),
            part_token: format!("etag-{part_number}"),
            offset: u64::from(part_number - 1) * 4,
            part_number,
            size: 4,
            expires_at,
            digest: None,
        }
    }

    #[test]
    fn records_come_back_in_append_order() {
        let ledger = Ledger::new(Arc::new(MemoryRecorder::new()));
        let fp = fingerprint("k");
        let writer = ledger.open_for_creating_new(&fp).unwrap();
        writer.append(&record(2, None)).unwrap();
        writer.append(&record(1, None)).unwrap();
        writer.close().unwrap();

        let records = ledger.open_for_reading(&fp).unwrap().records();
        let numbers: Vec<_> = records.iter().map(|r| r.part_number).collect();
        assert_eq!(numbers, vec![2, 1]);
    }

    #[test]
    fn expired_records_are_skipped() {
        let ledger = Ledger::new(Arc::new(MemoryRecorder::new()));
        let fp = fingerprint("k");
        let now = SystemTime::now();
        let past = now
            .checked_sub(Duration::from_secs(60))
            .unwrap()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let future = past + 3600;

        let writer = ledger.open_for_creating_new(&fp).unwrap();
        writer.append(&record(1, Some(past))).unwrap();
        writer.append(&record(2, Some(future))).unwrap();
        writer.append(&record(3, None)).unwrap();

        let mut reader = ledger.open_for_reading(&fp).unwrap();
        assert_eq!(reader.next_at(now).unwrap().map(|r| r.part_number), Some(2));
        assert_eq!(reader.next_at(now).unwrap().map(|r| r.part_number), Some(3));
        assert_eq!(reader.next_at(now).unwrap(), None);
    }

    #[test]
    fn mismatched_header_is_rejected() {
        let recorder = Arc::new(MemoryRecorder::new());
        let ledger = Ledger::new(recorder.clone());
        let fp = fingerprint("k");
        let mut medium = recorder.open_for_create_new(&fp.key()).unwrap();
        medium.write_all(b"{\"fmt\":0}\n").unwrap();

        assert!(ledger.open_for_reading(&fp).is_none());
        assert!(ledger.open_for_appending(&fp).is_none());
    }

    #[test]
    fn torn_tail_ends_the_ledger() {
        let recorder = Arc::new(MemoryRecorder::new());
        let ledger = Ledger::new(recorder.clone());
        let fp = fingerprint("k");
        let writer = ledger.open_for_creating_new(&fp).unwrap();
        writer.append(&record(1, None)).unwrap();
        let mut medium = recorder.open_for_append(&fp.key()).unwrap();
        medium.write_all(b"{\"sid\":\"upl").unwrap();

        let records = ledger.open_for_reading(&fp).unwrap().records();
        assert_eq!(records, vec![record(1, None)]);
    }

    #[test]
    fn appending_requires_existing_ledger() {
        let ledger = Ledger::new(Arc::new(MemoryRecorder::new()));
        let fp = fingerprint("k");
        assert!(ledger.open_for_appending(&fp).is_none());

        ledger.open_for_creating_new(&fp).unwrap();
        let writer = ledger.open_for_appending(&fp).unwrap();
        writer.append(&record(1, None)).unwrap();
        assert_eq!(ledger.open_for_reading(&fp).unwrap().records().len(), 1);
    }

    #[test]
    fn delete_removes_and_tolerates_absence() {
        let ledger = Ledger::new(Arc::new(MemoryRecorder::new()));
        let fp = fingerprint("k");
        ledger.delete(&fp);
        ledger.open_for_creating_new(&fp).unwrap();
        ledger.delete(&fp);
        assert!(ledger.open_for_reading(&fp).is_none());
    }

    #[test]
    fn other_fingerprint_sees_nothing() {
        let ledger = Ledger::new(Arc::new(MemoryRecorder::new()));
        ledger.open_for_creating_new(&fingerprint("a")).unwrap();
        assert!(ledger.open_for_reading(&fingerprint("b")).is_none());
    }
}
