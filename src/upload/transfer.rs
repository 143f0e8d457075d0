use super::TransferParams;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::ledger::{CheckpointRecord, Ledger, LedgerWriter};
use crate::source::{PartNumber, SourcePart};
use crate::uri::ObjectUri;

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

/// The live session of one upload attempt.
///
/// Holds the session id, the checkpoints replayed from the ledger when the
/// attempt resumed, and the ledger writer that records parts as they
/// complete. It must be [`close`](InitializedTransfer::close)d when the
/// attempt ends, which releases the ledger writer.
#[derive(Debug)]
pub struct InitializedTransfer {
    uri: ObjectUri,
    session_id: String,
    expires_at: Option<u64>,
    resumed: bool,
    ledger: Ledger,
    fingerprint: Option<Fingerprint>,
    writer: Mutex<Option<LedgerWriter>>,
    checkpoints: HashMap<PartNumber, CheckpointRecord>,
}

impl InitializedTransfer {
    /// A fresh session. A new ledger replaces whatever was stored for the
    /// fingerprint, so records of an abandoned session never mix with this
    /// one.
    pub(crate) fn start(
        ledger: &Ledger,
        params: &TransferParams,
        session_id: String,
        expires_at: Option<u64>,
    ) -> Self {
        let writer = params
            .fingerprint
            .as_ref()
            .and_then(|fp| ledger.open_for_creating_new(fp));
        debug!(uri = %params.uri, session = %session_id, resumable = writer.is_some(), "initialized transfer");
        Self {
            uri: params.uri.clone(),
            session_id,
            expires_at,
            resumed: false,
            ledger: ledger.clone(),
            fingerprint: params.fingerprint.clone(),
            writer: Mutex::new(writer),
            checkpoints: HashMap::new(),
        }
    }

    /// Replay the ledger for `params`, if there is a usable one.
    ///
    /// The session is the one of the first record. Records of any
    /// other session are ignored.
    pub(crate) fn resume(ledger: &Ledger, params: &TransferParams) -> Option<Self> {
        let fingerprint = params.fingerprint.as_ref()?;
        let records = ledger.open_for_reading(fingerprint)?.records();
        let session_id = records.first()?.session_id.clone();

        let mut checkpoints = HashMap::new();
        for record in records {
            if record.session_id != session_id {
                trace!(session = %record.session_id, "ignoring record of another session");
                continue;
            }
            if let Some(part_number) = PartNumber::new(record.part_number) {
                checkpoints.insert(part_number, record);
            }
        }
        let expires_at = checkpoints.values().filter_map(|r| r.expires_at).min();
        let writer = ledger.open_for_appending(fingerprint);
        debug!(
            uri = %params.uri,
            session = %session_id,
            checkpoints = checkpoints.len(),
            "resuming transfer"
        );
        Some(Self {
            uri: params.uri.clone(),
            session_id,
            expires_at,
            resumed: true,
            ledger: ledger.clone(),
            fingerprint: Some(fingerprint.clone()),
            writer: Mutex::new(writer),
            checkpoints,
        })
    }

    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    /// Upload id, or the id of the block chain.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// When the remote side may forget the session, in unix seconds.
    pub fn expires_at(&self) -> Option<u64> {
        self.expires_at
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Number of checkpoints replayed from the ledger.
    pub fn checkpoints(&self) -> usize {
        self.checkpoints.len()
    }

    /// The checkpoint recorded for `part`, if it covers exactly the same
    /// range. A checkpoint for a range that changed is never reused.
    pub fn checkpoint(&self, part: &SourcePart) -> Option<&CheckpointRecord> {
        let record = self.checkpoints.get(&part.part_number())?;
        if record.offset != part.offset() || record.size != part.size() {
            debug!(
                part = %part.part_number(),
                "checkpoint does not match the part's range, uploading again"
            );
            return None;
        }
        Some(record)
    }

    /// A record for `part` in this session.
    pub(crate) fn record_for(
        &self,
        part: &SourcePart,
        token: String,
        expires_at: Option<u64>,
        digest: Option<String>,
    ) -> CheckpointRecord {
        CheckpointRecord {
            session_id: self.session_id.clone(),
            part_token: token,
            offset: part.offset(),
            part_number: part.part_number().get(),
            size: part.size(),
            expires_at,
            digest,
        }
    }

    /// Append `record` to the ledger.
    ///
    /// If the append fails the writer is dropped: the rest of this attempt
    /// carries on without being resumable.
    pub(crate) fn append(&self, record: &CheckpointRecord) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(w) = writer.as_ref() else {
            return;
        };
        if let Err(e) = w.append(record) {
            warn!(key = %w.key(), error = %e, "cannot append to ledger, no longer recording parts");
            *writer = None;
        }
    }

    /// Release the ledger writer. Closing twice is a no-op.
    pub fn close(&self) {
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if let Err(e) = writer.close() {
                warn!(error = %e, "cannot flush ledger");
            }
        }
    }

    /// Close, then delete the ledger: nothing in it will be useful again.
    pub(crate) fn discard(&self) {
        self.close();
        if let Some(fingerprint) = &self.fingerprint {
            self.ledger.delete(fingerprint);
        }
    }

    /// End the attempt with the result of completing it.
    ///
    /// The ledger is deleted when the object was assembled or can never be
    /// with this configuration, and kept when completion may succeed later.
    pub(crate) fn finish<T>(&self, result: &Result<T>) {
        match result {
            Err(e) if e.is_retryable() => {
                debug!(uri = %self.uri, error = %e, "completion failed, keeping ledger");
                self.close();
            }
            _ => self.discard(),
        }
    }
}
