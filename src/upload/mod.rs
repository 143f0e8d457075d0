//! The upload engine.
//!
//! [`MultipartUploader`] is the lifecycle shared by both protocols:
//! initialize a session or resume one from the ledger, upload parts, then
//! complete. [`ChainedUploader`] speaks the block-chaining protocol and
//! [`SessionUploader`] the session protocol. [`Uploader`] drives either of
//! them over a [`DataSource`] with a scheduler.
use crate::cancel::CancelCause;
use crate::checksum::Checksum;
use crate::client::request::CompletedObject;
use crate::error::{Error, ErrorKind, Result};
use crate::fingerprint::Fingerprint;
use crate::ledger::CheckpointRecord;
use crate::progress::{PartProgress, Progresses};
use crate::scheduler::{Placed, Scheduler};
use crate::source::{DataSource, PartNumber, SourcePart};
use crate::uri::ObjectUri;
use crate::TransferConfig;

use std::future::Future;

mod chained;
pub use chained::{BLOCK_SIZE, ChainedUploader};

mod session;
pub use session::SessionUploader;

mod transfer;
pub use transfer::InitializedTransfer;

/// One upload protocol.
pub trait MultipartUploader: Send + Sync {
    /// The part size this protocol uploads with when `requested` is asked
    /// for.
    fn part_size(&self, requested: u64) -> u64;

    /// Start a new session.
    fn initialize(
        &self,
        params: &TransferParams,
    ) -> impl Future<Output = Result<InitializedTransfer>> + Send;

    /// Pick up the session recorded in the ledger, without any network call.
    ///
    /// Returns `None` when there is nothing to resume, in which case the
    /// caller initializes a new session.
    fn try_to_resume(&self, params: &TransferParams) -> Option<InitializedTransfer>;

    /// Upload one part, or skip it if a matching checkpoint exists.
    fn upload_part(
        &self,
        transfer: &InitializedTransfer,
        part: &SourcePart,
        progress: &PartProgress,
    ) -> impl Future<Output = Result<UploadedPart>> + Send;

    /// Assemble the object from `parts`, which are in offset order.
    ///
    /// Ends the transfer: the ledger is deleted on success or on a failure
    /// that cannot be retried, and kept otherwise.
    fn complete_parts(
        &self,
        transfer: InitializedTransfer,
        parts: &[UploadedPart],
    ) -> impl Future<Output = Result<CompletedObject>> + Send;
}

/// What one upload attempt is about.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub(crate) uri: ObjectUri,
    pub(crate) total_size: Option<u64>,
    pub(crate) part_size: u64,
    pub(crate) fingerprint: Option<Fingerprint>,
    pub(crate) content_type: Option<String>,
}

impl TransferParams {
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    /// `None` when the transfer cannot be resumed.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }
}

/// A part that the remote side has.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: PartNumber,
    pub offset: u64,
    pub size: u64,
    /// Entity tag or block context.
    pub token: String,
    pub checksum: Option<Checksum>,
    /// Whether the part was taken from a checkpoint instead of uploaded.
    pub resumed: bool,
}

impl UploadedPart {
    fn uploaded(part: &SourcePart, token: String, checksum: Checksum) -> Self {
        Self {
            part_number: part.part_number(),
            offset: part.offset(),
            size: part.size(),
            token,
            checksum: Some(checksum),
            resumed: false,
        }
    }

    fn from_checkpoint(part: &SourcePart, record: &CheckpointRecord) -> Self {
        Self {
            part_number: part.part_number(),
            offset: part.offset(),
            size: part.size(),
            token: record.part_token.clone(),
            checksum: record.digest.as_deref().and_then(Checksum::from_hex),
            resumed: true,
        }
    }
}

impl Placed for UploadedPart {
    fn offset(&self) -> u64 {
        self.offset
    }
}

/// How a source is cut into parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumablePolicy {
    /// The whole source is one part.
    SinglePart,
    /// The source is cut into parts of the configured size.
    MultiParts,
}

impl ResumablePolicy {
    /// Sources of known size up to `threshold` bytes are uploaded as one part.
    pub fn choose(total_size: Option<u64>, threshold: u64) -> Self {
        match total_size {
            Some(total) if total <= threshold => Self::SinglePart,
            _ => Self::MultiParts,
        }
    }
}

/// Uploads sources with a [`MultipartUploader`].
///
/// Built by [`UploadBuilder`](crate::UploadBuilder).
#[derive(Debug)]
pub struct Uploader<U> {
    protocol: U,
    config: TransferConfig,
}

impl<U: MultipartUploader> Uploader<U> {
    pub(crate) fn new(protocol: U, config: TransferConfig) -> Self {
        Self { protocol, config }
    }

    /// The protocol, to drive the lifecycle by hand.
    pub fn protocol(&self) -> &U {
        &self.protocol
    }

    /// Upload `source` to `uri`.
    ///
    /// If an earlier attempt with the same object, source, part size and
    /// endpoints was interrupted, only the parts it did not finish are sent.
    pub async fn upload<S, T>(&self, uri: T, source: &S) -> Result<CompletedObject>
    where
        S: DataSource,
        T: Into<ObjectUri>,
    {
        self.upload_with_content_type(uri, source, None).await
    }

    /// Upload `source` to `uri`, setting the object's content type.
    pub async fn upload_with_content_type<S, T>(
        &self,
        uri: T,
        source: &S,
        content_type: Option<&str>,
    ) -> Result<CompletedObject>
    where
        S: DataSource,
        T: Into<ObjectUri>,
    {
        let uri = uri.into();
        let total_size = source.total_size();
        let policy = ResumablePolicy::choose(total_size, self.config.single_part_threshold);
        let requested = match (policy, total_size) {
            (ResumablePolicy::SinglePart, Some(total)) => total.max(1),
            _ => self.config.part_size,
        };
        let part_size = self.protocol.part_size(requested);
        let fingerprint = match (total_size, source.source_key()) {
            (Some(total), Some(key)) => Some(Fingerprint::new(
                &uri,
                key,
                part_size,
                total,
                &self.config.endpoints,
            )),
            _ => None,
        };
        let params = TransferParams {
            uri,
            total_size,
            part_size,
            fingerprint,
            content_type: content_type.map(str::to_owned),
        };
        let scheduler = if source.is_seekable() && policy == ResumablePolicy::MultiParts {
            Scheduler::with_concurrency(self.config.concurrency)
        } else {
            Scheduler::with_concurrency(1)
        };

        let mut transfer = match self.protocol.try_to_resume(&params) {
            Some(transfer) => transfer,
            None => self.protocol.initialize(&params).await?,
        };
        let parts = match self.run(&scheduler, &transfer, source, &params).await {
            Ok(parts) => parts,
            Err(e) if e.kind() == ErrorKind::SessionExpired && source.is_seekable() => {
                warn!(uri = %params.uri, session = %transfer.session_id(), "session expired, starting over");
                transfer.discard();
                source.reset().await?;
                transfer = self.protocol.initialize(&params).await?;
                match self.run(&scheduler, &transfer, source, &params).await {
                    Ok(parts) => parts,
                    Err(e) => {
                        transfer.close();
                        return Err(e);
                    }
                }
            }
            Err(e) => {
                transfer.close();
                return Err(e);
            }
        };

        let result = self.protocol.complete_parts(transfer, &parts).await;
        match &result {
            Ok(object) => debug!(uri = %object.uri, etag = %object.etag, parts = parts.len(), "upload complete"),
            Err(e) => warn!(error = %e, "completing upload failed"),
        }
        result
    }

    async fn run<S: DataSource>(
        &self,
        scheduler: &Scheduler,
        transfer: &InitializedTransfer,
        source: &S,
        params: &TransferParams,
    ) -> Result<Vec<UploadedPart>> {
        let progresses = Progresses::new(params.total_size, self.config.on_progress.clone());
        let part_size = params.part_size;
        let progresses = &progresses;

        let next = || async move { source.slice(part_size).await.map_err(Error::from) };
        let work = |part: SourcePart, cause: CancelCause| async move {
            let progress = progresses.add_part(part.size());
            let uploaded = tokio::select! {
                biased;
                _ = cause.cancelled() => Err(Error::cancelled()),
                result = self.upload_part(transfer, &part, &progress) => result,
            };
            let uploaded = uploaded.map_err(|e| e.in_part(&params.uri, part.part_number()))?;
            progress.commit();
            Ok::<_, Error>(uploaded)
        };
        scheduler.run(next, work).await
    }

    /// Upload a part, sending it again while the failure is retryable and
    /// attempts remain.
    async fn upload_part(
        &self,
        transfer: &InitializedTransfer,
        part: &SourcePart,
        progress: &PartProgress,
    ) -> Result<UploadedPart> {
        let attempts = self.config.part_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.protocol.upload_part(transfer, part, progress).await {
                Ok(uploaded) => {
                    trace!(part = %uploaded.part_number, resumed = uploaded.resumed, "part done");
                    return Ok(uploaded);
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(part = %part.part_number(), attempt, error = %e, "retrying part");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
