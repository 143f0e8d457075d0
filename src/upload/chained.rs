use super::{InitializedTransfer, MultipartUploader, TransferParams, UploadedPart};
use crate::checksum::Checksum;
use crate::client::BlockApi;
use crate::client::request::{CompletedObject, MakeBlockRequest, MakeFileRequest};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::progress::PartProgress;
use crate::source::SourcePart;
use crate::uri::Endpoints;

use uuid::Uuid;

/// Size of every block but the last in the block-chaining protocol.
pub const BLOCK_SIZE: u64 = 4 << 20;

/// Uploads with the block-chaining protocol.
///
/// There is no remote session to acquire: the session id is generated
/// locally and only ties checkpoints together. Each block context is the
/// part's token, and contexts are valid until the expiry the remote side
/// reports with them.
#[derive(Debug, Clone)]
pub struct ChainedUploader<C> {
    client: C,
    ledger: Ledger,
    endpoints: Endpoints,
}

impl<C: BlockApi> ChainedUploader<C> {
    pub fn new(client: C, ledger: Ledger, endpoints: Endpoints) -> Self {
        Self {
            client,
            ledger,
            endpoints,
        }
    }
}

impl<C: BlockApi> MultipartUploader for ChainedUploader<C> {
    fn part_size(&self, _: u64) -> u64 {
        BLOCK_SIZE
    }

    async fn initialize(&self, params: &TransferParams) -> Result<InitializedTransfer> {
        let session_id = Uuid::now_v7().to_string();
        Ok(InitializedTransfer::start(
            &self.ledger,
            params,
            session_id,
            None,
        ))
    }

    fn try_to_resume(&self, params: &TransferParams) -> Option<InitializedTransfer> {
        InitializedTransfer::resume(&self.ledger, params)
    }

    async fn upload_part(
        &self,
        transfer: &InitializedTransfer,
        part: &SourcePart,
        progress: &PartProgress,
    ) -> Result<UploadedPart> {
        if let Some(record) = transfer.checkpoint(part) {
            progress.set_in_flight(part.size());
            return Ok(UploadedPart::from_checkpoint(part, record));
        }

        let body = part.read().await?;
        let checksum = Checksum::digest(body.clone()).await?;
        let req = MakeBlockRequest {
            uri: transfer.uri().clone(),
            part_number: part.part_number(),
            offset: part.offset(),
            body,
            checksum,
            endpoints: self.endpoints.clone(),
            progress: progress.clone(),
        };
        let resp = self.client.make_block(req).await?;
        if let Some(remote) = &resp.checksum {
            if *remote != checksum {
                return Err(Error::checksum_mismatch(&checksum, remote));
            }
        }

        let record = transfer.record_for(
            part,
            resp.context.clone(),
            resp.expires_at,
            Some(checksum.to_hex()),
        );
        transfer.append(&record);
        Ok(UploadedPart::uploaded(part, resp.context, checksum))
    }

    async fn complete_parts(
        &self,
        transfer: InitializedTransfer,
        parts: &[UploadedPart],
    ) -> Result<CompletedObject> {
        let req = MakeFileRequest {
            uri: transfer.uri().clone(),
            size: parts.iter().map(|p| p.size).sum(),
            contexts: parts.iter().map(|p| p.token.clone()).collect(),
            endpoints: self.endpoints.clone(),
        };
        let result = self.client.make_file(req).await;
        transfer.finish(&result);
        result
    }
}
