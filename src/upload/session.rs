use super::{InitializedTransfer, MultipartUploader, TransferParams, UploadedPart};
use crate::checksum::Checksum;
use crate::client::MultipartApi;
use crate::client::request::{
    CompleteRequest, CompletedObject, CompletedPart, InitiateRequest, UploadPartRequest,
};
use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::progress::PartProgress;
use crate::source::SourcePart;
use crate::uri::Endpoints;

/// Uploads with the session protocol: one session id, many numbered parts.
#[derive(Debug, Clone)]
pub struct SessionUploader<C> {
    client: C,
    ledger: Ledger,
    endpoints: Endpoints,
}

impl<C: MultipartApi> SessionUploader<C> {
    pub fn new(client: C, ledger: Ledger, endpoints: Endpoints) -> Self {
        Self {
            client,
            ledger,
            endpoints,
        }
    }
}

impl<C: MultipartApi> MultipartUploader for SessionUploader<C> {
    fn part_size(&self, requested: u64) -> u64 {
        requested
    }

    async fn initialize(&self, params: &TransferParams) -> Result<InitializedTransfer> {
        let req = InitiateRequest::new(&params.uri, &self.endpoints, params.content_type());
        let session = self.client.initiate(req).await?;
        Ok(InitializedTransfer::start(
            &self.ledger,
            params,
            session.session_id,
            session.expires_at,
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
            trace!(part = %part.part_number(), "part found in checkpoint");
            progress.set_in_flight(part.size());
            return Ok(UploadedPart::from_checkpoint(part, record));
        }

        let body = part.read().await?;
        let checksum = Checksum::digest(body.clone()).await?;
        let req = UploadPartRequest {
            uri: transfer.uri().clone(),
            session_id: transfer.session_id().to_owned(),
            part_number: part.part_number(),
            body,
            checksum,
            endpoints: self.endpoints.clone(),
            progress: progress.clone(),
        };
        let resp = self.client.upload_part(req).await?;
        if let Some(remote) = &resp.checksum {
            if *remote != checksum {
                return Err(Error::checksum_mismatch(&checksum, remote));
            }
        }

        let record = transfer.record_for(
            part,
            resp.etag.clone(),
            transfer.expires_at(),
            Some(checksum.to_hex()),
        );
        transfer.append(&record);
        Ok(UploadedPart::uploaded(part, resp.etag, checksum))
    }

    async fn complete_parts(
        &self,
        transfer: InitializedTransfer,
        parts: &[UploadedPart],
    ) -> Result<CompletedObject> {
        let req = CompleteRequest {
            uri: transfer.uri().clone(),
            session_id: transfer.session_id().to_owned(),
            parts: parts
                .iter()
                .map(|p| CompletedPart {
                    part_number: p.part_number,
                    etag: p.token.clone(),
                    checksum: p.checksum,
                })
                .collect(),
            endpoints: self.endpoints.clone(),
        };
        let result = self.client.complete(req).await;
        transfer.finish(&result);
        result
    }
}
