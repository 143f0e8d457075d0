use super::request::*;
use super::{DownloadApi, MultipartApi};
use crate::checksum::Checksum;
use crate::error::{Error, ErrorKind, ErrorRepr, Result};

use aws_config::SdkConfig;
use aws_sdk_s3 as s3;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    ChecksumAlgorithm, ChecksumMode, CompletedMultipartUpload, CompletedPart as SdkCompletedPart,
};
use futures::stream::{self, StreamExt as _};

/// S3 [`Client`] type from the AWS SDK.
///
/// Implements the session upload protocol with `CreateMultipartUpload`,
/// `UploadPart` and `CompleteMultipartUpload`, sending a SHA-256 checksum
/// with every part, and downloads with `HeadObject` and ranged `GetObject`.
///
/// The SDK owns retries, so endpoints in requests are not used here.
///
/// [`Client`]: aws_sdk_s3::Client
#[derive(Debug, Clone)]
pub struct SdkClient(s3::Client);

impl SdkClient {
    /// Create a new `SdkClient` from an existing SDK `Client`.
    ///
    /// [`Client`]: aws_sdk_s3::Client
    pub fn new(client: s3::Client) -> Self {
        SdkClient(client)
    }

    /// Create a new `SdkClient` from an [`SdkConfig`].
    ///
    /// [`SdkConfig`]: aws_config::SdkConfig
    pub fn from_sdk_config(config: SdkConfig) -> Self {
        let client = s3::Client::new(&config);
        Self::new(client)
    }

    /// Create a new `SdkClient` from the default configuration chain.
    pub async fn defaults() -> Self {
        let config = aws_config::load_from_env().await;
        Self::from_sdk_config(config)
    }
}

impl MultipartApi for SdkClient {
    async fn initiate(&self, req: InitiateRequest) -> Result<InitiatedSession> {
        req.validate()?;
        let resp = self
            .0
            .create_multipart_upload()
            .bucket(&*req.uri.bucket)
            .key(&*req.uri.key)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .set_content_type(req.content_type.clone())
            .send()
            .await
            .map_err(from_sdk_err)?;

        let id = resp
            .upload_id()
            .ok_or(ErrorRepr::Missing("CreateMultipartUploadOutput", "upload_id"))?;
        let mut session = InitiatedSession::new(id);
        if let Some(abort_at) = resp.abort_date().and_then(|d| u64::try_from(d.secs()).ok()) {
            session = session.expires_at(abort_at);
        }
        Ok(session)
    }

    async fn upload_part(&self, req: UploadPartRequest) -> Result<UploadPartResponse> {
        req.validate()?;
        let size = req.body.len() as u64;
        let part_number = i32::try_from(req.part_number.get())
            .map_err(|_| Error::from_kind(ErrorKind::Config, "part number out of range"))?;
        let resp = self
            .0
            .upload_part()
            .bucket(&*req.uri.bucket)
            .key(&*req.uri.key)
            .upload_id(&req.session_id)
            .part_number(part_number)
            .content_length(size as i64)
            .checksum_sha256(req.checksum.to_base64())
            .body(ByteStream::from(req.body.clone()))
            .send()
            .await
            .map_err(from_sdk_err)?;
        req.progress.set_in_flight(size);

        let etag = resp
            .e_tag()
            .ok_or(ErrorRepr::Missing("UploadPartOutput", "e_tag"))?;
        let checksum = resp.checksum_sha256().and_then(Checksum::from_base64);
        Ok(UploadPartResponse::new(etag, checksum))
    }

    async fn complete(&self, req: CompleteRequest) -> Result<CompletedObject> {
        req.validate()?;
        let mut parts = Vec::with_capacity(req.parts.len());
        for part in &req.parts {
            let part_number = i32::try_from(part.part_number.get()).map_err(|_| {
                Error::from_kind(ErrorKind::Config, "part number out of range")
            })?;
            parts.push(
                SdkCompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(&part.etag)
                    .set_checksum_sha256(part.checksum.as_ref().map(Checksum::to_base64))
                    .build(),
            );
        }
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let resp = self
            .0
            .complete_multipart_upload()
            .bucket(&*req.uri.bucket)
            .key(&*req.uri.key)
            .upload_id(&req.session_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(from_sdk_err)?;

        let etag = resp
            .e_tag()
            .ok_or(ErrorRepr::Missing("CompleteMultipartUploadOutput", "e_tag"))?;
        Ok(CompletedObject::new(req.uri, etag))
    }
}

impl DownloadApi for SdkClient {
    async fn head(&self, req: HeadRequest) -> Result<ObjectInfo> {
        req.validate()?;
        let resp = self
            .0
            .head_object()
            .bucket(&*req.uri.bucket)
            .key(&*req.uri.key)
            .checksum_mode(ChecksumMode::Enabled)
            .send()
            .await
            .map_err(from_sdk_err)?;

        let etag = resp
            .e_tag()
            .ok_or(ErrorRepr::Missing("HeadObjectOutput", "e_tag"))?;
        let size = resp.content_length().and_then(|n| u64::try_from(n).ok());
        Ok(ObjectInfo {
            size,
            etag: etag.to_owned(),
            content_encoding: resp.content_encoding().map(str::to_owned),
            // Composite checksums of multipart objects do not decode and are
            // skipped.
            checksum: resp.checksum_sha256().and_then(Checksum::from_base64),
        })
    }

    async fn get_range(&self, req: GetRangeRequest) -> Result<RangeResponse> {
        req.validate()?;
        let resp = self
            .0
            .get_object()
            .bucket(&*req.uri.bucket)
            .key(&*req.uri.key)
            .set_range(req.range_header())
            .set_if_match(req.if_match.clone())
            .send()
            .await
            .map_err(from_sdk_err)?;

        let etag = resp
            .e_tag()
            .ok_or(ErrorRepr::Missing("GetObjectOutput", "e_tag"))?
            .to_owned();
        let content_encoding = resp.content_encoding().map(str::to_owned);
        let body = stream::unfold(resp.body, |mut body| async move {
            let chunk = body.next().await?;
            Some((chunk.map_err(Error::transient), body))
        })
        .boxed();

        Ok(RangeResponse {
            etag,
            content_encoding,
            body,
        })
    }
}

/// Sort an SDK error into the categories the engine acts on.
fn from_sdk_err<E>(e: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    if matches!(e, SdkError::ConstructionFailure(_)) {
        return Error::from_dyn(e);
    }
    let status = match &e {
        SdkError::ServiceError(se) => Some(se.raw().status().as_u16()),
        _ => None,
    };
    let Some(status) = status else {
        return Error::transient(e);
    };
    if status >= 500 || status == 429 {
        return Error::transient(e);
    }
    match e.code() {
        Some("NoSuchUpload") => Error::session_expired(e.message().unwrap_or("NoSuchUpload")),
        Some("PreconditionFailed") => Error::identity_mismatch("If-Match", "changed object"),
        code => Error::remote(status, e.message().or(code).unwrap_or("unknown error")),
    }
}
