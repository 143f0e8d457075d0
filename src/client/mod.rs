//! This module contains the collaborator interfaces the transfer engine talks
//! to: [`BlockApi`] and [`MultipartApi`] for the two upload protocols and
//! [`DownloadApi`] for ranged downloads.
//!
//! Transport, signing, endpoint failover and backoff belong to the
//! implementations. The engine only looks at [`Error::is_retryable`] to decide
//! whether re-driving a single part is worthwhile.
//!
//! [`Error::is_retryable`]: crate::error::Error::is_retryable
use crate::error::Result;

use std::future::Future;
use std::ops::Deref;

pub mod request;
use self::request::*;

mod sdk;
pub use sdk::SdkClient;

/// `BlockApi` is the block-chaining upload protocol.
///
/// Every block is uploaded on its own and answered with an opaque context.
/// The object is assembled from the ordered list of contexts; there is no
/// session on the remote side until then.
pub trait BlockApi: Send + Sync {
    /// Upload one block, returning its context.
    fn make_block(&self, req: MakeBlockRequest) -> impl Future<Output = Result<BlockResponse>> + Send;

    /// Assemble the object from the contexts of all of its blocks.
    fn make_file(&self, req: MakeFileRequest) -> impl Future<Output = Result<CompletedObject>> + Send;
}

/// `MultipartApi` is the session upload protocol: a session id is acquired
/// first and parts are uploaded under it by number.
pub trait MultipartApi: Send + Sync {
    /// Start a session, returning its id.
    fn initiate(
        &self,
        req: InitiateRequest,
    ) -> impl Future<Output = Result<InitiatedSession>> + Send;

    /// Upload one part to a session, returning the part's entity tag.
    ///
    /// An implementation should return [`Error::session_expired`] when the
    /// remote side no longer knows the session.
    ///
    /// [`Error::session_expired`]: crate::error::Error::session_expired
    fn upload_part(
        &self,
        req: UploadPartRequest,
    ) -> impl Future<Output = Result<UploadPartResponse>> + Send;

    /// Assemble the object from the parts uploaded to the session.
    fn complete(&self, req: CompleteRequest) -> impl Future<Output = Result<CompletedObject>> + Send;
}

/// `DownloadApi` probes an object and fetches byte ranges of it.
pub trait DownloadApi: Send + Sync {
    /// Get the size and identity of an object.
    fn head(&self, req: HeadRequest) -> impl Future<Output = Result<ObjectInfo>> + Send;

    /// Fetch a range of an object, or all of it.
    fn get_range(
        &self,
        req: GetRangeRequest,
    ) -> impl Future<Output = Result<RangeResponse>> + Send;
}

impl<D, T> BlockApi for T
where
    D: BlockApi,
    T: Deref<Target = D> + Send + Sync,
{
    async fn make_block(&self, req: MakeBlockRequest) -> Result<BlockResponse> {
        self.deref().make_block(req).await
    }

    async fn make_file(&self, req: MakeFileRequest) -> Result<CompletedObject> {
        self.deref().make_file(req).await
    }
}

impl<D, T> MultipartApi for T
where
    D: MultipartApi,
    T: Deref<Target = D> + Send + Sync,
{
    async fn initiate(&self, req: InitiateRequest) -> Result<InitiatedSession> {
        self.deref().initiate(req).await
    }

    async fn upload_part(&self, req: UploadPartRequest) -> Result<UploadPartResponse> {
        self.deref().upload_part(req).await
    }

    async fn complete(&self, req: CompleteRequest) -> Result<CompletedObject> {
        self.deref().complete(req).await
    }
}

impl<D, T> DownloadApi for T
where
    D: DownloadApi,
    T: Deref<Target = D> + Send + Sync,
{
    async fn head(&self, req: HeadRequest) -> Result<ObjectInfo> {
        self.deref().head(req).await
    }

    async fn get_range(&self, req: GetRangeRequest) -> Result<RangeResponse> {
        self.deref().get_range(req).await
    }
}
