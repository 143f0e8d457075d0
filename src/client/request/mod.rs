//! Request and response objects exchanged with the collaborators.
use crate::error::{ErrorRepr, Result};
use crate::uri::ObjectUri;

mod block;
pub use block::{BlockResponse, MakeBlockRequest, MakeFileRequest};

mod download;
pub use download::{BodyStream, GetRangeRequest, HeadRequest, ObjectInfo, RangeResponse};

mod multipart;
pub use multipart::{
    CompleteRequest, CompletedPart, InitiateRequest, InitiatedSession, UploadPartRequest,
    UploadPartResponse,
};

/// The object that an upload assembled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedObject {
    pub uri: ObjectUri,
    /// Entity tag of the assembled object.
    pub etag: String,
}

impl CompletedObject {
    pub fn new<T: Into<String>>(uri: ObjectUri, etag: T) -> Self {
        Self {
            uri,
            etag: etag.into(),
        }
    }
}

fn validate_uri(uri: &ObjectUri, request: &'static str) -> Result<()> {
    if uri.is_empty() {
        return Err(ErrorRepr::Missing(request, "empty bucket and/or key").into());
    }
    Ok(())
}
