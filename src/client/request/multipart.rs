use super::validate_uri;
use crate::checksum::Checksum;
use crate::error::{ErrorRepr, Result};
use crate::progress::PartProgress;
use crate::source::PartNumber;
use crate::uri::{Endpoints, ObjectUri};

use bytes::Bytes;

/// Request object for starting an upload session.
#[derive(Debug, Clone)]
pub struct InitiateRequest {
    pub(crate) uri: ObjectUri,
    pub(crate) endpoints: Endpoints,
    pub(crate) content_type: Option<String>,
}

impl InitiateRequest {
    pub(crate) fn new(uri: &ObjectUri, endpoints: &Endpoints, content_type: Option<&str>) -> Self {
        Self {
            uri: uri.clone(),
            endpoints: endpoints.clone(),
            content_type: content_type.map(str::to_owned),
        }
    }

    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_uri(&self.uri, "InitiateRequest")
    }
}

/// A started upload session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiatedSession {
    pub session_id: String,
    /// Unix seconds after which the remote side may forget the session.
    pub expires_at: Option<u64>,
}

impl InitiatedSession {
    pub fn new<T: Into<String>>(session_id: T) -> Self {
        Self {
            session_id: session_id.into(),
            expires_at: None,
        }
    }

    pub fn expires_at(self, expires_at: u64) -> Self {
        Self {
            expires_at: Some(expires_at),
            ..self
        }
    }
}

/// Request object for uploading one part to a session.
#[derive(Debug, Clone)]
pub struct UploadPartRequest {
    pub(crate) uri: ObjectUri,
    pub(crate) session_id: String,
    pub(crate) part_number: PartNumber,
    pub(crate) body: Bytes,
    pub(crate) checksum: Checksum,
    pub(crate) endpoints: Endpoints,
    pub(crate) progress: PartProgress,
}

impl UploadPartRequest {
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn part_number(&self) -> PartNumber {
        self.part_number
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// SHA-256 of the body, computed locally.
    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Handle to report bytes sent so far.
    pub fn progress(&self) -> &PartProgress {
        &self.progress
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_uri(&self.uri, "UploadPartRequest")?;
        if self.session_id.is_empty() {
            return Err(ErrorRepr::Missing("UploadPartRequest", "empty session id").into());
        }
        Ok(())
    }
}

/// Response to a part upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPartResponse {
    pub etag: String,
    /// SHA-256 of the part as computed by the remote side, if it reports one.
    pub checksum: Option<Checksum>,
}

impl UploadPartResponse {
    pub fn new<T: Into<String>>(etag: T, checksum: Option<Checksum>) -> Self {
        Self {
            etag: etag.into(),
            checksum,
        }
    }
}

/// A part as it is referenced when completing the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: PartNumber,
    pub etag: String,
    pub checksum: Option<Checksum>,
}

/// Request object for completing a session.
#[derive(Debug, Clone)]
pub struct CompleteRequest {
    pub(crate) uri: ObjectUri,
    pub(crate) session_id: String,
    pub(crate) parts: Vec<CompletedPart>,
    pub(crate) endpoints: Endpoints,
}

impl CompleteRequest {
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Parts in object order.
    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_uri(&self.uri, "CompleteRequest")?;
        if self.session_id.is_empty() {
            return Err(ErrorRepr::Missing("CompleteRequest", "empty session id").into());
        }
        Ok(())
    }
}
