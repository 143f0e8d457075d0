use crate::checksum::Checksum;
use crate::progress::PartProgress;
use crate::source::PartNumber;
use crate::uri::{Endpoints, ObjectUri};

use bytes::Bytes;

/// Request object for uploading one block.
#[derive(Debug, Clone)]
pub struct MakeBlockRequest {
    pub(crate) uri: ObjectUri,
    pub(crate) part_number: PartNumber,
    pub(crate) offset: u64,
    pub(crate) body: Bytes,
    pub(crate) checksum: Checksum,
    pub(crate) endpoints: Endpoints,
    pub(crate) progress: PartProgress,
}

impl MakeBlockRequest {
    /// The object the block will be part of.
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    pub fn part_number(&self) -> PartNumber {
        self.part_number
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn progress(&self) -> &PartProgress {
        &self.progress
    }
}

/// Response to a block upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockResponse {
    /// Opaque context chaining the block into the object.
    pub context: String,
    pub checksum: Option<Checksum>,
    /// Unix seconds after which the context can no longer be used.
    pub expires_at: Option<u64>,
}

impl BlockResponse {
    pub fn new<T: Into<String>>(context: T) -> Self {
        Self {
            context: context.into(),
            checksum: None,
            expires_at: None,
        }
    }

    pub fn checksum(self, checksum: Checksum) -> Self {
        Self {
            checksum: Some(checksum),
            ..self
        }
    }

    pub fn expires_at(self, expires_at: u64) -> Self {
        Self {
            expires_at: Some(expires_at),
            ..self
        }
    }
}

/// Request object for assembling an object from its blocks.
#[derive(Debug, Clone)]
pub struct MakeFileRequest {
    pub(crate) uri: ObjectUri,
    pub(crate) size: u64,
    pub(crate) contexts: Vec<String>,
    pub(crate) endpoints: Endpoints,
}

impl MakeFileRequest {
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    /// Size of the whole object.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Block contexts in object order.
    pub fn contexts(&self) -> &[String] {
        &self.contexts
    }

    /// The contexts joined the way the wire expects them.
    pub fn joined_contexts(&self) -> String {
        self.contexts.join(",")
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }
}
