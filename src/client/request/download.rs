use super::validate_uri;
use crate::checksum::Checksum;
use crate::error::Result;
use crate::uri::{Endpoints, ObjectUri};

use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt::{self, Debug, Formatter};
use std::ops::Range;

/// Body of a ranged response, as it arrives.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// Request object for probing an object.
#[derive(Debug, Clone)]
pub struct HeadRequest {
    pub(crate) uri: ObjectUri,
    pub(crate) endpoints: Endpoints,
}

impl HeadRequest {
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_uri(&self.uri, "HeadRequest")
    }
}

/// What a probe found out about an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Size of the stored object. `None` forces a streamed download.
    pub size: Option<u64>,
    /// Strong identity of the object's current version.
    pub etag: String,
    /// Encoding the object is stored with, e.g. `gzip`.
    pub content_encoding: Option<String>,
    /// SHA-256 of the whole object, if the remote side knows it.
    pub checksum: Option<Checksum>,
}

impl ObjectInfo {
    pub fn new<T: Into<String>>(size: Option<u64>, etag: T) -> Self {
        Self {
            size,
            etag: etag.into(),
            content_encoding: None,
            checksum: None,
        }
    }
}

/// Request object for fetching a range of an object.
#[derive(Debug, Clone)]
pub struct GetRangeRequest {
    pub(crate) uri: ObjectUri,
    pub(crate) range: Option<Range<u64>>,
    pub(crate) if_match: Option<String>,
    pub(crate) endpoints: Endpoints,
}

impl GetRangeRequest {
    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    /// Bytes requested, end exclusive. `None` requests the whole object.
    pub fn range(&self) -> Option<Range<u64>> {
        self.range.clone()
    }

    /// The identity the object is expected to have.
    pub fn if_match(&self) -> Option<&str> {
        self.if_match.as_deref()
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// The value of an HTTP `Range` header for this request.
    pub fn range_header(&self) -> Option<String> {
        self.range
            .as_ref()
            .map(|r| format!("bytes={}-{}", r.start, r.end.saturating_sub(1)))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_uri(&self.uri, "GetRangeRequest")
    }
}

/// A response to a ranged fetch.
pub struct RangeResponse {
    /// Identity of the version the bytes came from.
    pub etag: String,
    /// Encoding of `body` on the wire, e.g. `gzip`.
    pub content_encoding: Option<String>,
    pub body: BodyStream,
}

impl RangeResponse {
    pub fn new<T: Into<String>>(etag: T, body: BodyStream) -> Self {
        Self {
            etag: etag.into(),
            content_encoding: None,
            body,
        }
    }

    pub fn content_encoding<T: Into<String>>(self, encoding: T) -> Self {
        Self {
            content_encoding: Some(encoding.into()),
            ..self
        }
    }
}

impl Debug for RangeResponse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeResponse")
            .field("etag", &self.etag)
            .field("content_encoding", &self.content_encoding)
            .field("body", &"Stream<Item = Result<Bytes>>")
            .finish()
    }
}
