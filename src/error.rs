//! Errors this crate can emit.
use crate::checksum::Checksum;
use crate::source::PartNumber;
use crate::uri::ObjectUri;

use std::fmt::{self, Display, Formatter};

/// A specialized `Result` type for this crate.
pub type Result<T, E = Error> = ::std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The value returned in this crate when an error occurs.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(pub(crate) ErrorRepr);

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            ErrorRepr::Transient(_) => ErrorKind::Transient,
            ErrorRepr::Remote { .. } => ErrorKind::Remote,
            ErrorRepr::SessionExpired(_) => ErrorKind::SessionExpired,
            ErrorRepr::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            ErrorRepr::ChecksumMismatch { .. } | ErrorRepr::ShortBody { .. } => {
                ErrorKind::Integrity
            }
            ErrorRepr::Io(_) => ErrorKind::Io,
            ErrorRepr::Missing(_, _) => ErrorKind::Config,
            ErrorRepr::Cancelled => ErrorKind::Cancelled,
            ErrorRepr::Part { source, .. } => source.kind(),
            ErrorRepr::StdDyn(_) => ErrorKind::Unknown,
            ErrorRepr::Any { kind, .. } => *kind,
        }
    }

    /// Whether sending the same request again might succeed.
    ///
    /// Only transient network or server failures are retryable. Every other
    /// kind means the attempt cannot succeed as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// A failure of the transport that may succeed on a later attempt, e.g. a
    /// timeout or a 5xx response.
    pub fn transient<E>(e: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self(ErrorRepr::Transient(e.into()))
    }

    /// A definitive rejection by the remote side.
    pub fn remote<T: Into<String>>(status: u16, msg: T) -> Self {
        Self(ErrorRepr::Remote {
            status,
            msg: msg.into(),
        })
    }

    /// The remote session (upload id or block token) is no longer valid.
    pub fn session_expired<T: Into<String>>(session: T) -> Self {
        Self(ErrorRepr::SessionExpired(session.into()))
    }

    /// The object no longer has the identity (entity tag) it was probed with.
    pub fn identity_mismatch<T: Into<String>, U: Into<String>>(expected: T, found: U) -> Self {
        Self(ErrorRepr::IdentityMismatch {
            expected: expected.into(),
            found: found.into(),
        })
    }

    pub(crate) fn checksum_mismatch(local: &Checksum, remote: &Checksum) -> Self {
        Self(ErrorRepr::ChecksumMismatch {
            local: local.to_hex(),
            remote: remote.to_hex(),
        })
    }

    pub(crate) fn short_body(expected: u64, found: u64) -> Self {
        Self(ErrorRepr::ShortBody { expected, found })
    }

    /// Wrap any error as an error of unknown kind.
    pub fn from_dyn<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let err = Box::new(e);
        Self(ErrorRepr::StdDyn(err))
    }

    /// Create an error of the given kind with a static message.
    pub fn from_kind(kind: ErrorKind, msg: &'static str) -> Self {
        Self(ErrorRepr::Any { kind, msg })
    }

    pub(crate) fn cancelled() -> Self {
        Self(ErrorRepr::Cancelled)
    }

    pub(crate) fn in_part(self, uri: &ObjectUri, part: PartNumber) -> Self {
        match self.0 {
            ErrorRepr::Part { .. } => self,
            _ => Self(ErrorRepr::Part {
                uri: uri.clone(),
                part,
                source: Box::new(self),
            }),
        }
    }
}

impl From<ErrorRepr> for Error {
    fn from(value: ErrorRepr) -> Self {
        Self(value)
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self(ErrorRepr::Io(value))
    }
}

/// The category of the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Network or server failure that may be retried.
    Transient,
    /// The object changed while it was being transferred.
    IdentityMismatch,
    /// A checksum or length disagreed with the data.
    Integrity,
    /// The remote session backing a transfer expired.
    SessionExpired,
    /// The remote side rejected the request for good.
    Remote,
    /// Local I/O failed.
    Io,
    /// The transfer was misconfigured.
    Config,
    /// The transfer was cancelled because a sibling part failed.
    Cancelled,
    Unknown,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::IdentityMismatch => write!(f, "identity mismatch"),
            Self::Integrity => write!(f, "integrity"),
            Self::SessionExpired => write!(f, "session expired"),
            Self::Remote => write!(f, "remote"),
            Self::Io => write!(f, "io"),
            Self::Config => write!(f, "config"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Internal error type that we are free to change at will.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ErrorRepr {
    #[error("transient failure: {0}")]
    Transient(BoxError),
    #[error("remote rejected request with status {status}: {msg}")]
    Remote { status: u16, msg: String },
    #[error("session {0} expired")]
    SessionExpired(String),
    #[error("object identity changed during transfer: expected {expected}, got {found}")]
    IdentityMismatch { expected: String, found: String },
    #[error("checksum mismatch: local {local}, remote {remote}")]
    ChecksumMismatch { local: String, remote: String },
    #[error("body was {found} bytes, expected {expected}")]
    ShortBody { expected: u64, found: u64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} missing required field: {1}")]
    Missing(&'static str, &'static str),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("transferring {part} of {uri} failed: {source}")]
    Part {
        uri: ObjectUri,
        part: PartNumber,
        source: Box<Error>,
    },
    #[error("{kind} error: {msg}")]
    Any { kind: ErrorKind, msg: &'static str },
    #[error(transparent)]
    StdDyn(BoxError),
}
