//! Identity of a transfer, used to find the ledger it may resume from.
use crate::checksum::Checksum;
use crate::uri::{Endpoints, ObjectUri};

use serde_json::json;
use std::fmt::{self, Display, Formatter};

/// Version of the ledger layout. Part of the header, so a ledger written by a
/// different layout never matches.
pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// The canonical identity of a transfer's configuration.
///
/// Two attempts share a ledger if and only if their fingerprints are equal.
/// Changing any field (object, source, part size, total size, endpoint set)
/// starts from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    uri: ObjectUri,
    source: String,
    part_size: u64,
    total_size: u64,
    endpoints: Endpoints,
}

impl Fingerprint {
    /// Create a new fingerprint.
    ///
    /// `source` identifies the local side of the transfer, e.g. the absolute
    /// path of the file being uploaded or downloaded to.
    pub fn new<T: Into<String>>(
        uri: &ObjectUri,
        source: T,
        part_size: u64,
        total_size: u64,
        endpoints: &Endpoints,
    ) -> Self {
        Self {
            uri: uri.clone(),
            source: source.into(),
            part_size,
            total_size,
            endpoints: endpoints.clone(),
        }
    }

    pub fn uri(&self) -> &ObjectUri {
        &self.uri
    }

    pub fn part_size(&self) -> u64 {
        self.part_size
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// The canonical byte form written as the first line of a ledger.
    ///
    /// Object keys are emitted in sorted order and endpoints keep their order,
    /// so equal fingerprints always produce identical bytes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let header = json!({
            "fmt": LEDGER_FORMAT_VERSION,
            "bucket": &*self.uri.bucket,
            "object": &*self.uri.key,
            "source": self.source,
            "part_size": self.part_size,
            "total_size": self.total_size,
            "endpoints": self.endpoints.as_slice(),
        });
        header.to_string().into_bytes()
    }

    /// Storage key of the ledger for this fingerprint.
    pub fn key(&self) -> LedgerKey {
        let digest = Checksum::of(&self.canonical_bytes());
        LedgerKey(digest.to_hex())
    }
}

/// Digest of a [`Fingerprint`], naming its ledger in a recorder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LedgerKey(String);

impl LedgerKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for LedgerKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint() -> Fingerprint {
        let uri = ObjectUri::from(("bucket", "a/b.bin"));
        let endpoints = Endpoints::new(["https://up-1", "https://up-2"]);
        Fingerprint::new(&uri, "/tmp/b.bin", 4 << 20, 5 << 20, &endpoints)
    }

    #[test]
    fn equal_configurations_share_a_key() {
        assert_eq!(fingerprint().key(), fingerprint().key());
        assert_eq!(fingerprint().canonical_bytes(), fingerprint().canonical_bytes());
    }

    #[test]
    fn every_field_changes_the_key() {
        let base = fingerprint();
        let uri = ObjectUri::from(("bucket", "a/b.bin"));
        let endpoints = Endpoints::new(["https://up-1", "https://up-2"]);
        let variants = [
            Fingerprint::new(
                &ObjectUri::from(("bucket", "a/c.bin")),
                "/tmp/b.bin",
                4 << 20,
                5 << 20,
                &endpoints,
            ),
            Fingerprint::new(&uri, "/tmp/c.bin", 4 << 20, 5 << 20, &endpoints),
            Fingerprint::new(&uri, "/tmp/b.bin", 1 << 20, 5 << 20, &endpoints),
            Fingerprint::new(&uri, "/tmp/b.bin", 4 << 20, 6 << 20, &endpoints),
            Fingerprint::new(
                &uri,
                "/tmp/b.bin",
                4 << 20,
                5 << 20,
                &Endpoints::new(["https://up-2", "https://up-1"]),
            ),
        ];
        for variant in variants {
            assert_ne!(variant.key(), base.key());
        }
    }

    #[test]
    fn endpoint_boundaries_are_kept() {
        let uri = ObjectUri::from(("bucket", "key"));
        let joined = Fingerprint::new(&uri, "s", 1, 1, &Endpoints::new(["ab"]));
        let split = Fingerprint::new(&uri, "s", 1, 1, &Endpoints::new(["a", "b"]));
        assert_ne!(joined.key(), split.key());
    }
}
