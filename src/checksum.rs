//! Content digests used to check part integrity.
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::io;

/// SHA-256 digest of some content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 32]);

impl Checksum {
    /// Digest a complete buffer.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = ChecksumHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Digest `data` on the blocking thread pool.
    pub async fn digest(data: Bytes) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::of(&data))
            .await
            .map_err(io::Error::other)
    }

    /// Parse a lowercase or uppercase hex digest.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    /// Parse a standard base64 digest, the form S3 uses in checksum headers.
    pub fn from_base64(s: &str) -> Option<Self> {
        let bytes = BASE64.decode(s).ok()?;
        Self::from_slice(&bytes)
    }

    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(self.0)
    }
}

impl Display for Checksum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental [`Checksum`] computation over data arriving in chunks.
#[derive(Debug, Clone, Default)]
pub struct ChecksumHasher(Sha256);

impl ChecksumHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finish(self) -> Checksum {
        Checksum(self.0.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_base64_agree() {
        let sum = Checksum::of(b"hello world");
        assert_eq!(
            sum.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(Checksum::from_hex(&sum.to_hex()), Some(sum));
        assert_eq!(Checksum::from_base64(&sum.to_base64()), Some(sum));
    }

    #[test]
    fn chunked_matches_whole() {
        let mut hasher = ChecksumHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finish(), Checksum::of(b"hello world"));
    }

    #[tokio::test]
    async fn digest_off_the_task_matches_inline() {
        let data = Bytes::from(vec![7u8; 3 << 20]);
        let sum = Checksum::digest(data.clone()).await.unwrap();
        assert_eq!(sum, Checksum::of(&data));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Checksum::from_hex("abcd").is_none());
        assert!(Checksum::from_base64("not base64!").is_none());
    }
}
