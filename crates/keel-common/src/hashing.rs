//! Algorithm-tagged content digests
//!
//! A [`Hash`] pairs a digest with the algorithm that produced it. The string
//! form is `algo:hexlower`; unprefixed hex is accepted only when its length
//! identifies exactly one algorithm.

use std::fmt;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Error, Result};

const READ_CHUNK: usize = 64 * 1024;

/// Supported digest algorithms
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgorithm {
    /// MD5 (16 bytes); reported by object-store listings
    Md5,
    /// SHA-1 (20 bytes)
    Sha1,
    /// SHA-256 (32 bytes)
    Sha256,
}

impl HashAlgorithm {
    /// All algorithms, in the order prefixes are tried
    pub const ALL: [HashAlgorithm; 3] = [Self::Md5, Self::Sha1, Self::Sha256];

    /// Lowercase name used as the string prefix
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Digest size in bytes
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Start a streaming hasher for this algorithm
    pub fn new_hasher(&self) -> Hasher {
        match self {
            Self::Md5 => Hasher::Md5(Md5::new()),
            Self::Sha1 => Hasher::Sha1(Sha1::new()),
            Self::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    /// Parse an unprefixed hex digest for this algorithm
    pub fn parse_hex(&self, s: &str) -> Result<Hash> {
        if s.len() != self.digest_len() * 2 {
            return Err(Error::invalid_input(format!(
                "invalid {} hash - unexpected length {}",
                self.as_str(),
                s.len()
            )));
        }
        let bytes = hex::decode(s).map_err(|_| {
            Error::invalid_input(format!("invalid {} hash - unexpected length {}", self.as_str(), s.len()))
        })?;
        Hash::from_bytes(*self, bytes)
    }

    fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            32 => Some(Self::Md5),
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Incremental digest state
pub enum Hasher {
    /// MD5 state
    Md5(Md5),
    /// SHA-1 state
    Sha1(Sha1),
    /// SHA-256 state
    Sha256(Sha256),
}

impl Hasher {
    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Finish and produce the tagged digest
    pub fn finish(self) -> Hash {
        let (algorithm, value) = match self {
            Self::Md5(h) => (HashAlgorithm::Md5, h.finalize().to_vec()),
            Self::Sha1(h) => (HashAlgorithm::Sha1, h.finalize().to_vec()),
            Self::Sha256(h) => (HashAlgorithm::Sha256, h.finalize().to_vec()),
        };
        Hash { algorithm, value }
    }
}

/// A digest together with its algorithm
///
/// Equality is algorithm-scoped: digests from different algorithms never
/// compare equal, even if their bytes happen to match.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Hash {
    algorithm: HashAlgorithm,
    value: Vec<u8>,
}

impl Hash {
    /// Build a hash from raw digest bytes, checking the length
    pub fn from_bytes(algorithm: HashAlgorithm, value: Vec<u8>) -> Result<Self> {
        if value.len() != algorithm.digest_len() {
            return Err(Error::invalid_input(format!(
                "invalid {} hash - unexpected length {}",
                algorithm,
                value.len() * 2
            )));
        }
        Ok(Self { algorithm, value })
    }

    /// Algorithm that produced this digest
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.value
    }

    /// Lowercase hex digest without the algorithm prefix
    pub fn hex(&self) -> String {
        hex::encode(&self.value)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        for algorithm in HashAlgorithm::ALL {
            if let Some(rest) = s
                .strip_prefix(algorithm.as_str())
                .and_then(|r| r.strip_prefix(':'))
            {
                return algorithm.parse_hex(rest);
            }
        }
        match HashAlgorithm::from_hex_len(s.len()) {
            Some(algorithm) => algorithm.parse_hex(s),
            None => Err(Error::invalid_input(format!(
                "cannot determine algorithm for hash: {}",
                s.len()
            ))),
        }
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Hash an in-memory buffer
pub fn hash_bytes(algorithm: HashAlgorithm, data: &[u8]) -> Hash {
    let mut hasher = algorithm.new_hasher();
    hasher.update(data);
    hasher.finish()
}

/// Hash a reader, consuming it to EOF
pub async fn hash_reader<R>(reader: &mut R, algorithm: HashAlgorithm) -> Result<Hash>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut hasher = algorithm.new_hasher();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| Error::io("hashing stream", e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

/// Hash a local file
pub async fn hash_file(path: impl AsRef<std::path::Path>, algorithm: HashAlgorithm) -> Result<Hash> {
    let path = path.as_ref();
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| Error::io(format!("opening {}", path.display()), e))?;
    hash_reader(&mut file, algorithm).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA256_HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn parses_prefixed_forms() {
        let h: Hash = format!("sha256:{SHA256_HELLO}").parse().unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Sha256);
        assert_eq!(h.hex(), SHA256_HELLO);

        let h: Hash = "md5:5d41402abc4b2a76b9719d911017c592".parse().unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Md5);

        let h: Hash = "sha1:aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d".parse().unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Sha1);
    }

    #[test]
    fn unprefixed_length_selects_algorithm() {
        let h: Hash = "5d41402abc4b2a76b9719d911017c592".parse().unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Md5);
        let h: Hash = SHA256_HELLO.parse().unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Sha256);
    }

    #[test]
    fn sixty_three_hex_chars_is_invalid_and_sixty_four_is_sha256() {
        let short = "5994471abb01112afcc18159f6cc74b4f511b99806da59b3caf5a9c173cacfc";
        assert_eq!(short.len(), 63);
        let err = short.parse::<Hash>().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
        assert!(err.to_string().contains("cannot determine algorithm"));

        let full = format!("{short}5");
        let h: Hash = full.parse().unwrap();
        assert_eq!(h.algorithm(), HashAlgorithm::Sha256);
    }

    #[test]
    fn wrong_length_after_prefix_is_rejected() {
        let err = "sha1:abcd".parse::<Hash>().unwrap_err();
        assert!(err.to_string().contains("invalid sha1 hash - unexpected length"));
    }

    #[test]
    fn non_hex_is_rejected() {
        let err = "z".repeat(32).parse::<Hash>().unwrap_err();
        assert!(err.to_string().contains("invalid md5 hash - unexpected length"), "{err}");

        let err = format!("sha256:{}", "g".repeat(64)).parse::<Hash>().unwrap_err();
        assert!(err.to_string().contains("invalid sha256 hash - unexpected length"), "{err}");
    }

    #[test]
    fn string_form_round_trips() {
        let h = hash_bytes(HashAlgorithm::Sha256, b"hello");
        assert_eq!(h.to_string(), format!("sha256:{SHA256_HELLO}"));
        let back: Hash = h.to_string().parse().unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn equality_is_algorithm_scoped() {
        let bytes = vec![0u8; 16];
        let a = Hash::from_bytes(HashAlgorithm::Md5, bytes.clone()).unwrap();
        let b = Hash::from_bytes(HashAlgorithm::Md5, bytes).unwrap();
        assert_eq!(a, b);
        let sha1 = hash_bytes(HashAlgorithm::Sha1, b"x");
        let md5 = hash_bytes(HashAlgorithm::Md5, b"x");
        assert_ne!(sha1, md5);
    }

    #[tokio::test]
    async fn hash_reader_consumes_stream() {
        let mut reader: &[u8] = b"hello";
        let h = hash_reader(&mut reader, HashAlgorithm::Sha256).await.unwrap();
        assert_eq!(h.hex(), SHA256_HELLO);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn hash_file_streams_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, b"hello").unwrap();
        let h = hash_file(&path, HashAlgorithm::Sha256).await.unwrap();
        assert_eq!(h.hex(), SHA256_HELLO);
    }

    #[tokio::test]
    async fn hash_file_surfaces_io_error() {
        let err = hash_file("/nonexistent/keel/file", HashAlgorithm::Md5)
            .await
            .unwrap_err();
        assert!(err.is_not_exist());
    }

    #[test]
    fn serde_uses_string_form() {
        let h = hash_bytes(HashAlgorithm::Sha256, b"hello");
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, format!("\"sha256:{SHA256_HELLO}\""));
        let back: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, h);
    }
}
