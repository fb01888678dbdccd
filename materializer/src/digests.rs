use bytes::Bytes;
use data_encoding::HEXLOWER;
use digest::Digest as _;
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

/// Length of the hashes produced by all supported [DigestFunction]s.
pub const HASH_LEN: usize = 32;

/// The hash function content in the remote store is addressed with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestFunction {
    #[default]
    Sha256,
    Blake3,
}

impl DigestFunction {
    /// Hashes `data` and returns its [Digest].
    pub fn compute(&self, data: &[u8]) -> Digest {
        match self {
            DigestFunction::Sha256 => {
                Digest::from_output(sha2::Sha256::digest(data).as_slice(), data.len() as u64)
            }
            DigestFunction::Blake3 => {
                Digest::from_output(blake3::hash(data).as_bytes(), data.len() as u64)
            }
        }
    }

    /// The digest of the empty blob. Blobs with this digest are never fetched.
    pub fn empty_digest(&self) -> Digest {
        self.compute(b"")
    }
}

impl std::fmt::Display for DigestFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DigestFunction::Sha256 => write!(f, "sha256"),
            DigestFunction::Blake3 => write!(f, "blake3"),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid digest length: {0}")]
    InvalidDigestLen(usize),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("invalid size: {0}")]
    InvalidSize(String),

    #[error("invalid digest format, expected <hash>/<size>: {0}")]
    InvalidFormat(String),
}

/// Identifies a piece of immutable content by its hash and its size in bytes.
/// Two digests are equal if and only if they describe the same content.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    hash: Bytes,
    size: u64,
}

impl Digest {
    /// Constructs a [Digest] from a raw hash and a size.
    /// Returns an error if the hash has the wrong length.
    pub fn new(hash: impl Into<Bytes>, size: u64) -> Result<Self, Error> {
        let hash = hash.into();
        if hash.len() != HASH_LEN {
            return Err(Error::InvalidDigestLen(hash.len()));
        }

        Ok(Self { hash, size })
    }

    /// Constructs a [Digest] from a lowercase hex-encoded hash and a size.
    pub fn from_hex(hash: &str, size: u64) -> Result<Self, Error> {
        let raw = HEXLOWER
            .decode(hash.as_bytes())
            .map_err(|_| Error::InvalidHex(hash.to_string()))?;

        Self::new(raw, size)
    }

    // The output of the supported hash functions always has the right length.
    pub(crate) fn from_output(output: &[u8], size: u64) -> Self {
        Self {
            hash: Bytes::copy_from_slice(output),
            size,
        }
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash[..]
    }

    pub fn hash_hex(&self) -> String {
        HEXLOWER.encode(&self.hash)
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl FromStr for Digest {
    type Err = Error;

    // parses the `<hash>/<size>` form, as rendered by Display.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, size) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidFormat(s.to_string()))?;
        let size = size
            .parse::<u64>()
            .map_err(|_| Error::InvalidSize(size.to_string()))?;

        Self::from_hex(hash, size)
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", HEXLOWER.encode(&self.hash), self.size)
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", HEXLOWER.encode(&self.hash), self.size)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{Digest, DigestFunction, Error};

    #[rstest]
    #[case::sha256(
        DigestFunction::Sha256,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    )]
    #[case::blake3(
        DigestFunction::Blake3,
        "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
    )]
    fn empty_digest(#[case] digest_function: DigestFunction, #[case] expected_hex: &str) {
        let digest = digest_function.empty_digest();

        assert_eq!(expected_hex, digest.hash_hex());
        assert_eq!(0, digest.size());
    }

    #[test]
    fn display_roundtrip() {
        let digest = DigestFunction::Sha256.compute(b"Hello World!");
        let rendered = digest.to_string();

        assert!(rendered.ends_with("/12"));
        assert_eq!(digest, rendered.parse::<Digest>().expect("must parse"));
    }

    #[rstest]
    #[case::no_separator("abcd", Error::InvalidFormat("abcd".into()))]
    #[case::short_hash("abcd/4", Error::InvalidDigestLen(2))]
    #[case::uppercase_hex(
        "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855/0",
        Error::InvalidHex("E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855".into())
    )]
    #[case::bad_size(
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855/-1",
        Error::InvalidSize("-1".into())
    )]
    fn parse_invalid(#[case] input: &str, #[case] expected: Error) {
        assert_eq!(expected, input.parse::<Digest>().expect_err("must fail"));
    }

    #[test]
    fn size_is_part_of_identity() {
        let digest = DigestFunction::Sha256.compute(b"foo");
        let other = Digest::new(digest.hash().to_vec(), 4).expect("valid length");

        assert_ne!(digest, other);
    }
}
