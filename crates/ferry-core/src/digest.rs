//! Integrity verification: content digests over whole files or streams.
//!
//! Supported algorithms:
//!   md5      128-bit, kept for interop with older endpoints
//!   sha1     160-bit
//!   sha256   256-bit (default)
//!   blake3   256-bit
//!
//! Files are always streamed through a fixed buffer; memory use does not
//! grow with file size.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::Digest as _;

use crate::error::{Error, Result};

const READ_BUF: usize = 8192;

/// Digest algorithm, selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    #[default]
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Digest length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 | Self::Blake3 => 32,
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            _ => Err(Error::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Normalise a hex string (trimmed, lowercased). Does not validate length.
    pub fn from_hex(hex: impl AsRef<str>) -> Self {
        Self(hex.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Incremental hashing ───────────────────────────────────────────────────────

enum HasherState {
    Md5(md5::Md5),
    Sha1(sha1::Sha1),
    Sha256(sha2::Sha256),
    Blake3(Box<blake3::Hasher>),
}

/// Incremental hasher for bytes that arrive in pieces (e.g. while streaming
/// a file onto a connection).
///
/// # Example
/// ```
/// use ferry_core::digest::{digest_bytes, DigestAlgorithm, StreamHasher};
/// let mut h = StreamHasher::new(DigestAlgorithm::Sha256);
/// h.update(b"hello ");
/// h.update(b"world");
/// assert_eq!(h.finalize(), digest_bytes(DigestAlgorithm::Sha256, b"hello world"));
/// ```
pub struct StreamHasher {
    state: HasherState,
}

impl StreamHasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        let state = match algorithm {
            DigestAlgorithm::Md5 => HasherState::Md5(md5::Md5::new()),
            DigestAlgorithm::Sha1 => HasherState::Sha1(sha1::Sha1::new()),
            DigestAlgorithm::Sha256 => HasherState::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Md5(h) => h.update(data),
            HasherState::Sha1(h) => h.update(data),
            HasherState::Sha256(h) => h.update(data),
            HasherState::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Digest {
        let hex = match self.state {
            HasherState::Md5(h) => hex::encode(h.finalize()),
            HasherState::Sha1(h) => hex::encode(h.finalize()),
            HasherState::Sha256(h) => hex::encode(h.finalize()),
            HasherState::Blake3(h) => h.finalize().to_hex().to_string(),
        };
        Digest(hex)
    }
}

// ── Whole-file helpers ────────────────────────────────────────────────────────

/// Digest an in-memory buffer.
pub fn digest_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Digest {
    let mut hasher = StreamHasher::new(algorithm);
    hasher.update(data);
    hasher.finalize()
}

/// Digest everything a reader yields until EOF.
pub fn digest_reader<R: Read>(algorithm: DigestAlgorithm, mut reader: R) -> Result<Digest> {
    let mut hasher = StreamHasher::new(algorithm);
    let mut buf = [0u8; READ_BUF];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

/// Digest a file's full content.
pub fn digest_file(path: &Path, algorithm: DigestAlgorithm) -> Result<Digest> {
    let file = File::open(path)?;
    digest_reader(algorithm, file)
}

/// Recompute a file's digest and compare.
///
/// Returns `Ok(false)` on mismatch; only an unreadable file is an error.
pub fn verify_file(path: &Path, algorithm: DigestAlgorithm, expected: &Digest) -> Result<bool> {
    let actual = digest_file(path, algorithm)?;
    let matched = actual == *expected;
    if !matched {
        tracing::debug!(
            path = %path.display(),
            %algorithm,
            expected = %expected,
            actual = %actual,
            "digest mismatch"
        );
    }
    Ok(matched)
}
