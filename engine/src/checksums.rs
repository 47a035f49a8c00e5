//! Content fingerprints.
//!
//! This module provides:
//! - Checksum algorithms (MD5, SHA-256, BLAKE3) and tagged checksum values
//! - File-level checksum computation
//! - The fingerprint pass that fills content hashes into scanned records,
//!   reusing cached hashes when size and modification time are unchanged

use crate::cache::CacheSnapshot;
use crate::error::EngineError;
use crate::model::{FileRecord, Issue, IssueKind};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChecksumAlgorithm {
    /// MD5 (128-bit, default)
    #[default]
    Md5,
    /// SHA-256 (cryptographic, 256-bit)
    Sha256,
    /// BLAKE3 (modern, fast, 256-bit)
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(format!(
                "unknown hash algorithm '{}' (expected md5, sha256 or blake3)",
                other
            )),
        }
    }
}

/// A computed checksum value, tagged with the algorithm that produced it.
///
/// Serialized as `"algo:hex"`. Values of different algorithms never compare
/// equal, so switching algorithms simply invalidates old fingerprints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    /// Create a new checksum value
    pub fn new(algorithm: ChecksumAlgorithm, hex: String) -> Self {
        ChecksumValue { algorithm, hex }
    }

    /// Get the algorithm
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Get the hex string representation
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

impl TryFrom<String> for ChecksumValue {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (algo, hex) = value
            .split_once(':')
            .ok_or_else(|| format!("checksum '{}' is missing its algorithm prefix", value))?;
        let algorithm = algo.parse::<ChecksumAlgorithm>()?;
        if hex.is_empty() || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("checksum '{}' is not a hex digest", value));
        }
        Ok(ChecksumValue::new(algorithm, hex.to_lowercase()))
    }
}

impl serde::Serialize for ChecksumValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string_with_algo())
    }
}

impl<'de> serde::Deserialize<'de> for ChecksumValue {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ChecksumValue::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Trait for computing checksums
pub trait ChecksumHasher {
    /// Update the hasher with new data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the checksum value
    fn finalize(self: Box<Self>) -> ChecksumValue;
}

/// MD5 hasher (backed by md5 crate)
struct Md5Hasher {
    context: md5::Context,
}

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.context.compute();
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", digest))
    }
}

/// SHA-256 hasher (backed by sha2 crate)
struct Sha256Hasher {
    hasher: sha2::Sha256,
}

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", digest))
    }
}

/// BLAKE3 hasher (backed by blake3 crate)
struct Blake3Hasher {
    hasher: blake3::Hasher,
}

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        let digest = self.hasher.finalize();
        ChecksumValue::new(ChecksumAlgorithm::Blake3, digest.to_hex().to_string())
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher {
            context: md5::Context::new(),
        }),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher {
            hasher: sha2::Sha256::default(),
        }),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher {
            hasher: blake3::Hasher::new(),
        }),
    }
}

/// Compute the checksum of a file.
///
/// # Errors
/// Returns `EngineError::ReadError` if the file cannot be opened or read
/// (permissions, deleted mid-scan, ...).
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, EngineError> {
    let read_error = |e| EngineError::ReadError {
        path: path.to_path_buf(),
        source: e,
    };

    let mut file = File::open(path).map_err(read_error)?;
    let mut hasher = create_hasher(algorithm);
    let mut buffer = [0u8; 65536]; // 64 KB buffer

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(read_error(e)),
        }
    }

    Ok(hasher.finalize())
}

/// Result of a fingerprint pass over scanned records.
#[derive(Debug, Default)]
pub struct FingerprintOutcome {
    /// Records with `content_hash` filled in, in input order
    pub records: Vec<FileRecord>,
    /// Hash failures (path reused from cache, or dropped if new)
    pub issues: Vec<Issue>,
    /// Number of files actually read and hashed
    pub hashed: usize,
    /// Number of files whose cached hash was reused
    pub reused: usize,
}

/// Fill content hashes into freshly scanned records.
///
/// A file is only read when its size or modification time differ from the
/// cached record, or when the cached hash was made with another algorithm.
/// With `force`, every file is re-hashed.
///
/// When hashing fails, a path known to the cache keeps its cached record
/// (so a transient read error never looks like a modification); a new path
/// is dropped from the result. Both cases are reported as `IssueKind::Hash`.
pub fn fill_fingerprints(
    root: &Path,
    scanned: Vec<FileRecord>,
    previous: &CacheSnapshot,
    algorithm: ChecksumAlgorithm,
    force: bool,
) -> FingerprintOutcome {
    let mut outcome = FingerprintOutcome::default();

    for mut record in scanned {
        let cached = previous.get(&record.path);

        if !force {
            if let Some(cached) = cached {
                let reusable = cached.size == record.size
                    && cached.modified_time == record.modified_time
                    && cached
                        .content_hash
                        .as_ref()
                        .is_some_and(|h| h.algorithm() == algorithm);
                if reusable {
                    record.content_hash = cached.content_hash.clone();
                    record.uploaded_at = cached.uploaded_at;
                    outcome.reused += 1;
                    outcome.records.push(record);
                    continue;
                }
            }
        }

        match compute_file_checksum(&record.local_path(root), algorithm) {
            Ok(hash) => {
                debug!(path = %record.path, hash = %hash, "Hashed file");
                record.content_hash = Some(hash);
                outcome.hashed += 1;
                outcome.records.push(record);
            }
            Err(e) => {
                let message = match &e {
                    EngineError::ReadError { source, .. } => source.to_string(),
                    other => other.to_string(),
                };
                match cached {
                    Some(cached) => {
                        warn!(path = %record.path, error = %message, "Hash failed; keeping cached state");
                        outcome.records.push(cached.clone());
                    }
                    None => {
                        warn!(path = %record.path, error = %message, "Hash failed; skipping new file");
                    }
                }
                outcome.issues.push(Issue::new(IssueKind::Hash, &record.path, message));
            }
        }
    }

    outcome
}
