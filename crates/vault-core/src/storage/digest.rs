//! Streaming digests for stored attachments.
//!
//! MD5 is the legacy digest most remote checksums use, SHA-256 covers the
//! rest, and BLAKE3 is recorded alongside both when files are written
//! locally. Readers are consumed in `StorageConfig::HASH_CHUNK_SIZE` pieces.

use crate::config::StorageConfig;
use crate::error::{Result, VaultError};
use blake3::Hasher as Blake3Hasher;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::str::FromStr;

/// Hash algorithms understood by [`compute_digest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
    Blake3,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }

    /// Algorithm a recorded checksum was produced with, judged by its shape.
    ///
    /// 32 hex characters is MD5; anything else is compared as SHA-256.
    pub fn for_checksum(checksum: &str) -> Self {
        let checksum = checksum.trim();
        if checksum.len() == 32 && checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            DigestAlgorithm::Md5
        } else {
            DigestAlgorithm::Sha256
        }
    }

    fn hasher(&self) -> DigestState {
        match self {
            DigestAlgorithm::Md5 => DigestState::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => DigestState::Sha256(Sha256::new()),
            DigestAlgorithm::Blake3 => DigestState::Blake3(Box::new(Blake3Hasher::new())),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "md5" => Ok(DigestAlgorithm::Md5),
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "blake3" => Ok(DigestAlgorithm::Blake3),
            other => Err(VaultError::Config {
                message: format!("Unsupported digest algorithm: {}", other),
            }),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

enum DigestState {
    Md5(Md5),
    Sha256(Sha256),
    Blake3(Box<Blake3Hasher>),
}

impl DigestState {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            DigestState::Md5(h) => h.update(bytes),
            DigestState::Sha256(h) => h.update(bytes),
            DigestState::Blake3(h) => {
                h.update(bytes);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            DigestState::Md5(h) => hex::encode(h.finalize()),
            DigestState::Sha256(h) => hex::encode(h.finalize()),
            DigestState::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// Lowercase hex digests of one byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDigests {
    pub md5: String,
    pub sha256: String,
    pub blake3: String,
}

/// Feeds the same bytes to every digest kept in [`FileDigests`].
pub(crate) struct MultiHasher {
    md5: Md5,
    sha256: Sha256,
    blake3: Blake3Hasher,
}

impl MultiHasher {
    pub(crate) fn new() -> Self {
        Self {
            md5: Md5::new(),
            sha256: Sha256::new(),
            blake3: Blake3Hasher::new(),
        }
    }

    pub(crate) fn update(&mut self, bytes: &[u8]) {
        self.md5.update(bytes);
        self.sha256.update(bytes);
        self.blake3.update(bytes);
    }

    pub(crate) fn finalize(self) -> FileDigests {
        FileDigests {
            md5: hex::encode(self.md5.finalize()),
            sha256: hex::encode(self.sha256.finalize()),
            blake3: self.blake3.finalize().to_hex().to_string(),
        }
    }
}

/// Compute a digest over everything `reader` yields, in 1 MiB chunks.
pub fn compute_digest_stream<R: Read>(reader: &mut R, algorithm: DigestAlgorithm) -> Result<String> {
    let mut state = algorithm.hasher();
    let mut buffer = vec![0u8; StorageConfig::HASH_CHUNK_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        state.update(&buffer[..bytes_read]);
    }
    Ok(state.finalize_hex())
}

/// Compute a digest over the whole content of a seekable reader.
///
/// Reads from the start and puts the reader back where it was.
pub fn compute_digest<R: Read + Seek>(reader: &mut R, algorithm: DigestAlgorithm) -> Result<String> {
    let start = reader.stream_position()?;
    reader.seek(SeekFrom::Start(0))?;
    let result = compute_digest_stream(reader, algorithm);
    reader.seek(SeekFrom::Start(start))?;
    result
}

/// MD5, SHA-256 and BLAKE3 of a file in a single read.
pub fn compute_file_digests(path: impl AsRef<Path>) -> Result<FileDigests> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| VaultError::io_with_path(e, path))?;

    let mut hasher = MultiHasher::new();
    let mut buffer = vec![0u8; StorageConfig::HASH_CHUNK_SIZE];
    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| VaultError::io_with_path(e, path))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Digest of a file with one algorithm.
pub fn compute_file_digest(path: impl AsRef<Path>, algorithm: DigestAlgorithm) -> Result<String> {
    let path = path.as_ref();
    let mut file = std::fs::File::open(path).map_err(|e| VaultError::io_with_path(e, path))?;
    compute_digest_stream(&mut file, algorithm).map_err(|e| match e {
        VaultError::Io {
            source: Some(source),
            ..
        } => VaultError::io_with_path(source, path),
        other => other,
    })
}

/// Compare a file against a recorded checksum, case-insensitively.
///
/// The algorithm follows [`DigestAlgorithm::for_checksum`] and is returned
/// on success.
pub fn verify_checksum(path: impl AsRef<Path>, expected: &str) -> Result<DigestAlgorithm> {
    let algorithm = DigestAlgorithm::for_checksum(expected);
    let actual = compute_file_digest(path, algorithm)?;
    let expected = expected.trim().to_lowercase();

    if actual == expected {
        Ok(algorithm)
    } else {
        Err(VaultError::ChecksumMismatch { expected, actual })
    }
}
