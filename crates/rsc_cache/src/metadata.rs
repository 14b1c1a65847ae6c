//! Info files: the metadata stored next to each compiled artifact.
//!
//! An info file records the dependency table and compiler configuration that
//! produced its artifact, plus a checksum of the artifact bytes. It is framed
//! like this:
//!
//! ```text
//! u32 LE header length | bincode(InfoHeader) | bincode(CacheMetadata)
//! ```
//!
//! The header carries magic bytes, a format version, and a checksum of the
//! payload, so a file cut short by a crashed writer (or read mid-rewrite) is
//! recognised as corrupt instead of being misread.

use std::path::Path;

use rsc_common::{ContentHash, DependencyTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;

/// Magic bytes identifying an info file.
const INFO_MAGIC: [u8; 4] = *b"RSCI";

/// Current info file format version. Increment on breaking changes to the
/// header or payload format.
const INFO_FORMAT_VERSION: u32 = 1;

/// Header prepended to every info file for validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InfoHeader {
    /// Magic bytes: must be `b"RSCI"`.
    magic: [u8; 4],

    /// Info file format version.
    format_version: u32,

    /// Content hash of the encoded payload.
    payload_checksum: ContentHash,
}

/// Metadata describing how a cached artifact was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Every input that determined the artifact's content.
    pub dependencies: DependencyTable,

    /// Opaque encoding of the compiler settings relevant to reuse.
    pub config_signature: Vec<u8>,

    /// Digest of the artifact bytes this metadata was written with.
    pub artifact_checksum: ContentHash,
}

/// Why a readable info file cannot be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// The stored dependency table differs from the live one.
    Dependencies,
    /// The artifact was compiled under different compiler settings.
    ConfigSignature,
}

/// Result of reading and validating an info file.
///
/// The cache treats everything except [`Valid`](Self::Valid) as a miss; the
/// distinction exists for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome {
    /// No info file exists.
    Missing,
    /// The file exists but could not be read or decoded.
    Corrupt(String),
    /// The file decoded but describes a different build.
    Stale(StaleReason),
    /// The file matches the expected build.
    Valid(CacheMetadata),
}

impl MetadataOutcome {
    /// Returns `true` for [`MetadataOutcome::Valid`].
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    /// Returns the metadata if valid.
    pub fn into_valid(self) -> Option<CacheMetadata> {
        match self {
            Self::Valid(metadata) => Some(metadata),
            _ => None,
        }
    }
}

impl CacheMetadata {
    /// Creates metadata for `artifact`, recording its checksum.
    pub fn new(dependencies: DependencyTable, config_signature: Vec<u8>, artifact: &[u8]) -> Self {
        Self {
            dependencies,
            config_signature,
            artifact_checksum: ContentHash::from_bytes(artifact),
        }
    }

    /// Returns `true` if `artifact` is the exact byte content this metadata
    /// was written with.
    pub fn matches_artifact(&self, artifact: &[u8]) -> bool {
        ContentHash::from_bytes(artifact) == self.artifact_checksum
    }

    /// Encodes the metadata into the framed info file format.
    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        let config = bincode::config::standard();
        let payload = bincode::serde::encode_to_vec(self, config).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;

        let header = InfoHeader {
            magic: INFO_MAGIC,
            format_version: INFO_FORMAT_VERSION,
            payload_checksum: ContentHash::from_bytes(&payload),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, config).map_err(|e| {
            CacheError::Serialization {
                reason: e.to_string(),
            }
        })?;

        let header_len = header_bytes.len() as u32;
        let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
        output.extend_from_slice(&header_len.to_le_bytes());
        output.extend_from_slice(&header_bytes);
        output.extend_from_slice(&payload);
        Ok(output)
    }

    /// Decodes a framed info file, returning a description of the defect on
    /// failure.
    pub fn decode(raw: &[u8]) -> Result<Self, String> {
        let config = bincode::config::standard();

        if raw.len() < 4 {
            return Err(format!("file too short ({} bytes)", raw.len()));
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&raw[..4]);
        let header_len = u32::from_le_bytes(len_bytes) as usize;
        let payload_start = 4usize
            .checked_add(header_len)
            .filter(|end| *end <= raw.len())
            .ok_or_else(|| format!("header length {header_len} exceeds file size"))?;

        let (header, _): (InfoHeader, usize) =
            bincode::serde::decode_from_slice(&raw[4..payload_start], config)
                .map_err(|e| format!("undecodable header: {e}"))?;

        if header.magic != INFO_MAGIC {
            return Err("bad magic".to_string());
        }
        if header.format_version != INFO_FORMAT_VERSION {
            return Err(format!(
                "format version {} (expected {INFO_FORMAT_VERSION})",
                header.format_version
            ));
        }

        let payload = &raw[payload_start..];
        if ContentHash::from_bytes(payload) != header.payload_checksum {
            return Err("payload checksum mismatch".to_string());
        }

        let (metadata, consumed): (CacheMetadata, usize) =
            bincode::serde::decode_from_slice(payload, config)
                .map_err(|e| format!("undecodable payload: {e}"))?;
        if consumed != payload.len() {
            return Err("trailing bytes after payload".to_string());
        }

        Ok(metadata)
    }

    /// Reads the info file at `path` and checks it against the live build.
    ///
    /// Never fails: a missing, unreadable, or malformed file and a file that
    /// describes another build are all reported through [`MetadataOutcome`].
    pub fn read_from_file(
        path: &Path,
        expected_deps: &DependencyTable,
        expected_signature: &[u8],
    ) -> MetadataOutcome {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return MetadataOutcome::Missing;
            }
            Err(e) => return MetadataOutcome::Corrupt(format!("unreadable: {e}")),
        };

        let metadata = match Self::decode(&raw) {
            Ok(metadata) => metadata,
            Err(reason) => {
                debug!(path = %path.display(), %reason, "corrupt info file");
                return MetadataOutcome::Corrupt(reason);
            }
        };

        if metadata.dependencies != *expected_deps {
            return MetadataOutcome::Stale(StaleReason::Dependencies);
        }
        if metadata.config_signature != expected_signature {
            return MetadataOutcome::Stale(StaleReason::ConfigSignature);
        }

        MetadataOutcome::Valid(metadata)
    }

    /// Writes the info file, replacing any previous content.
    pub fn write_to_file(&self, path: &Path) -> Result<(), CacheError> {
        let encoded = self.encode()?;
        std::fs::write(path, &encoded).map_err(|e| CacheError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
