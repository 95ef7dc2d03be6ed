/*!
Archive metadata and integrity hashing.
*/

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Result, UndoError};

/// Current archive format version for compatibility tracking
pub const ARCHIVE_FORMAT_VERSION: u8 = 1;

/// Describes one exported undo-event archive
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArchiveMetadata {
    /// Format version (current: 1)
    pub format_version: u8,

    /// Unique identifier of this export
    pub archive_id: String,

    /// When the archive was written
    pub created_at: DateTime<Utc>,

    /// SHA-256 of the serialized event list
    pub content_hash: String,

    pub event_count: usize,

    /// Size of the serialized event list in bytes
    pub uncompressed_size: usize,

    /// Size of the stored archive in bytes. Not part of the stored container;
    /// set after compression on save and from the bytes read on load.
    #[serde(default, skip_serializing)]
    pub compressed_size: Option<usize>,

    pub compression_algorithm: String,
}

impl ArchiveMetadata {
    /// Metadata for a new archive of `event_count` events
    pub fn new(event_count: usize) -> Self {
        Self {
            format_version: ARCHIVE_FORMAT_VERSION,
            archive_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            content_hash: String::new(),
            event_count,
            uncompressed_size: 0,
            compressed_size: None,
            compression_algorithm: "gzip".to_string(),
        }
    }

    /// Record the hash and size of the serialized events
    pub fn with_content_hash(mut self, events_json: &[u8]) -> Self {
        self.content_hash = Self::compute_hash(events_json);
        self.uncompressed_size = events_json.len();
        self
    }

    pub fn with_compressed_size(mut self, compressed_size: usize) -> Self {
        self.compressed_size = Some(compressed_size);
        self
    }

    pub fn with_compression_algorithm<S: Into<String>>(mut self, algorithm: S) -> Self {
        self.compression_algorithm = algorithm.into();
        self
    }

    /// Hex-encoded SHA-256 of `data`
    pub fn compute_hash(data: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data);
        format!("{:x}", hasher.finalize())
    }

    /// Check serialized events against the stored hash
    ///
    /// # Errors
    /// * `UndoError::IntegrityCheckFailed` - If the hashes differ
    pub fn verify_integrity(&self, events_json: &[u8]) -> Result<()> {
        let computed = Self::compute_hash(events_json);
        if computed == self.content_hash {
            Ok(())
        } else {
            Err(UndoError::IntegrityCheckFailed {
                expected: self.content_hash.clone(),
                actual: computed,
            })
        }
    }

    /// Validate that required fields are set
    pub fn validate(&self) -> Result<()> {
        if self.archive_id.is_empty() {
            return Err(UndoError::invalid_format("archive_id cannot be empty"));
        }
        if self.content_hash.is_empty() {
            return Err(UndoError::invalid_format("content_hash cannot be empty"));
        }
        if self.compression_algorithm.is_empty() {
            return Err(UndoError::invalid_format(
                "compression_algorithm cannot be empty",
            ));
        }
        Ok(())
    }

    pub fn is_compatible(&self) -> bool {
        self.format_version <= ARCHIVE_FORMAT_VERSION
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_hash() {
        assert_eq!(
            ArchiveMetadata::compute_hash(b"test data"),
            "916f0027a575074ce72a331777c3478d6513f786a591bd892da1a577bf2335f9"
        );
    }

    #[test]
    fn test_integrity_verification() {
        let metadata = ArchiveMetadata::new(0).with_content_hash(b"[]");
        assert!(metadata.verify_integrity(b"[]").is_ok());
        assert!(matches!(
            metadata.verify_integrity(b"[{}]"),
            Err(UndoError::IntegrityCheckFailed { .. })
        ));
        assert_eq!(metadata.uncompressed_size, 2);
    }

    #[test]
    fn test_validation() {
        let mut metadata = ArchiveMetadata::new(3);
        assert!(metadata.validate().is_err());

        metadata = metadata.with_content_hash(b"[]");
        assert!(metadata.validate().is_ok());

        metadata.archive_id.clear();
        assert!(metadata.validate().is_err());
    }

    #[test]
    fn test_future_version_incompatible() {
        let mut metadata = ArchiveMetadata::new(0);
        assert!(metadata.is_compatible());
        metadata.format_version = ARCHIVE_FORMAT_VERSION + 1;
        assert!(!metadata.is_compatible());
    }
}
