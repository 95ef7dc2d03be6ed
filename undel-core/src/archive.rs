/*!
Undo-event archive.

Exports the event log (including terminal events kept for audit) as a single
compressed JSON container and reads it back with integrity checks. The CLI
works against these archives.
*/

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compression::CompressionAdapter;
use crate::event::UndoEvent;
use crate::metadata::{ArchiveMetadata, ARCHIVE_FORMAT_VERSION};
use crate::storage::StorageAdapter;
use crate::{Result, UndoError};

/// On-disk layout: metadata next to the event list it describes
#[derive(Serialize, Deserialize, Debug)]
struct ArchiveContainer {
    metadata: ArchiveMetadata,
    events: serde_json::Value,
}

/// Reads and writes undo-event archives through pluggable adapters
///
/// # Example
/// ```rust,no_run
/// use undel_core::{EventArchive, GzipCompressor, LocalFileStorage};
///
/// let archive = EventArchive::new(LocalFileStorage::new(), GzipCompressor::new());
/// let (metadata, events) = archive.load_events("/var/lib/undel/events.json.gz")?;
/// println!("{} events, hash {}", events.len(), metadata.content_hash);
/// # Ok::<(), undel_core::UndoError>(())
/// ```
pub struct EventArchive<S, C>
where
    S: StorageAdapter,
    C: CompressionAdapter,
{
    storage: S,
    compressor: C,
}

impl<S, C> EventArchive<S, C>
where
    S: StorageAdapter,
    C: CompressionAdapter,
{
    pub fn new(storage: S, compressor: C) -> Self {
        Self {
            storage,
            compressor,
        }
    }

    /// Write `events` to `path`, replacing any previous archive
    ///
    /// # Returns
    /// The metadata stored alongside the events
    ///
    /// # Errors
    /// * `UndoError::Json` - If the events cannot be serialized
    /// * `UndoError::Compression` - If compression fails
    /// * `UndoError::Storage` - If the write fails
    pub fn save_events(&self, events: &[UndoEvent], path: &str) -> Result<ArchiveMetadata> {
        let events_value = serde_json::to_value(events)?;
        let events_bytes = serde_json::to_vec(&events_value)?;

        let metadata = ArchiveMetadata::new(events.len())
            .with_content_hash(&events_bytes)
            .with_compression_algorithm(self.compressor.algorithm_name());
        metadata.validate()?;

        let container = ArchiveContainer {
            metadata: metadata.clone(),
            events: events_value,
        };
        let container_bytes = serde_json::to_vec(&container)?;
        let compressed = self.compressor.compress(&container_bytes)?;
        let metadata = metadata.with_compressed_size(compressed.len());

        self.storage
            .save(&compressed, path)
            .map_err(|e| UndoError::storage(format!("failed to save archive: {e}")))?;

        info!(
            path,
            events = metadata.event_count,
            bytes = compressed.len(),
            "Undo events archived"
        );
        Ok(metadata)
    }

    /// Read the archive at `path`
    ///
    /// # Errors
    /// * `UndoError::Storage` - If the archive cannot be read
    /// * `UndoError::Compression` - If decompression fails
    /// * `UndoError::InvalidFormat` - If the format version is newer than this
    ///   build understands or the event count does not match
    /// * `UndoError::IntegrityCheckFailed` - If the content hash does not match
    pub fn load_events(&self, path: &str) -> Result<(ArchiveMetadata, Vec<UndoEvent>)> {
        let compressed = self
            .storage
            .load(path)
            .map_err(|e| UndoError::storage(format!("failed to load archive: {e}")))?;
        let container_bytes = self.compressor.decompress(&compressed)?;
        let container: ArchiveContainer = serde_json::from_slice(&container_bytes)?;

        if !container.metadata.is_compatible() {
            return Err(UndoError::invalid_format(format!(
                "incompatible archive format version: {} (current: {})",
                container.metadata.format_version, ARCHIVE_FORMAT_VERSION
            )));
        }

        let events_bytes = serde_json::to_vec(&container.events)?;
        container.metadata.verify_integrity(&events_bytes)?;

        let events: Vec<UndoEvent> = serde_json::from_value(container.events)?;
        if events.len() != container.metadata.event_count {
            return Err(UndoError::invalid_format(format!(
                "archive declares {} events but holds {}",
                container.metadata.event_count,
                events.len()
            )));
        }

        debug!(path, events = events.len(), "Undo events loaded");
        let metadata = container.metadata.with_compressed_size(compressed.len());
        Ok((metadata, events))
    }

    /// Load the archive and check every event's snapshot digest as well
    pub fn verify(&self, path: &str) -> Result<ArchiveMetadata> {
        let (metadata, events) = self.load_events(path)?;
        for event in &events {
            event.verify_snapshot()?;
        }
        Ok(metadata)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.storage.exists(path)
    }

    pub fn delete(&self, path: &str) -> Result<()> {
        self.storage.delete(path)
    }
}
