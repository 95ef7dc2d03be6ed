/*!
Compression adapters for event archives.

Archives are gzip-compressed by default; [`NoCompression`] keeps them as plain
JSON for inspection with ordinary tools.
*/

use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};

use crate::{Result, UndoError};

/// Compression port used by [`crate::archive::EventArchive`]
pub trait CompressionAdapter {
    /// Compress the serialized archive
    ///
    /// # Arguments
    /// * `data` - The bytes to compress
    ///
    /// # Returns
    /// The compressed bytes or an error
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a stored archive
    ///
    /// # Arguments
    /// * `compressed_data` - The bytes read back from storage
    ///
    /// # Returns
    /// The decompressed bytes or an error
    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Name recorded in the archive metadata
    fn algorithm_name(&self) -> &str;
}

/// Gzip (DEFLATE) compression
#[derive(Debug, Clone)]
pub struct GzipCompressor {
    compression_level: Compression,
}

impl GzipCompressor {
    /// Default compression level (6)
    pub fn new() -> Self {
        Self {
            compression_level: Compression::default(),
        }
    }

    /// # Arguments
    /// * `level` - 0 (store only) to 9 (smallest output)
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: Compression::new(level.min(9)),
        }
    }

    pub fn fast() -> Self {
        Self::with_level(1)
    }

    pub fn max() -> Self {
        Self::with_level(9)
    }
}

impl Default for GzipCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl CompressionAdapter for GzipCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), self.compression_level);
        encoder
            .write_all(data)
            .map_err(|e| UndoError::compression(format!("failed to write archive data: {e}")))?;
        encoder
            .finish()
            .map_err(|e| UndoError::compression(format!("failed to finish gzip stream: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(compressed_data);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| UndoError::compression(format!("failed to decompress archive: {e}")))?;
        Ok(decompressed)
    }

    fn algorithm_name(&self) -> &str {
        "gzip"
    }
}

/// Pass-through adapter
#[derive(Debug, Clone, Default)]
pub struct NoCompression;

impl NoCompression {
    pub fn new() -> Self {
        Self
    }
}

impl CompressionAdapter for NoCompression {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        Ok(compressed_data.to_vec())
    }

    fn algorithm_name(&self) -> &str {
        "none"
    }
}
