/*!
Storage adapters for event archives.

The archive only talks to [`StorageAdapter`]; [`LocalFileStorage`] is the
production adapter and `MemoryStorage` backs the unit tests.
*/

pub mod local;

use crate::Result;

pub use local::LocalFileStorage;

/// Byte-level storage port
pub trait StorageAdapter {
    /// Write `data` to `path`, replacing any previous content
    ///
    /// # Arguments
    /// * `data` - Archive bytes, already compressed
    /// * `path` - Storage location (interpretation depends on the adapter)
    fn save(&self, data: &[u8], path: &str) -> Result<()>;

    /// Read the bytes stored at `path`
    ///
    /// # Errors
    /// * `UndoError::Storage` - If nothing is stored there or the read fails
    fn load(&self, path: &str) -> Result<Vec<u8>>;

    fn exists(&self, path: &str) -> bool;

    /// Remove the object at `path`; removing a missing object succeeds
    fn delete(&self, path: &str) -> Result<()>;
}

#[cfg(test)]
pub use memory::MemoryStorage;
