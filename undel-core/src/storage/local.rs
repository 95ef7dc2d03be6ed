/*!
Local filesystem storage adapter.
*/

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::StorageAdapter;
use crate::{Result, UndoError};

/// Stores archives as files, creating parent directories on save.
///
/// Writes go to a sibling temporary file first and are renamed into place, so
/// a crash mid-write never leaves a truncated archive behind.
#[derive(Debug, Clone, Default)]
pub struct LocalFileStorage {
    base_dir: Option<PathBuf>,
}

impl LocalFileStorage {
    /// Paths are used as given
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Paths are resolved relative to `base_dir`
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        }
    }

    fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    UndoError::storage(format!(
                        "failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        Ok(())
    }
}

impl StorageAdapter for LocalFileStorage {
    fn save(&self, data: &[u8], path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        self.ensure_parent_dir(&full_path)?;

        let mut staging = full_path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        fs::write(&staging, data).map_err(|e| {
            UndoError::storage(format!("failed to write {}: {e}", staging.display()))
        })?;
        fs::rename(&staging, &full_path).map_err(|e| {
            UndoError::storage(format!(
                "failed to move archive into place at {}: {e}",
                full_path.display()
            ))
        })?;

        debug!(path = %full_path.display(), bytes = data.len(), "Archive written");
        Ok(())
    }

    fn load(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.resolve_path(path);
        fs::read(&full_path).map_err(|e| {
            UndoError::storage(format!("failed to read {}: {e}", full_path.display()))
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve_path(path).exists()
    }

    fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.resolve_path(path);
        if full_path.exists() {
            fs::remove_file(&full_path).map_err(|e| {
                UndoError::storage(format!("failed to delete {}: {e}", full_path.display()))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_delete() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        let path = "events.json.gz";

        storage.save(b"archive bytes", path).unwrap();
        assert!(storage.exists(path));
        assert_eq!(storage.load(path).unwrap(), b"archive bytes");
        assert!(!temp_dir.path().join("events.json.gz.tmp").exists());

        storage.delete(path).unwrap();
        assert!(!storage.exists(path));
        storage.delete(path).unwrap();
    }

    #[test]
    fn test_creates_nested_directories() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        let path = "2025/01/events.json.gz";

        storage.save(b"x", path).unwrap();
        assert_eq!(storage.load(path).unwrap(), b"x");
    }

    #[test]
    fn test_overwrite_replaces_content() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());

        storage.save(b"first", "events").unwrap();
        storage.save(b"second", "events").unwrap();
        assert_eq!(storage.load("events").unwrap(), b"second");
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::with_base_dir(temp_dir.path());
        assert!(matches!(
            storage.load("missing.json.gz"),
            Err(UndoError::Storage(_))
        ));
    }
}
