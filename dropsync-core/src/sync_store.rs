//! Sync state persistence.
//!
//! One JSON file per linked user holds the [`SyncState`] (cursor and
//! metadata table) so a sync can resume where it left off.
//!
//! # Storage Location
//!
//! States live under the platform data directory, e.g.
//! `~/.local/share/dropsync/sync/{service}/{user_id}.json` on Linux.
//! Writes go through a temporary sibling file and a rename, so a crash
//! never leaves a half-written state behind.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::delta::SyncState;

const FORMAT_VERSION: u32 = 1;

/// Error type for sync state persistence.
#[derive(Debug, Error)]
pub enum SyncStoreError {
    /// I/O error reading or writing a state file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Data directory not available.
    #[error("data directory not available")]
    DataDirUnavailable,

    /// A service name or user id cannot be used as a file name.
    #[error("invalid sync state name {name:?}")]
    InvalidName { name: String },
}

/// On-disk format.
#[derive(Debug, Serialize, Deserialize)]
struct SyncStateFile {
    version: u32,
    state: SyncState,
}

/// Disk-backed [`SyncState`] storage keyed by `(service, user_id)`.
#[derive(Debug, Clone)]
pub struct SyncStateStore {
    root: PathBuf,
}

impl SyncStateStore {
    /// Platform data directory for dropsync.
    pub fn default_root() -> Result<PathBuf, SyncStoreError> {
        let dirs = directories::ProjectDirs::from("com", "dropsync", "dropsync")
            .ok_or(SyncStoreError::DataDirUnavailable)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Store rooted at the platform data directory.
    pub fn open() -> Result<Self, SyncStoreError> {
        Ok(Self::new(Self::default_root()?))
    }

    /// Store rooted at `root`. Directories are created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn check_name(name: &str) -> Result<&str, SyncStoreError> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\', '\0']);
        if invalid {
            return Err(SyncStoreError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(name)
    }

    /// File holding the state for one user.
    pub fn path_for(&self, service: &str, user_id: &str) -> Result<PathBuf, SyncStoreError> {
        Ok(self
            .root
            .join("sync")
            .join(Self::check_name(service)?)
            .join(format!("{}.json", Self::check_name(user_id)?)))
    }

    /// Load a saved state, or `None` if nothing was saved yet.
    pub fn load(&self, service: &str, user_id: &str) -> Result<Option<SyncState>, SyncStoreError> {
        let path = self.path_for(service, user_id)?;
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let file: SyncStateFile = serde_json::from_str(&contents)?;
        tracing::debug!(
            "Loaded sync state for {}/{} ({} entries)",
            service,
            user_id,
            file.state.len()
        );
        Ok(Some(file.state))
    }

    /// Atomically replace the saved state.
    pub fn save(&self, service: &str, user_id: &str, state: &SyncState) -> Result<(), SyncStoreError> {
        let path = self.path_for(service, user_id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = SyncStateFile {
            version: FORMAT_VERSION,
            state: state.clone(),
        };
        let contents = serde_json::to_string(&file)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, contents)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::debug!("Saved sync state for {}/{}", service, user_id);
        Ok(())
    }

    /// Delete the saved state. Returns whether a file existed.
    pub fn remove(&self, service: &str, user_id: &str) -> Result<bool, SyncStoreError> {
        let path = self.path_for(service, user_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::{DeltaEntry, DeltaReconciler};
    use crate::metadata::Metadata;
    use tempfile::TempDir;

    fn test_store() -> (SyncStateStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = SyncStateStore::new(temp_dir.path());
        (store, temp_dir)
    }

    fn sample_state() -> SyncState {
        DeltaReconciler::apply_page(
            SyncState::new(),
            vec![
                DeltaEntry::upsert("/docs", Metadata::directory("/Docs")),
                DeltaEntry::upsert("/docs/a.txt", Metadata::file("/Docs/a.txt", 12)),
            ],
            false,
            "cursor-1",
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_load_missing_is_none() {
        let (store, _temp) = test_store();
        assert!(store.load("dropbox", "42").unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let (store, temp) = test_store();
        let state = sample_state();
        store.save("dropbox", "42", &state).unwrap();

        assert!(temp.path().join("sync/dropbox/42.json").exists());
        assert!(!temp.path().join("sync/dropbox/42.json.tmp").exists());

        let loaded = store.load("dropbox", "42").unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.cursor.as_deref(), Some("cursor-1"));
    }

    #[test]
    fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = SyncStateStore::new(temp_dir.path());
            store.save("dropbox", "42", &sample_state()).unwrap();
        }
        {
            let store = SyncStateStore::new(temp_dir.path());
            let state = store.load("dropbox", "42").unwrap().unwrap();
            assert_eq!(state.len(), 2);
        }
    }

    #[test]
    fn test_save_replaces_previous_state() {
        let (store, _temp) = test_store();
        store.save("dropbox", "42", &sample_state()).unwrap();
        store.save("dropbox", "42", &SyncState::new()).unwrap();

        let loaded = store.load("dropbox", "42").unwrap().unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.cursor.is_none());
    }

    #[test]
    fn test_remove() {
        let (store, _temp) = test_store();
        store.save("dropbox", "42", &sample_state()).unwrap();

        assert!(store.remove("dropbox", "42").unwrap());
        assert!(!store.remove("dropbox", "42").unwrap());
        assert!(store.load("dropbox", "42").unwrap().is_none());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let (store, _temp) = test_store();
        for name in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                store.save("dropbox", name, &SyncState::new()),
                Err(SyncStoreError::InvalidName { .. })
            ));
        }
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let (store, _temp) = test_store();
        let path = store.path_for("dropbox", "42").unwrap();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "not json").unwrap();

        assert!(matches!(store.load("dropbox", "42"), Err(SyncStoreError::Json(_))));
    }
}
