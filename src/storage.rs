//! Artifact store: where input batches are read from and scored output is written to

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Prefix for uploaded batches awaiting scoring
pub const INCOMING_PREFIX: &str = "incoming";
/// Prefix for scored output artifacts
pub const OUTPUT_PREFIX: &str = "flagged";

/// Opaque reference to a stored artifact, e.g. `incoming/<uuid>.csv`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactHandle(String);

impl ArtifactHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    fn generate(prefix: &str) -> Self {
        Self(format!("{}/{}.csv", prefix, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative path of the artifact; handles that could escape the store root are rejected
    fn relative_path(&self) -> Result<PathBuf> {
        let path = Path::new(&self.0);
        let safe = !self.0.is_empty()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(PipelineError::Storage(format!("invalid artifact handle {:?}", self.0)));
        }
        Ok(path.to_path_buf())
    }
}

impl fmt::Display for ArtifactHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability the pipeline consumes for reading input and persisting output
pub trait ArtifactStore: Send + Sync {
    fn put(&self, prefix: &str, data: &[u8]) -> Result<ArtifactHandle>;

    fn get(&self, handle: &ArtifactHandle) -> Result<Vec<u8>>;

    /// Remove an artifact. Deleting one that no longer exists is not an error.
    fn delete(&self, handle: &ArtifactHandle) -> Result<()>;
}

/// Directory-backed store with one subdirectory per prefix
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    /// Open the store, creating the `incoming/` and `flagged/` directories
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        for prefix in [INCOMING_PREFIX, OUTPUT_PREFIX] {
            fs::create_dir_all(root.join(prefix)).map_err(|e| {
                PipelineError::Storage(format!("cannot create {}: {}", root.join(prefix).display(), e))
            })?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactStore for LocalArtifactStore {
    fn put(&self, prefix: &str, data: &[u8]) -> Result<ArtifactHandle> {
        let handle = ArtifactHandle::generate(prefix);
        let path = self.root.join(handle.relative_path()?);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)
            .map_err(|e| PipelineError::Storage(format!("cannot write {}: {}", handle, e)))?;
        debug!(handle = %handle, bytes = data.len(), "Stored artifact");
        Ok(handle)
    }

    fn get(&self, handle: &ArtifactHandle) -> Result<Vec<u8>> {
        let path = self.root.join(handle.relative_path()?);
        fs::read(&path).map_err(|e| PipelineError::Storage(format!("cannot read {}: {}", handle, e)))
    }

    fn delete(&self, handle: &ArtifactHandle) -> Result<()> {
        let path = self.root.join(handle.relative_path()?);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(handle = %handle, "Deleted artifact");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Storage(format!("cannot delete {}: {}", handle, e))),
        }
    }
}

/// In-process store, used by tests and embedders
#[derive(Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactHandle, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, handle: &ArtifactHandle) -> bool {
        self.artifacts
            .read()
            .map(|a| a.contains_key(handle))
            .unwrap_or(false)
    }
}

fn poisoned<T>(_: T) -> PipelineError {
    PipelineError::Storage("artifact map lock poisoned".to_string())
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, prefix: &str, data: &[u8]) -> Result<ArtifactHandle> {
        let handle = ArtifactHandle::generate(prefix);
        self.artifacts
            .write()
            .map_err(poisoned)?
            .insert(handle.clone(), data.to_vec());
        Ok(handle)
    }

    fn get(&self, handle: &ArtifactHandle) -> Result<Vec<u8>> {
        self.artifacts
            .read()
            .map_err(poisoned)?
            .get(handle)
            .cloned()
            .ok_or_else(|| PipelineError::Storage(format!("artifact {} not found", handle)))
    }

    fn delete(&self, handle: &ArtifactHandle) -> Result<()> {
        self.artifacts.write().map_err(poisoned)?.remove(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_local_store_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).unwrap();
        assert!(dir.path().join("incoming").is_dir());
        assert!(dir.path().join("flagged").is_dir());

        let handle = store.put(INCOMING_PREFIX, b"timestamp,merchant\n").unwrap();
        assert!(handle.as_str().starts_with("incoming/"));
        assert!(handle.as_str().ends_with(".csv"));
        assert_eq!(store.get(&handle).unwrap(), b"timestamp,merchant\n");

        store.delete(&handle).unwrap();
        assert_eq!(store.get(&handle).unwrap_err().kind(), ErrorKind::Storage);
        // Second delete is a no-op
        store.delete(&handle).unwrap();
    }

    #[test]
    fn test_handles_are_unique() {
        let store = MemoryArtifactStore::new();
        let a = store.put(OUTPUT_PREFIX, b"a").unwrap();
        let b = store.put(OUTPUT_PREFIX, b"a").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_rejects_escaping_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArtifactStore::open(dir.path()).unwrap();
        for bad in ["../secrets.csv", "/etc/passwd", "", "incoming/../../x"] {
            let err = store.get(&ArtifactHandle::new(bad)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Storage, "{}", bad);
        }
    }

    #[test]
    fn test_memory_store_missing() {
        let store = MemoryArtifactStore::new();
        let handle = ArtifactHandle::new("incoming/nope.csv");
        assert!(store.get(&handle).is_err());
        assert!(store.delete(&handle).is_ok());
        assert!(!store.contains(&handle));
    }
}
