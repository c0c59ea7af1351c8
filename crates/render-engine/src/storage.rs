//! Source storage collaborators.
//!
//! The render engines never touch storage directly; they ask a
//! [`SourceStore`] for either a direct filesystem handle (preferred, no copy)
//! or the file's bytes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use reelsmith_project_model::{SourceFile, StorageRef};

/// Resolves source files to bytes or filesystem handles.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Read the whole file into memory.
    async fn load_source_bytes(&self, file: &SourceFile) -> ReelsmithResult<Vec<u8>>;

    /// A path the engines can read directly, if the store has one.
    async fn load_backing_handle(&self, file: &SourceFile) -> ReelsmithResult<Option<PathBuf>>;
}

/// Filesystem store: handles are paths, keys live under a sharded root.
#[derive(Debug, Clone)]
pub struct FsSourceStore {
    root: PathBuf,
}

impl FsSourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a content key: `<root>/<first two chars>/<key>`.
    pub fn key_path(&self, key: &str) -> PathBuf {
        let shard: String = key.chars().take(2).collect();
        self.root.join(shard).join(key)
    }

    fn path_for(&self, file: &SourceFile) -> PathBuf {
        match &file.storage {
            StorageRef::Handle(path) => path.clone(),
            StorageRef::Key(key) => self.key_path(key),
        }
    }
}

#[async_trait]
impl SourceStore for FsSourceStore {
    async fn load_source_bytes(&self, file: &SourceFile) -> ReelsmithResult<Vec<u8>> {
        let path = self.path_for(file);
        tokio::fs::read(&path)
            .await
            .map_err(|e| map_read_error(&file.id, &path, e))
    }

    async fn load_backing_handle(&self, file: &SourceFile) -> ReelsmithResult<Option<PathBuf>> {
        let path = self.path_for(file);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(path)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_read_error(&file.id, &path, e)),
        }
    }
}

fn map_read_error(file_id: &str, path: &Path, err: std::io::Error) -> ReelsmithError {
    match err.kind() {
        std::io::ErrorKind::NotFound => ReelsmithError::file_not_found(file_id),
        std::io::ErrorKind::PermissionDenied => ReelsmithError::StorageAccessDenied {
            message: format!("{}: {err}", path.display()),
        },
        _ => ReelsmithError::Io(err),
    }
}

/// In-memory store keyed by file id. Never offers a backing handle.
#[derive(Debug, Default)]
pub struct MemorySourceStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, file_id: impl Into<String>, bytes: Vec<u8>) {
        self.files.write().insert(file_id.into(), bytes);
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn load_source_bytes(&self, file: &SourceFile) -> ReelsmithResult<Vec<u8>> {
        self.files
            .read()
            .get(&file.id)
            .cloned()
            .ok_or_else(|| ReelsmithError::file_not_found(&file.id))
    }

    async fn load_backing_handle(&self, _file: &SourceFile) -> ReelsmithResult<Option<PathBuf>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsmith_common::error::ErrorKind;

    #[test]
    fn test_key_path_is_sharded() {
        let store = FsSourceStore::new("/data/store");
        assert_eq!(
            store.key_path("ab12cd"),
            PathBuf::from("/data/store/ab/ab12cd")
        );
    }

    #[tokio::test]
    async fn test_fs_store_resolves_keys_and_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSourceStore::new(dir.path());
        let key_path = store.key_path("ff00");
        std::fs::create_dir_all(key_path.parent().unwrap()).unwrap();
        std::fs::write(&key_path, b"keyed").unwrap();

        let keyed = SourceFile::new("f1", StorageRef::Key("ff00".into()), 1.0);
        assert_eq!(store.load_source_bytes(&keyed).await.unwrap(), b"keyed");
        assert_eq!(store.load_backing_handle(&keyed).await.unwrap(), Some(key_path));

        let missing = SourceFile::new("f2", StorageRef::Handle(dir.path().join("nope.mp4")), 1.0);
        assert_eq!(store.load_backing_handle(&missing).await.unwrap(), None);
        let err = store.load_source_bytes(&missing).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemorySourceStore::new();
        store.insert("f1", vec![1, 2, 3]);
        let file = SourceFile::new("f1", StorageRef::Key("x".into()), 1.0);
        assert_eq!(store.load_source_bytes(&file).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.load_backing_handle(&file).await.unwrap(), None);

        let other = SourceFile::new("f9", StorageRef::Key("y".into()), 1.0);
        assert!(store.load_source_bytes(&other).await.is_err());
    }
}
