//! File storage adapter.
//!
//! The engine only needs three things from storage: put a file under a
//! namespace and get back an opaque relative path, read it back, and
//! delete it. [`FileStorage`] is that contract:
//!
//! - `store` either returns a resolvable path or fails.
//! - `delete` is idempotent: a missing path yields `Ok(false)`, not an error.
//!
//! Stored names are a fresh UUID plus the original extension, so two
//! uploads can never collide.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::UploadFile;

#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Persist `file` under `namespace`, returning its relative path.
    async fn store(&self, file: &UploadFile, namespace: &str) -> Result<String>;

    /// Read a previously stored file.
    async fn load(&self, path: &str) -> Result<Vec<u8>>;

    /// Delete a stored file. Returns whether something was removed.
    async fn delete(&self, path: &str) -> Result<bool>;
}

/// Collision-free stored name for an upload.
pub fn unique_file_name(file: &UploadFile) -> String {
    match file.extension() {
        Some(ext) => format!("{}{}", Uuid::new_v4(), ext),
        None => Uuid::new_v4().to_string(),
    }
}

/// Normalize a relative storage path, rejecting anything that could
/// escape the storage root.
pub fn clean_relative(path: &str) -> Result<PathBuf> {
    let trimmed = path.trim().trim_start_matches(['/', '\\']);
    if trimmed.is_empty() {
        bail!("empty storage path");
    }
    let mut out = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                bail!("storage path escapes root: {}", path)
            }
        }
    }
    if out.as_os_str().is_empty() {
        bail!("empty storage path");
    }
    Ok(out)
}

fn to_storage_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Stores files on the local filesystem under a root directory.
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    /// Create the root directory if needed and return the adapter.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root: {}", root.display()))?;
        info!(root = %root.display(), "file storage ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(clean_relative(path)?))
    }
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn store(&self, file: &UploadFile, namespace: &str) -> Result<String> {
        if file.is_empty() {
            bail!("cannot store empty file {}", file.file_name);
        }
        if file.file_name.contains("..") {
            bail!("file name contains an invalid path sequence: {}", file.file_name);
        }

        let dir = clean_relative(namespace)?;
        let relative = dir.join(unique_file_name(file));
        let target = self.root.join(&relative);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        tokio::fs::write(&target, &file.data)
            .await
            .with_context(|| format!("Failed to write {}", target.display()))?;

        let stored = to_storage_path(&relative);
        debug!(path = %stored, bytes = file.data.len(), "stored file");
        Ok(stored)
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                debug!(path = %path, "deleted file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path, "file to delete does not exist");
                Ok(false)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path)),
        }
    }
}

/// Keeps files in memory. Used by tests and for running without a disk.
#[derive(Default)]
pub struct MemoryFileStorage {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryFileStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files
            .read()
            .map(|files| files.contains_key(path))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.files.read().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .files
            .read()
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }
}

#[async_trait]
impl FileStorage for MemoryFileStorage {
    async fn store(&self, file: &UploadFile, namespace: &str) -> Result<String> {
        if file.is_empty() {
            bail!("cannot store empty file {}", file.file_name);
        }
        let relative = clean_relative(namespace)?.join(unique_file_name(file));
        let stored = to_storage_path(&relative);
        self.files
            .write()
            .map_err(|_| anyhow!("memory storage lock poisoned"))?
            .insert(stored.clone(), file.data.clone());
        Ok(stored)
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .map_err(|_| anyhow!("memory storage lock poisoned"))?
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("file not found: {}", path))
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self
            .files
            .write()
            .map_err(|_| anyhow!("memory storage lock poisoned"))?
            .remove(path)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn jpeg(name: &str) -> UploadFile {
        UploadFile::new(name, "image/jpeg", vec![0xFF, 0xD8, 0xFF])
    }

    #[test]
    fn test_clean_relative_rejects_escape() {
        assert!(clean_relative("../etc/passwd").is_err());
        assert!(clean_relative("reviews/../../x").is_err());
        assert!(clean_relative("").is_err());
        assert_eq!(
            clean_relative("/reviews/3/a.jpg").unwrap(),
            PathBuf::from("reviews/3/a.jpg")
        );
    }

    #[test]
    fn test_unique_names_keep_extension() {
        let f = jpeg("bowl.jpg");
        let a = unique_file_name(&f);
        let b = unique_file_name(&f);
        assert_ne!(a, b);
        assert!(a.ends_with(".jpg"));
    }

    #[tokio::test]
    async fn test_local_store_load_delete() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalFileStorage::init(tmp.path().join("uploads")).unwrap();

        let path = storage.store(&jpeg("a.jpg"), "reviews/1").await.unwrap();
        assert!(path.starts_with("reviews/1/"));
        assert_eq!(storage.load(&path).await.unwrap(), vec![0xFF, 0xD8, 0xFF]);

        assert!(storage.delete(&path).await.unwrap());
        // Second delete is a no-op, not an error.
        assert!(!storage.delete(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_store_rejects_empty_and_traversal() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalFileStorage::init(tmp.path()).unwrap();

        let empty = UploadFile::new("a.jpg", "image/jpeg", vec![]);
        assert!(storage.store(&empty, "reviews/1").await.is_err());
        assert!(storage.store(&jpeg("a.jpg"), "../outside").await.is_err());
        assert!(storage.delete("../outside.jpg").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_storage_is_idempotent_on_delete() {
        let storage = MemoryFileStorage::new();
        let path = storage.store(&jpeg("a.png"), "shops/2").await.unwrap();
        assert!(storage.contains(&path));
        assert!(storage.delete(&path).await.unwrap());
        assert!(!storage.delete(&path).await.unwrap());
        assert!(storage.is_empty());
    }
}
