//! Filesystem content store.
//!
//! Objects live at `{root}/{bucket}/{path}`. Writes go to a sibling temp
//! file first and are renamed into place, so a reader never observes a
//! half-written packet.

use super::{validate_key, ContentStore};
use crate::error::StoreError;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, StoreError> {
        validate_key(bucket, path)?;
        let mut full = self.root.join(bucket);
        full.extend(path.split('/'));
        Ok(full)
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>, _content_type: &str) -> Result<(), StoreError> {
        let full_path = self.object_path(bucket, path)?;
        debug!("Writing {} bytes to {}", bytes.len(), full_path.display());

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut tmp_name = full_path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, &full_path).await.map_err(|e| {
            warn!("Rename {} -> {} failed: {}", tmp_path.display(), full_path.display(), e);
            e
        })?;
        Ok(())
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        let full_path = self.object_path(bucket, path)?;
        match fs::read(&full_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{bucket}/{path}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StoreError> {
        for path in paths {
            let full_path = self.object_path(bucket, path)?;
            match fs::remove_file(&full_path).await {
                Ok(()) => debug!("Removed {}", full_path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_overwrite_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());

        store.put("claim_packets", "u/c/packet.pdf", b"one".to_vec(), "application/pdf").await.unwrap();
        store.put("claim_packets", "u/c/packet.pdf", b"two".to_vec(), "application/pdf").await.unwrap();
        assert_eq!(store.get("claim_packets", "u/c/packet.pdf").await.unwrap(), b"two");
        assert!(dir.path().join("claim_packets/u/c/packet.pdf").exists());
        assert!(!dir.path().join("claim_packets/u/c/packet.pdf.tmp").exists());

        store.remove("claim_packets", &["u/c/packet.pdf".to_string()]).await.unwrap();
        assert!(matches!(
            store.get("claim_packets", "u/c/packet.pdf").await,
            Err(StoreError::NotFound(_))
        ));
        // Removing again is fine.
        store.remove("claim_packets", &["u/c/packet.pdf".to_string()]).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let err = store.put("b", "../outside", vec![1], "x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn signed_urls_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path());
        let err = store.signed_url("b", "a.pdf", 60).await.unwrap_err();
        assert!(matches!(err, StoreError::Unsupported(_)));
    }
}
