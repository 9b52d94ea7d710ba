//! Local directory storage.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{SlipStorage, SlipUpload, StorageError};

#[derive(Clone, Debug)]
pub struct DiskStorage {
    dir: PathBuf,
    public_prefix: String,
}

impl DiskStorage {
    pub fn new(dir: impl Into<PathBuf>, public_prefix: impl Into<String>) -> Self {
        Self { dir: dir.into(), public_prefix: public_prefix.into().trim_end_matches('/').to_string() }
    }


    /// Maps a reference back to a path inside the slip directory. Only the
    /// final component is used, so references cannot escape the directory.
    fn path_for(&self, reference: &str) -> Option<PathBuf> {
        let rest = reference.strip_prefix(&self.public_prefix).unwrap_or(reference);
        Path::new(rest).file_name().map(|name| self.dir.join(name))
    }
}

#[async_trait]
impl SlipStorage for DiskStorage {
    async fn store(&self, upload: &SlipUpload) -> Result<String, StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let name = upload.stored_name();
        tokio::fs::write(self.dir.join(&name), &upload.bytes).await?;
        tracing::debug!(file = %name, bytes = upload.bytes.len(), "slip file stored");
        Ok(format!("{}/{name}", self.public_prefix))
    }

    async fn delete(&self, reference: &str) -> Result<(), StorageError> {
        let Some(path) = self.path_for(reference) else { return Ok(()) };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> SlipUpload {
        SlipUpload { file_name: "slip.png".into(), content_type: "image/png".into(), bytes: b"png-bytes".to_vec() }
    }

    #[tokio::test]
    async fn test_store_then_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(tmp.path().join("slips"), "/uploads/slips/");
        let reference = storage.store(&upload()).await.unwrap();
        assert!(reference.starts_with("/uploads/slips/"));
        let path = storage.path_for(&reference).unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"png-bytes");

        storage.delete(&reference).await.unwrap();
        assert!(!path.exists());
        storage.delete(&reference).await.unwrap();
    }

    #[test]
    fn test_reference_cannot_escape_dir() {
        let storage = DiskStorage::new("/srv/slips", "/uploads/slips");
        assert_eq!(storage.path_for("/uploads/slips/../../etc/passwd"), Some(PathBuf::from("/srv/slips/passwd")));
        assert_eq!(storage.path_for("/uploads/slips/a.png"), Some(PathBuf::from("/srv/slips/a.png")));
        assert_eq!(storage.path_for("/uploads/slips/"), None);
    }
}
