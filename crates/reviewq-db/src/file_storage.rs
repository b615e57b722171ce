//! Filesystem storage for uploaded task files.
//!
//! Layout: `{base_path}/{task_id}/{file_id}.bin`. Grouping by task lets a
//! cancel or retention sweep remove every byte of a task with one directory
//! delete.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

use reviewq_core::{Result, UploadStore};

/// Upload store backed by a local directory.
#[derive(Debug, Clone)]
pub struct FilesystemUploadStore {
    base_path: PathBuf,
}

impl FilesystemUploadStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &std::path::Path {
        &self.base_path
    }

    fn task_dir(&self, task_id: Uuid) -> PathBuf {
        self.base_path.join(task_id.to_string())
    }

    fn file_path(&self, task_id: Uuid, file_id: Uuid) -> PathBuf {
        self.task_dir(task_id).join(format!("{file_id}.bin"))
    }

    /// Round-trip a check file so permission problems surface at startup.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let check_dir = self.base_path.join(".health-check");
        let check_file = check_dir.join("check.bin");

        fs::create_dir_all(&check_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", check_dir, e))?;

        let data = b"upload-store-health-check";
        fs::write(&check_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", check_file, e))?;

        let read_back = fs::read(&check_file)
            .await
            .map_err(|e| format!("read({:?}): {}", check_file, e))?;
        if read_back != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&check_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", check_file, e))?;
        let _ = fs::remove_dir(&check_dir).await;

        Ok(())
    }
}

#[async_trait]
impl UploadStore for FilesystemUploadStore {
    async fn write(&self, task_id: Uuid, file_id: Uuid, data: &[u8]) -> Result<()> {
        let full_path = self.file_path(task_id, file_id);
        debug!(
            subsystem = "db",
            component = "uploads",
            task_id = %task_id,
            full_path = %full_path.display(),
            size = data.len(),
            "upload_store: write"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "upload_store: create_dir_all failed");
                e
            })?;
        }

        // Atomic write: temp file + rename
        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "upload_store: File::create failed");
            e
        })?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "upload_store: rename failed");
            e
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }

    async fn read(&self, task_id: Uuid, file_id: Uuid) -> Result<Vec<u8>> {
        Ok(fs::read(self.file_path(task_id, file_id)).await?)
    }

    async fn purge_task(&self, task_id: Uuid) -> Result<()> {
        let dir = self.task_dir(task_id);
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await?;
            debug!(subsystem = "db", component = "uploads", task_id = %task_id, "upload_store: purged");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemUploadStore::new(dir.path());
        let (task_id, file_id) = (Uuid::new_v4(), Uuid::new_v4());

        store.write(task_id, file_id, b"contract text").await.unwrap();

        assert_eq!(store.read(task_id, file_id).await.unwrap(), b"contract text");
        assert!(!dir
            .path()
            .join(task_id.to_string())
            .join(format!("{file_id}.tmp"))
            .exists());
    }

    #[tokio::test]
    async fn test_purge_removes_every_file_of_task() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemUploadStore::new(dir.path());
        let task_id = Uuid::new_v4();
        let other_task = Uuid::new_v4();

        store.write(task_id, Uuid::new_v4(), b"a").await.unwrap();
        store.write(task_id, Uuid::new_v4(), b"b").await.unwrap();
        store.write(other_task, Uuid::new_v4(), b"c").await.unwrap();

        store.purge_task(task_id).await.unwrap();

        assert!(!dir.path().join(task_id.to_string()).exists());
        assert!(dir.path().join(other_task.to_string()).exists());
    }

    #[tokio::test]
    async fn test_purge_missing_task_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemUploadStore::new(dir.path());
        store.purge_task(Uuid::new_v4()).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemUploadStore::new(dir.path());
        let err = store.read(Uuid::new_v4(), Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), "IO_ERROR");
    }

    #[tokio::test]
    async fn test_validate_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemUploadStore::new(dir.path().join("uploads"));
        store.validate().await.unwrap();
        assert!(!dir.path().join("uploads/.health-check").exists());
    }
}
