//! Filesystem-backed storage for rendered artifacts.
//!
//! Completed jobs persist their image bytes here under `<job-id>.<ext>`;
//! the download path reads them back by the stored path recorded on the job.

use std::fmt::Write as FmtWrite;
use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;

use crate::domain::ImageFormat;
use crate::domain::jobs::JobId;

#[derive(Debug, Error)]
pub enum ArtifactStorageError {
    #[error("invalid stored path")]
    InvalidPath,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result of persisting an artifact.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub stored_path: String,
    pub checksum: String,
    pub size_bytes: u64,
}

#[derive(Debug)]
pub struct ArtifactStorage {
    root: PathBuf,
}

impl ArtifactStorage {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Persist the artifact for `id` and return metadata describing it.
    pub async fn store(
        &self,
        id: JobId,
        format: ImageFormat,
        data: &Bytes,
    ) -> Result<StoredArtifact, ArtifactStorageError> {
        let stored_path = format!("{id}.{}", format.extension());
        let absolute = self.resolve(&stored_path)?;

        fs::write(&absolute, data).await?;

        let digest = Sha256::digest(data);
        Ok(StoredArtifact {
            stored_path,
            checksum: hex_from_bytes(&digest),
            size_bytes: data.len() as u64,
        })
    }

    /// Read the stored artifact, or `None` when the file is missing.
    pub async fn read(&self, stored_path: &str) -> Result<Option<Bytes>, ArtifactStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::read(absolute).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ArtifactStorageError::Io(err)),
        }
    }

    /// Remove the stored artifact. Missing files are treated as success.
    pub async fn delete(&self, stored_path: &str) -> Result<(), ArtifactStorageError> {
        let absolute = self.resolve(stored_path)?;
        match fs::remove_file(&absolute).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ArtifactStorageError::Io(err)),
        }
    }

    /// Resolve a stored path under the storage root, rejecting traversal.
    fn resolve(&self, stored_path: &str) -> Result<PathBuf, ArtifactStorageError> {
        let relative = Path::new(stored_path);
        if relative.is_absolute()
            || relative
                .components()
                .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ArtifactStorageError::InvalidPath);
        }

        Ok(self.root.join(relative))
    }
}

fn hex_from_bytes(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = FmtWrite::write_fmt(&mut output, format_args!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> (tempfile::TempDir, ArtifactStorage) {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = ArtifactStorage::new(dir.path().to_path_buf()).expect("storage");
        (dir, storage)
    }

    #[tokio::test]
    async fn store_and_read_round_trip() {
        let (_dir, storage) = storage();
        let id = JobId::new();
        let data = Bytes::from_static(b"\x89PNG fake bytes");

        let stored = storage
            .store(id, ImageFormat::Png, &data)
            .await
            .expect("store");
        assert_eq!(stored.stored_path, format!("{id}.png"));
        assert_eq!(stored.size_bytes, data.len() as u64);
        assert_eq!(stored.checksum.len(), 64);

        let read = storage
            .read(&stored.stored_path)
            .await
            .expect("read")
            .expect("present");
        assert_eq!(read, data);
    }

    #[tokio::test]
    async fn missing_artifact_reads_as_none() {
        let (_dir, storage) = storage();
        let missing = storage
            .read(&format!("{}.png", JobId::new()))
            .await
            .expect("read");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn delete_tolerates_missing_files() {
        let (_dir, storage) = storage();
        storage
            .delete(&format!("{}.png", JobId::new()))
            .await
            .expect("delete succeeds");
    }

    #[tokio::test]
    async fn traversal_paths_are_rejected() {
        let (_dir, storage) = storage();
        let err = storage.read("../outside.png").await.expect_err("rejected");
        assert!(matches!(err, ArtifactStorageError::InvalidPath));
        let err = storage.read("/etc/passwd").await.expect_err("rejected");
        assert!(matches!(err, ArtifactStorageError::InvalidPath));
    }
}
