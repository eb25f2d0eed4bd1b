use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{RevocationSnapshot, RevocationSource};
use crate::error::{RevocationError, RevocationResult};

/// Status list snapshot stored on disk, re-read on every call
#[derive(Debug, Clone)]
pub struct FileRevocationSource {
    path: PathBuf,
}

impl FileRevocationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RevocationSource for FileRevocationSource {
    async fn snapshot(&self) -> RevocationResult<Arc<RevocationSnapshot>> {
        let body = tokio::fs::read(&self.path).await.map_err(|e| {
            RevocationError::Unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        let snapshot = RevocationSnapshot::from_json(&body)?;
        debug!(path = %self.path.display(), entries = snapshot.len(), "Loaded status list snapshot");
        Ok(Arc::new(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::SerialNumber;
    use crate::revocation::RevocationStatus;
    use keybox_testkit::status_list_json;

    #[tokio::test]
    async fn test_reads_snapshot_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, status_list_json(&[("abc", "REVOKED")])).unwrap();

        let source = FileRevocationSource::new(&path);
        let snapshot = source.snapshot().await.unwrap();
        let serial = SerialNumber::from_hex("0abc").unwrap();
        assert_eq!(snapshot.lookup(&serial), RevocationStatus::Revoked);
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FileRevocationSource::new(dir.path().join("absent.json"));
        assert!(matches!(
            source.snapshot().await,
            Err(RevocationError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        std::fs::write(&path, "{\"entries\": ").unwrap();

        let source = FileRevocationSource::new(path);
        assert!(matches!(
            source.snapshot().await,
            Err(RevocationError::InvalidSnapshot(_))
        ));
    }
}
