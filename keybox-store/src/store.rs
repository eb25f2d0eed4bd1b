//! Content-addressed keybox store
//!
//! A flat directory of `<sha256>.xml` files. The name of a stored document
//! is derived from its canonical form, so re-importing a reformatted copy of
//! a known keybox is detected as a duplicate.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::canonical;
use crate::error::{StoreError, StoreResult};

/// Result of adding a document to the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Stored(PathBuf),
    /// A document with the same canonical form is already present.
    Duplicate(PathBuf),
}

/// Directory of stored keyboxes
#[derive(Debug, Clone)]
pub struct KeyboxStore {
    root: PathBuf,
}

impl KeyboxStore {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be created or
    /// resolved.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        tokio::fs::create_dir_all(root.as_ref()).await?;
        let root = tokio::fs::canonicalize(root.as_ref()).await?;
        debug!(root = %root.display(), "Opened keybox store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Destination a document would be stored under.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotXml`] when no canonical form exists.
    pub fn path_for(&self, bytes: &[u8]) -> StoreResult<PathBuf> {
        Ok(self.root.join(canonical::file_name(bytes)?))
    }

    /// Write `bytes` under their content name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the document has no canonical form or the
    /// file cannot be written.
    pub async fn insert(&self, bytes: &[u8]) -> StoreResult<StoreOutcome> {
        let destination = self.path_for(bytes)?;
        self.write_new(&destination, bytes).await
    }

    /// Hard-link `source` into the store, copying its bytes when a link is
    /// not possible (e.g. across file systems).
    ///
    /// `bytes` must be the current content of `source`; it names the
    /// destination.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when neither link nor copy succeeds.
    pub async fn link(&self, source: &Path, bytes: &[u8]) -> StoreResult<StoreOutcome> {
        let destination = self.path_for(bytes)?;
        match tokio::fs::hard_link(source, &destination).await {
            Ok(()) => {
                info!(source = %source.display(), destination = %destination.display(), "Linked keybox into store");
                Ok(StoreOutcome::Stored(destination))
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(StoreOutcome::Duplicate(destination)),
            Err(e) => {
                debug!(source = %source.display(), error = %e, "Hard link failed, copying instead");
                self.write_new(&destination, bytes).await
            }
        }
    }

    async fn write_new(&self, destination: &Path, bytes: &[u8]) -> StoreResult<StoreOutcome> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .await;
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Ok(StoreOutcome::Duplicate(destination.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        write_complete(destination, &mut file, bytes).await?;
        info!(destination = %destination.display(), "Stored keybox");
        Ok(StoreOutcome::Stored(destination.to_path_buf()))
    }

    /// Whether a document with the same canonical form is stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for non-XML input or an unreadable store.
    pub async fn contains(&self, bytes: &[u8]) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(bytes)?).await?)
    }

    /// Stored documents, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] when the directory cannot be read.
    pub async fn list(&self) -> StoreResult<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && has_xml_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Delete a stored document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OutsideStore`] for paths not directly inside the
    /// store, or [`StoreError::Io`] when the file cannot be removed.
    pub async fn remove(&self, path: &Path) -> StoreResult<()> {
        if path.parent() != Some(self.root.as_path()) {
            return Err(StoreError::OutsideStore(path.to_path_buf()));
        }
        tokio::fs::remove_file(path).await?;
        info!(path = %path.display(), "Removed keybox from store");
        Ok(())
    }
}

pub(crate) fn has_xml_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("xml"))
}

/// Write `bytes` to the freshly created `destination`, removing it again on
/// failure so a partial file never sits under a content-hash name.
async fn write_complete<W>(destination: &Path, file: &mut W, bytes: &[u8]) -> StoreResult<()>
where
    W: AsyncWrite + Unpin,
{
    let written = match file.write_all(bytes).await {
        Ok(()) => file.flush().await,
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        warn!(destination = %destination.display(), error = %e, "Write failed, discarding partial file");
        if let Err(remove) = tokio::fs::remove_file(destination).await {
            warn!(destination = %destination.display(), error = %remove, "Failed to discard partial file");
        }
        return Err(e.into());
    }
    Ok(())
}
