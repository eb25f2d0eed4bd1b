//! Manual import
//!
//! Validates candidate documents from a directory tree (or a single file)
//! and links the accepted ones into the store.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use keybox_engine::{Disposition, KeyboxValidator};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::{has_xml_extension, KeyboxStore, StoreOutcome};

/// Counters reported by [`import_directory`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    pub inspected: usize,
    pub linked: usize,
    pub invalid: usize,
    pub duplicates: usize,
    /// Revocation status could not be determined; retry later.
    pub deferred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportOutcome {
    Linked,
    Invalid,
    Duplicate,
    Deferred,
}

impl ImportStats {
    fn record(&mut self, outcome: ImportOutcome) {
        match outcome {
            ImportOutcome::Linked => self.linked += 1,
            ImportOutcome::Invalid => self.invalid += 1,
            ImportOutcome::Duplicate => self.duplicates += 1,
            ImportOutcome::Deferred => self.deferred += 1,
        }
    }
}

/// Validate every `*.xml` under `source` and link accepted documents into
/// `store`, running at most `concurrency` validations at a time.
///
/// A missing `source` yields empty statistics. Files inside the store
/// directory are never imported.
///
/// # Errors
///
/// Returns [`crate::StoreError::Io`] when the source tree cannot be walked.
pub async fn import_directory(
    source: &Path,
    store: &KeyboxStore,
    validator: &KeyboxValidator,
    now: DateTime<Utc>,
    concurrency: usize,
) -> StoreResult<ImportStats> {
    let mut stats = ImportStats::default();

    if !tokio::fs::try_exists(source).await? {
        warn!(source = %source.display(), "Manual import directory not found");
        return Ok(stats);
    }

    let source = tokio::fs::canonicalize(source).await?;
    let candidates = if tokio::fs::metadata(&source).await?.is_file() {
        vec![source]
    } else {
        collect_candidates(&source, store.root()).await?
    };
    debug!(candidates = candidates.len(), "Collected import candidates");

    let limit = concurrency.max(1);
    let mut tasks = JoinSet::new();
    for path in candidates {
        while tasks.len() >= limit {
            if let Some(joined) = tasks.join_next().await {
                stats.record(joined.unwrap_or(ImportOutcome::Invalid));
            }
        }
        stats.inspected += 1;
        let store = store.clone();
        let validator = validator.clone();
        tasks.spawn(async move { import_one(&path, &store, &validator, now).await });
    }
    while let Some(joined) = tasks.join_next().await {
        stats.record(joined.unwrap_or(ImportOutcome::Invalid));
    }

    info!(
        inspected = stats.inspected,
        linked = stats.linked,
        invalid = stats.invalid,
        duplicates = stats.duplicates,
        deferred = stats.deferred,
        "Manual import finished"
    );
    Ok(stats)
}

async fn import_one(
    path: &Path,
    store: &KeyboxStore,
    validator: &KeyboxValidator,
    now: DateTime<Utc>,
) -> ImportOutcome {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read candidate");
            return ImportOutcome::Invalid;
        }
    };

    let verdict = validator.validate(&bytes, now).await;
    match verdict.disposition() {
        Disposition::Reject => {
            warn!(path = %path.display(), reason = ?verdict.reason, "Invalid keybox ignored");
            ImportOutcome::Invalid
        }
        Disposition::Retry => {
            warn!(path = %path.display(), "Revocation status unavailable, import deferred");
            ImportOutcome::Deferred
        }
        Disposition::Accept => match store.link(path, &bytes).await {
            Ok(StoreOutcome::Stored(_)) => ImportOutcome::Linked,
            Ok(StoreOutcome::Duplicate(_)) => {
                info!(path = %path.display(), "Duplicate skipped");
                ImportOutcome::Duplicate
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not store keybox");
                ImportOutcome::Invalid
            }
        },
    }
}

/// Regular `*.xml` files below `root`, skipping `exclude` and symlinks.
async fn collect_candidates(root: &Path, exclude: &Path) -> StoreResult<Vec<PathBuf>> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.starts_with(exclude) {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && has_xml_extension(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_candidates_skips_store_and_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = tokio::fs::canonicalize(dir.path()).await.unwrap();
        let store_dir = root.join("keys");
        tokio::fs::create_dir_all(root.join("a/b")).await.unwrap();
        tokio::fs::create_dir_all(&store_dir).await.unwrap();
        tokio::fs::write(root.join("top.xml"), "x").await.unwrap();
        tokio::fs::write(root.join("a/b/deep.XML"), "x").await.unwrap();
        tokio::fs::write(root.join("a/readme.md"), "x").await.unwrap();
        tokio::fs::write(store_dir.join("stored.xml"), "x").await.unwrap();

        let found = collect_candidates(&root, &store_dir).await.unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(found.len(), 2);
        assert!(names.contains(&"top.xml".to_string()));
        assert!(names.contains(&"deep.XML".to_string()));
    }

    #[test]
    fn test_stats_record() {
        let mut stats = ImportStats::default();
        stats.record(ImportOutcome::Linked);
        stats.record(ImportOutcome::Duplicate);
        stats.record(ImportOutcome::Deferred);
        stats.record(ImportOutcome::Invalid);
        assert_eq!(
            stats,
            ImportStats {
                inspected: 0,
                linked: 1,
                invalid: 1,
                duplicates: 1,
                deferred: 1,
            }
        );
    }
}
