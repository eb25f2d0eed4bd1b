//! Store cleanup
//!
//! Re-validates every stored document and deletes those that no longer
//! pass. Documents whose revocation status cannot be determined are left in
//! place.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use keybox_engine::{Disposition, KeyboxValidator};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::StoreResult;
use crate::store::KeyboxStore;

/// Counters reported by [`cleanup_store`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupStats {
    pub inspected: usize,
    pub removed: usize,
    pub deferred: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CleanupOutcome {
    Kept,
    Removed,
    Deferred,
    Failed,
}

impl CleanupStats {
    fn record(&mut self, outcome: CleanupOutcome) {
        match outcome {
            CleanupOutcome::Kept => {}
            CleanupOutcome::Removed => self.removed += 1,
            CleanupOutcome::Deferred => self.deferred += 1,
            CleanupOutcome::Failed => self.errors += 1,
        }
    }
}

/// Validate every stored document at `now`, deleting rejected ones.
///
/// # Errors
///
/// Returns [`crate::StoreError::Io`] when the store cannot be listed.
pub async fn cleanup_store(
    store: &KeyboxStore,
    validator: &KeyboxValidator,
    now: DateTime<Utc>,
    concurrency: usize,
) -> StoreResult<CleanupStats> {
    let mut stats = CleanupStats::default();
    let limit = concurrency.max(1);
    let mut tasks = JoinSet::new();

    for path in store.list().await? {
        while tasks.len() >= limit {
            if let Some(joined) = tasks.join_next().await {
                stats.record(joined.unwrap_or(CleanupOutcome::Failed));
            }
        }
        stats.inspected += 1;
        let store = store.clone();
        let validator = validator.clone();
        tasks.spawn(async move { clean_one(path, &store, &validator, now).await });
    }
    while let Some(joined) = tasks.join_next().await {
        stats.record(joined.unwrap_or(CleanupOutcome::Failed));
    }

    info!(
        inspected = stats.inspected,
        removed = stats.removed,
        deferred = stats.deferred,
        errors = stats.errors,
        "Cleanup finished"
    );
    Ok(stats)
}

async fn clean_one(
    path: PathBuf,
    store: &KeyboxStore,
    validator: &KeyboxValidator,
    now: DateTime<Utc>,
) -> CleanupOutcome {
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read stored keybox");
            return CleanupOutcome::Failed;
        }
    };

    let verdict = validator.validate(&bytes, now).await;
    match verdict.disposition() {
        Disposition::Accept => CleanupOutcome::Kept,
        Disposition::Retry => CleanupOutcome::Deferred,
        Disposition::Reject => {
            info!(path = %path.display(), reason = ?verdict.reason, "Stored keybox is no longer valid");
            match store.remove(&path).await {
                Ok(()) => CleanupOutcome::Removed,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Could not delete keybox");
                    CleanupOutcome::Failed
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kept_documents_only_count_as_inspected() {
        let mut stats = CleanupStats::default();
        stats.record(CleanupOutcome::Kept);
        stats.record(CleanupOutcome::Removed);
        stats.record(CleanupOutcome::Failed);
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.deferred, 0);
    }
}
