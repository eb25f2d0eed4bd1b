//! Subcommand implementations

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use keybox_engine::{Disposition, KeyboxValidator, TrustAnchorSet, Verdict};
use keybox_store::{cleanup_store, import_directory, CleanupStats, ImportStats, KeyboxStore};
use serde::Serialize;
use tracing::info;

use crate::config::KeyboxerConfig;
use crate::output::{print_section, print_summary, verdict_line};

pub fn build_validator(config: &KeyboxerConfig) -> Result<KeyboxValidator> {
    let anchors = TrustAnchorSet::from_pem_file(&config.anchors)
        .with_context(|| format!("Failed to load trust anchors from {}", config.anchors.display()))?;
    KeyboxValidator::from_config(&config.engine(), Arc::new(anchors))
        .context("Failed to set up the revocation source")
}

#[derive(Debug, Serialize)]
struct CheckReport<'a> {
    path: &'a Path,
    disposition: Disposition,
    #[serde(flatten)]
    verdict: &'a Verdict,
}

/// Validate each file and print its verdict. Returns whether all passed.
pub async fn check(validator: &KeyboxValidator, files: &[PathBuf], json: bool) -> Result<bool> {
    let mut verdicts = Vec::with_capacity(files.len());
    for path in files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        verdicts.push(validator.validate(&bytes, Utc::now()).await);
    }

    if json {
        let reports: Vec<CheckReport<'_>> = files
            .iter()
            .zip(&verdicts)
            .map(|(path, verdict)| CheckReport {
                path,
                disposition: verdict.disposition(),
                verdict,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for (path, verdict) in files.iter().zip(&verdicts) {
            println!("{}", verdict_line(&path.display().to_string(), verdict));
        }
    }

    Ok(verdicts.iter().all(|verdict| verdict.valid))
}

pub async fn import(
    config: &KeyboxerConfig,
    validator: &KeyboxValidator,
    source: &Path,
) -> Result<ImportStats> {
    let store = KeyboxStore::open(&config.store_dir)
        .await
        .with_context(|| format!("Failed to open store {}", config.store_dir.display()))?;

    print_section("Importing manual keyboxes");
    info!(source = %source.display(), store = %store.root().display(), "Starting manual import");
    let stats = import_directory(source, &store, validator, Utc::now(), config.concurrency)
        .await
        .context("Manual import failed")?;

    print_summary(
        "Import Summary",
        &[
            ("Inspected", stats.inspected),
            ("Linked", stats.linked),
            ("Invalid", stats.invalid),
            ("Duplicates", stats.duplicates),
            ("Deferred", stats.deferred),
        ],
    );
    Ok(stats)
}

pub async fn cleanup(config: &KeyboxerConfig, validator: &KeyboxValidator) -> Result<CleanupStats> {
    let store = KeyboxStore::open(&config.store_dir)
        .await
        .with_context(|| format!("Failed to open store {}", config.store_dir.display()))?;

    print_section("Cleaning up stored keyboxes");
    let stats = cleanup_store(&store, validator, Utc::now(), config.concurrency)
        .await
        .context("Cleanup failed")?;

    print_summary(
        "Cleanup Summary",
        &[
            ("Inspected", stats.inspected),
            ("Removed", stats.removed),
            ("Deferred", stats.deferred),
            ("Errors", stats.errors),
        ],
    );
    Ok(stats)
}
