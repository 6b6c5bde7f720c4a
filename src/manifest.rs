//! CSV manifests of a finished batch
//!
//! The main manifest has one row per descriptor, sorted by (parent id, attachment id).
//! The failure manifest sits next to it with the same name plus a suffix and lists only
//! the descriptors that are still failed. It exists only while something is failed: a
//! clean run removes the one left behind by an earlier run.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::OutputConfig;
use crate::error::{Error, Result};
use crate::types::{Batch, OutcomeStatus};
use crate::utils::{resolve_path, suffixed_path};

const MANIFEST_HEADER: [&str; 9] = [
    "parent_id",
    "attachment_id",
    "display_name",
    "resolved_path",
    "status",
    "attempts",
    "bytes",
    "sha256",
    "source_location",
];

const FAILURE_HEADER: [&str; 6] = [
    "parent_id",
    "attachment_id",
    "display_name",
    "source_location",
    "attempts",
    "last_error",
];

#[derive(Serialize)]
struct ManifestRow<'a> {
    parent_id: &'a str,
    attachment_id: &'a str,
    display_name: &'a str,
    resolved_path: String,
    status: OutcomeStatus,
    attempts: u32,
    bytes: Option<u64>,
    sha256: Option<&'a str>,
    source_location: &'a str,
}

#[derive(Serialize)]
struct FailureRow<'a> {
    parent_id: &'a str,
    attachment_id: &'a str,
    display_name: &'a str,
    source_location: &'a str,
    attempts: u32,
    last_error: &'a str,
}

/// Where a [`ManifestWriter::write`] call put its tables
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestPaths {
    /// Main manifest
    pub manifest: PathBuf,
    /// Failure manifest, only when at least one descriptor failed
    pub failure_manifest: Option<PathBuf>,
}

/// Writes the main and failure manifests of a batch
#[derive(Clone, Debug)]
pub struct ManifestWriter {
    manifest_name: String,
    failure_suffix: String,
}

impl ManifestWriter {
    /// Writer using the file names of `output`
    pub fn new(output: &OutputConfig) -> Self {
        Self {
            manifest_name: output.manifest_name.clone(),
            failure_suffix: output.failure_suffix.clone(),
        }
    }

    /// Write the manifests of `batch` into `directory`
    ///
    /// Rows reflect the latest outcome of each descriptor, so call this after
    /// reconciliation. A `resolved_path` is written for every row; for failed rows it is
    /// where the file would have been saved.
    pub fn write(&self, batch: &Batch, directory: &Path) -> Result<ManifestPaths> {
        std::fs::create_dir_all(directory).map_err(|source| Error::DestinationUnwritable {
            path: directory.to_path_buf(),
            source,
        })?;

        let manifest = directory.join(&self.manifest_name);
        let failure_manifest = suffixed_path(&manifest, &self.failure_suffix);
        let outcomes = batch.final_outcomes();

        write_table(&manifest, &MANIFEST_HEADER, outcomes.iter().map(|o| {
            let d = &o.descriptor;
            ManifestRow {
                parent_id: d.parent_record_id().as_str(),
                attachment_id: d.attachment_id().as_str(),
                display_name: d.display_name(),
                resolved_path: o
                    .resolved_path
                    .clone()
                    .unwrap_or_else(|| resolve_path(d))
                    .display()
                    .to_string(),
                status: o.status,
                attempts: o.attempts_made,
                bytes: o.receipt.as_ref().map(|r| r.bytes),
                sha256: o.receipt.as_ref().and_then(|r| r.sha256.as_deref()),
                source_location: d.source_location(),
            }
        }))?;

        let failures: Vec<_> = outcomes.iter().filter(|o| !o.is_success()).collect();
        if failures.is_empty() {
            remove_stale(&failure_manifest)?;
            tracing::debug!(
                unit = %batch.unit(),
                manifest = %manifest.display(),
                rows = outcomes.len(),
                "Manifest written"
            );
            return Ok(ManifestPaths {
                manifest,
                failure_manifest: None,
            });
        }

        write_table(&failure_manifest, &FAILURE_HEADER, failures.iter().map(|o| {
            let d = &o.descriptor;
            FailureRow {
                parent_id: d.parent_record_id().as_str(),
                attachment_id: d.attachment_id().as_str(),
                display_name: d.display_name(),
                source_location: d.source_location(),
                attempts: o.attempts_made,
                last_error: o.last_error.as_deref().unwrap_or_default(),
            }
        }))?;

        tracing::debug!(
            unit = %batch.unit(),
            manifest = %manifest.display(),
            failure_manifest = %failure_manifest.display(),
            rows = outcomes.len(),
            failed = failures.len(),
            "Manifests written"
        );
        Ok(ManifestPaths {
            manifest,
            failure_manifest: Some(failure_manifest),
        })
    }
}

fn write_table<R: Serialize>(
    path: &Path,
    header: &[&str],
    rows: impl Iterator<Item = R>,
) -> Result<()> {
    let to_error = |source: csv::Error| Error::Manifest {
        path: path.to_path_buf(),
        source,
    };

    // the header is written by hand so an empty table still has one
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(to_error)?;
    writer.write_record(header).map_err(to_error)?;
    for row in rows {
        writer.serialize(row).map_err(to_error)?;
    }
    writer.flush().map_err(|e| to_error(e.into()))?;
    Ok(())
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(path = %path.display(), "Removed stale failure manifest");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Io(e)),
    }
}
