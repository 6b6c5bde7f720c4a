//! Path resolution and file-name helpers
//!
//! Everything here is pure: no function touches the filesystem, so the same inputs
//! always produce the same paths and re-running a backup overwrites rather than
//! duplicates.

use crate::config::{OutputConfig, UnitConfig, UnitSubdirectory};
use crate::error::{Error, Result};
use crate::types::AttachmentDescriptor;
use chrono::NaiveDate;
use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Characters that are illegal in file names on at least one supported platform
const ILLEGAL_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Local path for a descriptor: `{target_root}/{parent_record_id}/{attachment_id}/{display_name}`
///
/// Nesting by parent and attachment id keeps two attachments with the same display name
/// apart, and gives every attachment a directory no other worker writes to.
///
/// # Examples
///
/// ```
/// use attachment_backup::types::AttachmentDescriptor;
/// use attachment_backup::utils::resolve_path;
/// use std::path::Path;
///
/// let d = AttachmentDescriptor::new(12i64, 3i64, "photo.jpg", "https://example.com/a", "/backups");
/// assert_eq!(resolve_path(&d), Path::new("/backups/12/3/photo.jpg"));
/// ```
#[must_use]
pub fn resolve_path(descriptor: &AttachmentDescriptor) -> PathBuf {
    descriptor
        .target_root()
        .join(descriptor.parent_record_id().as_str())
        .join(descriptor.attachment_id().as_str())
        .join(descriptor.display_name())
}

/// Make a remote file name safe to use as a local file name
///
/// Replaces path separators, reserved characters and control characters with `_` and
/// strips trailing dots and spaces. An empty name stays empty so that descriptor
/// validation can report it.
///
/// # Examples
///
/// ```
/// use attachment_backup::utils::sanitize_display_name;
///
/// assert_eq!(sanitize_display_name("a/b:c?.jpg"), "a_b_c_.jpg");
/// assert_eq!(sanitize_display_name("notes. "), "notes");
/// ```
#[must_use]
pub fn sanitize_display_name(name: &str) -> String {
    if name.trim().is_empty() {
        return String::new();
    }

    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_control() || ILLEGAL_FILENAME_CHARS.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim_end_matches(['.', ' ']);
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Relative directory of a unit below the run directory (empty for [`UnitSubdirectory::None`])
pub(crate) fn unit_directory_name(output: &OutputConfig, unit: &UnitConfig) -> PathBuf {
    match output.unit_subdirectory {
        UnitSubdirectory::None => PathBuf::new(),
        UnitSubdirectory::UnitName => PathBuf::from(sanitize_display_name(&unit.name)),
        UnitSubdirectory::ItemId => PathBuf::from(sanitize_display_name(&unit.item_id)),
    }
}

/// Directory shared by all units of a run started on `date`
///
/// `{target_root}` or, with date stamping, `{target_root}/{date formatted with date_format}`.
pub fn run_directory(output: &OutputConfig, date: NaiveDate) -> Result<PathBuf> {
    if !output.date_stamp {
        return Ok(output.target_root.clone());
    }

    let mut stamp = String::new();
    write!(stamp, "{}", date.format(&output.date_format)).map_err(|_| {
        Error::config(
            format!("invalid date format {:?}", output.date_format),
            "output.date_format",
        )
    })?;
    Ok(output.target_root.join(sanitize_display_name(&stamp)))
}

/// Directory holding one unit's attachments and manifests
pub fn unit_directory(output: &OutputConfig, unit: &UnitConfig, date: NaiveDate) -> Result<PathBuf> {
    Ok(run_directory(output, date)?.join(unit_directory_name(output, unit)))
}

/// Path of the failure manifest next to `manifest`, with `suffix` before the extension
///
/// # Examples
///
/// ```
/// use attachment_backup::utils::suffixed_path;
/// use std::path::Path;
///
/// assert_eq!(
///     suffixed_path(Path::new("/b/attachments.csv"), "_failed"),
///     Path::new("/b/attachments_failed.csv")
/// );
/// ```
#[must_use]
pub fn suffixed_path(manifest: &Path, suffix: &str) -> PathBuf {
    let stem = manifest
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match manifest.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    manifest.with_file_name(name)
}
