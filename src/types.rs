//! Core types for attachment-backup

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{DescriptorError, Error, Result};

/// Opaque record identifier (object ids arrive as integers or strings)
///
/// Ordering is numeric when both sides parse as integers, so `9` sorts before `10`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a RecordId from anything string-like
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Ord for RecordId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<i64>(), other.0.parse::<i64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for RecordId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(id) => Self::from(id),
            Raw::Text(id) => Self(id),
        })
    }
}

/// Identity of an attachment within a batch: (parent record, attachment)
pub type AttachmentKey = (RecordId, RecordId);

/// Identity and location of one downloadable file
///
/// Immutable once constructed. `display_name` must already be safe to use as a file
/// name; [`RemoteAttachment::into_descriptor`] sanitizes it on the way in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttachmentDescriptor {
    parent_record_id: RecordId,
    attachment_id: RecordId,
    display_name: String,
    source_location: String,
    target_root: PathBuf,
}

impl AttachmentDescriptor {
    /// Create a descriptor
    pub fn new(
        parent_record_id: impl Into<RecordId>,
        attachment_id: impl Into<RecordId>,
        display_name: impl Into<String>,
        source_location: impl Into<String>,
        target_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            parent_record_id: parent_record_id.into(),
            attachment_id: attachment_id.into(),
            display_name: display_name.into(),
            source_location: source_location.into(),
            target_root: target_root.into(),
        }
    }

    /// Parent record identifier
    pub fn parent_record_id(&self) -> &RecordId {
        &self.parent_record_id
    }

    /// Attachment identifier, unique within the parent
    pub fn attachment_id(&self) -> &RecordId {
        &self.attachment_id
    }

    /// File name the attachment is saved under
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Download location
    pub fn source_location(&self) -> &str {
        &self.source_location
    }

    /// Base directory of the batch
    pub fn target_root(&self) -> &Path {
        &self.target_root
    }

    /// Batch-unique identity
    pub fn key(&self) -> AttachmentKey {
        (self.parent_record_id.clone(), self.attachment_id.clone())
    }

    /// Check that the descriptor can be materialized at all
    ///
    /// Failures here are permanent: retrying will not fix an empty field or a bad URL.
    pub fn validate(&self) -> std::result::Result<(), DescriptorError> {
        check_segment("parent_record_id", self.parent_record_id.as_str())?;
        check_segment("attachment_id", self.attachment_id.as_str())?;
        check_segment("display_name", &self.display_name)?;
        if self.target_root.as_os_str().is_empty() {
            return Err(DescriptorError::MissingField("target_root"));
        }
        if self.source_location.trim().is_empty() {
            return Err(DescriptorError::MissingField("source_location"));
        }

        let url = url::Url::parse(&self.source_location).map_err(|e| {
            DescriptorError::InvalidLocation {
                location: self.source_location.clone(),
                reason: e.to_string(),
            }
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DescriptorError::InvalidLocation {
                location: self.source_location.clone(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }
        Ok(())
    }
}

fn check_segment(field: &'static str, value: &str) -> std::result::Result<(), DescriptorError> {
    if value.trim().is_empty() {
        return Err(DescriptorError::MissingField(field));
    }
    if value == "." || value == ".." || value.contains(['/', '\\']) {
        return Err(DescriptorError::InvalidSegment {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Attachment record as returned by the remote attachment search
///
/// Field aliases accept the upper-case keys of the feature service response
/// (`PARENTOBJECTID`, `ID`, `NAME`, `DOWNLOAD_URL`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteAttachment {
    /// Object id of the record owning the attachment
    #[serde(alias = "PARENTOBJECTID")]
    pub parent_record_id: RecordId,

    /// Attachment id
    #[serde(alias = "ID")]
    pub attachment_id: RecordId,

    /// Original file name
    #[serde(alias = "NAME")]
    pub name: String,

    /// Download URL (already carrying any session token)
    #[serde(alias = "DOWNLOAD_URL")]
    pub download_url: String,

    /// MIME type, when the service reports it
    #[serde(default, alias = "CONTENTTYPE")]
    pub content_type: Option<String>,

    /// Size in bytes, when the service reports it
    #[serde(default, alias = "SIZE")]
    pub size: Option<u64>,
}

impl RemoteAttachment {
    /// Materialize a descriptor rooted at `target_root`, sanitizing the file name
    pub fn into_descriptor(self, target_root: &Path) -> AttachmentDescriptor {
        AttachmentDescriptor::new(
            self.parent_record_id,
            self.attachment_id,
            crate::utils::sanitize_display_name(&self.name),
            self.download_url,
            target_root,
        )
    }
}

/// Final status of one descriptor in one pass
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// File is on disk
    Success,
    /// Every attempt failed
    Failed,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Success => f.write_str("success"),
            OutcomeStatus::Failed => f.write_str("failed"),
        }
    }
}

/// What a fetcher reports about a completed transfer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchReceipt {
    /// Bytes written to disk
    pub bytes: u64,
    /// Lower-case hex SHA-256 of the written bytes, if the fetcher computed it
    pub sha256: Option<String>,
}

/// Result of attempting to materialize one descriptor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Descriptor this outcome belongs to
    pub descriptor: AttachmentDescriptor,
    /// Success or failure
    pub status: OutcomeStatus,
    /// Attempts made in this pass (always >= 1)
    pub attempts_made: u32,
    /// Where the file landed (set on success)
    pub resolved_path: Option<PathBuf>,
    /// Message of the final error (set on failure)
    pub last_error: Option<String>,
    /// Size and checksum of the saved file (set on success)
    pub receipt: Option<FetchReceipt>,
}

impl DownloadOutcome {
    /// Build a successful outcome
    pub fn success(
        descriptor: AttachmentDescriptor,
        attempts_made: u32,
        resolved_path: PathBuf,
        receipt: FetchReceipt,
    ) -> Self {
        Self {
            descriptor,
            status: OutcomeStatus::Success,
            attempts_made: attempts_made.max(1),
            resolved_path: Some(resolved_path),
            last_error: None,
            receipt: Some(receipt),
        }
    }

    /// Build a failed outcome
    pub fn failed(
        descriptor: AttachmentDescriptor,
        attempts_made: u32,
        error: impl std::fmt::Display,
    ) -> Self {
        Self {
            descriptor,
            status: OutcomeStatus::Failed,
            attempts_made: attempts_made.max(1),
            resolved_path: None,
            last_error: Some(error.to_string()),
            receipt: None,
        }
    }

    /// Whether the file was saved
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }

    /// Batch-unique identity of the descriptor
    pub fn key(&self) -> AttachmentKey {
        self.descriptor.key()
    }
}

/// All descriptors of one logical unit plus the outcomes of each pass
///
/// Owned by the orchestrator. The engine and the reconciliation pass borrow it and
/// hand back outcomes; the batch only ever grows by recording those.
#[derive(Debug)]
pub struct Batch {
    unit: String,
    directory: PathBuf,
    descriptors: Vec<AttachmentDescriptor>,
    duplicates_skipped: usize,
    bulk_outcomes: Vec<DownloadOutcome>,
    reconciled_outcomes: Vec<DownloadOutcome>,
}

impl Batch {
    /// Create a batch, dropping repeated `(parent, attachment)` identities
    pub fn new(
        unit: impl Into<String>,
        directory: impl Into<PathBuf>,
        descriptors: Vec<AttachmentDescriptor>,
    ) -> Self {
        let unit = unit.into();
        let mut seen = HashSet::with_capacity(descriptors.len());
        let mut unique = Vec::with_capacity(descriptors.len());
        let mut duplicates_skipped = 0;

        for descriptor in descriptors {
            if seen.insert(descriptor.key()) {
                unique.push(descriptor);
            } else {
                tracing::warn!(
                    unit = %unit,
                    parent_id = %descriptor.parent_record_id(),
                    attachment_id = %descriptor.attachment_id(),
                    "Duplicate attachment descriptor skipped"
                );
                duplicates_skipped += 1;
            }
        }

        Self {
            unit,
            directory: directory.into(),
            descriptors: unique,
            duplicates_skipped,
            bulk_outcomes: Vec::new(),
            reconciled_outcomes: Vec::new(),
        }
    }

    /// Unit name
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Directory holding the unit's files and manifests
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Descriptors in input order
    pub fn descriptors(&self) -> &[AttachmentDescriptor] {
        &self.descriptors
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the batch has no descriptors
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Number of repeated descriptors dropped at construction
    pub fn duplicates_skipped(&self) -> usize {
        self.duplicates_skipped
    }

    /// Record the outcomes of the bulk pass
    pub fn record_bulk_pass(&mut self, outcomes: Vec<DownloadOutcome>) {
        self.bulk_outcomes.extend(outcomes);
    }

    /// Record the outcomes of the reconciliation pass
    pub fn record_reconciliation(&mut self, outcomes: Vec<DownloadOutcome>) {
        self.reconciled_outcomes.extend(outcomes);
    }

    /// Outcomes of the bulk pass, in the order they were produced
    pub fn bulk_outcomes(&self) -> &[DownloadOutcome] {
        &self.bulk_outcomes
    }

    /// Outcomes of the reconciliation pass
    pub fn reconciled_outcomes(&self) -> &[DownloadOutcome] {
        &self.reconciled_outcomes
    }

    /// Bulk-pass failures, the input of the reconciliation pass
    pub fn bulk_failures(&self) -> Vec<DownloadOutcome> {
        self.bulk_outcomes
            .iter()
            .filter(|o| !o.is_success())
            .cloned()
            .collect()
    }

    /// Latest outcome per descriptor, sorted by (parent id, attachment id)
    ///
    /// A reconciliation outcome supersedes the bulk outcome for the same descriptor.
    pub fn final_outcomes(&self) -> Vec<&DownloadOutcome> {
        let mut latest: HashMap<AttachmentKey, &DownloadOutcome> =
            HashMap::with_capacity(self.descriptors.len());
        for outcome in self.bulk_outcomes.iter().chain(&self.reconciled_outcomes) {
            latest.insert(outcome.key(), outcome);
        }
        let mut outcomes: Vec<_> = latest.into_values().collect();
        outcomes.sort_by(|a, b| {
            a.descriptor
                .parent_record_id()
                .cmp(b.descriptor.parent_record_id())
                .then_with(|| {
                    a.descriptor
                        .attachment_id()
                        .cmp(b.descriptor.attachment_id())
                })
        });
        outcomes
    }

    /// Outcomes still failed after every pass
    pub fn final_failures(&self) -> Vec<&DownloadOutcome> {
        self.final_outcomes()
            .into_iter()
            .filter(|o| !o.is_success())
            .collect()
    }
}

/// Event emitted during a backup run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A unit's bulk pass is starting
    UnitStarted {
        /// Unit name
        unit: String,
        /// Number of attachments in the batch
        attachments: usize,
    },

    /// An attachment was written to disk
    AttachmentSaved {
        /// Unit name
        unit: String,
        /// Parent record id
        parent_record_id: RecordId,
        /// Attachment id
        attachment_id: RecordId,
        /// Local path of the file
        path: PathBuf,
        /// Attempts used
        attempts: u32,
    },

    /// An attachment exhausted its attempts in a pass
    AttachmentFailed {
        /// Unit name
        unit: String,
        /// Parent record id
        parent_record_id: RecordId,
        /// Attachment id
        attachment_id: RecordId,
        /// Final error message
        error: String,
        /// Attempts used
        attempts: u32,
    },

    /// The sequential reconciliation pass is starting
    ReconciliationStarted {
        /// Unit name
        unit: String,
        /// Failures being replayed
        failed: usize,
    },

    /// The external result-attachment step finished for a unit
    ResultsAttached {
        /// Unit name
        unit: String,
    },

    /// A unit is finished and its manifests are written
    UnitCompleted {
        /// Unit name
        unit: String,
        /// Attachments saved
        succeeded: usize,
        /// Attachments still failed
        failed: usize,
        /// Failure manifest, present only when `failed > 0`
        #[serde(skip_serializing_if = "Option::is_none")]
        failure_manifest: Option<PathBuf>,
    },
}

/// Summary of one unit
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitReport {
    /// Unit name
    pub unit: String,
    /// Directory holding the unit's files and manifests
    pub directory: PathBuf,
    /// Unique descriptors processed
    pub total: usize,
    /// Attachments saved
    pub succeeded: usize,
    /// Attachments still failed after reconciliation
    pub failed: usize,
    /// Bulk-pass failures recovered by reconciliation
    pub recovered: usize,
    /// Repeated descriptors dropped
    pub duplicates_skipped: usize,
    /// Main manifest location
    pub manifest: PathBuf,
    /// Failure manifest location, present only when something failed
    pub failure_manifest: Option<PathBuf>,
    /// Whether the external result-attachment step ran
    pub results_attached: bool,
    /// When the unit started
    pub started_at: DateTime<Utc>,
    /// When the unit finished
    pub finished_at: DateTime<Utc>,
}

impl UnitReport {
    /// Whether every attachment was saved
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    /// Turn an incomplete unit into [`Error::BatchIncomplete`]
    pub fn ensure_complete(&self) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(Error::BatchIncomplete {
            unit: self.unit.clone(),
            failed: self.failed,
            failure_manifest: self
                .failure_manifest
                .clone()
                .unwrap_or_else(|| self.directory.clone()),
        })
    }
}

/// Summary of a whole run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BackupReport {
    /// One report per unit, in configuration order
    pub units: Vec<UnitReport>,
}

impl BackupReport {
    /// Attachments saved across all units
    pub fn succeeded(&self) -> usize {
        self.units.iter().map(|u| u.succeeded).sum()
    }

    /// Attachments still failed across all units
    pub fn failed(&self) -> usize {
        self.units.iter().map(|u| u.failed).sum()
    }

    /// Units with a failure manifest
    pub fn incomplete_units(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| !u.is_complete())
    }

    /// Fail with the first incomplete unit, if any
    pub fn ensure_complete(&self) -> Result<()> {
        self.units.iter().try_for_each(UnitReport::ensure_complete)
    }
}
