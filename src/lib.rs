//! # attachment-backup
//!
//! Library for backing up the file attachments of remote records to the local filesystem.
//!
//! ## Design Philosophy
//!
//! attachment-backup is designed to be:
//! - **Resilient** - Every attachment gets a retry budget and a second sequential chance;
//!   a failed file never aborts the batch
//! - **Auditable** - Each unit ends with a manifest, and a failure manifest whose mere
//!   existence marks the unit as incomplete
//! - **Deterministic on disk** - Paths derive only from record identity, so re-running a
//!   backup overwrites instead of duplicating
//! - **Library-first** - Descriptor enumeration and result publishing are traits the
//!   embedding application implements
//!
//! ## Quick Start
//!
//! ```no_run
//! use attachment_backup::{BackupOrchestrator, Config, StaticAttachmentSource, UnitConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.output.target_root = "backups".into();
//!     config.units = vec![UnitConfig::new("inspections")];
//!
//!     let orchestrator = BackupOrchestrator::new(config)?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let source = StaticAttachmentSource::from_json_file(Path::new("listing.json"))?;
//!     let report = orchestrator.run(&source).await?;
//!     report.ensure_complete()?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Backup orchestration across units
pub mod backup;
/// Configuration types
pub mod config;
/// Bulk download engine and reconciliation pass
pub mod engine;
/// Error types
pub mod error;
/// Single-attempt attachment transfer
pub mod fetcher;
/// CSV manifests
pub mod manifest;
/// Retry logic with a two-tier pause schedule
pub mod retry;
/// Core types and events
pub mod types;
/// Path resolution and file-name helpers
pub mod utils;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use backup::{AttachmentSource, BackupOrchestrator, ResultAttacher, StaticAttachmentSource};
pub use config::{
    ConcurrencyMode, Config, EngineConfig, OutputConfig, RetryConfig, UnitConfig,
    UnitSubdirectory,
};
pub use engine::DownloadEngine;
pub use error::{DescriptorError, Error, Result, TransferError};
pub use fetcher::{Fetcher, HttpFetcher};
pub use manifest::{ManifestPaths, ManifestWriter};
pub use retry::{IsRetryable, RetryPolicy, execute_with_retry};
pub use types::{
    AttachmentDescriptor, AttachmentKey, BackupReport, Batch, DownloadOutcome, Event,
    FetchReceipt, OutcomeStatus, RecordId, RemoteAttachment, UnitReport,
};
