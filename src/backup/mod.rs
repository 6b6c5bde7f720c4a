//! Backup orchestration: one run over every configured unit.
//!
//! For each unit the orchestrator:
//! 1. prepares the unit directory (fatal if it cannot be written)
//! 2. asks the [`AttachmentSource`] for the unit's attachments
//! 3. runs the bulk pass in the configured [`ConcurrencyMode`](crate::config::ConcurrencyMode)
//! 4. replays bulk failures sequentially (reconciliation)
//! 5. writes the manifests
//! 6. hands the results to the [`ResultAttacher`] when `attach_results` is set
//!
//! Individual download failures never abort a run; they end up in the failure manifest
//! and in [`UnitReport::failed`].

mod source;


pub use source::{AttachmentSource, ResultAttacher, StaticAttachmentSource};

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::broadcast;

use crate::config::{Config, UnitConfig};
use crate::engine::DownloadEngine;
use crate::error::{Error, Result};
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::manifest::ManifestWriter;
use crate::retry::RetryPolicy;
use crate::types::{BackupReport, Batch, Event, RemoteAttachment, UnitReport};
use crate::utils::unit_directory;

/// File created and removed to prove a unit directory is writable
const WRITE_PROBE: &str = ".attachment-backup-probe";

/// Drives backup runs with an explicit, validated configuration
pub struct BackupOrchestrator {
    config: Config,
    engine: DownloadEngine,
    manifest_writer: ManifestWriter,
    attacher: Option<Arc<dyn ResultAttacher>>,
    event_tx: broadcast::Sender<Event>,
}

impl BackupOrchestrator {
    /// Create an orchestrator fetching over HTTP
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid, or [`Error::Network`] if
    /// the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.engine.attempt_timeout)?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Create an orchestrator with a custom transport
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        config.validate()?;

        let (event_tx, _rx) = broadcast::channel(1000);
        let policy = RetryPolicy::new(config.retry.clone(), config.engine.attempt_timeout);
        let engine = DownloadEngine::new(fetcher, policy).with_events(event_tx.clone());
        let manifest_writer = ManifestWriter::new(&config.output);

        Ok(Self {
            config,
            engine,
            manifest_writer,
            attacher: None,
            event_tx,
        })
    }

    /// Attach results of every unit through `attacher` when `attach_results` is set
    pub fn with_attacher(mut self, attacher: Arc<dyn ResultAttacher>) -> Self {
        self.attacher = Some(attacher);
        self
    }

    /// Subscribe to run events
    ///
    /// Multiple subscribers are supported. Events sent while nobody listens are dropped.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Configuration of this orchestrator
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Back up every configured unit into today's run directory
    pub async fn run(&self, source: &dyn AttachmentSource) -> Result<BackupReport> {
        self.run_on(source, chrono::Local::now().date_naive()).await
    }

    /// Back up every configured unit as if the run started on `date`
    ///
    /// Units run one after another in configuration order. The first fatal error stops
    /// the run; units finished before it keep their files and manifests.
    pub async fn run_on(&self, source: &dyn AttachmentSource, date: NaiveDate) -> Result<BackupReport> {
        tracing::info!(units = self.config.units.len(), %date, "Starting attachment backup");

        let mut report = BackupReport::default();
        for unit in &self.config.units {
            let attachments = source.list_attachments(unit).await?;
            report.units.push(self.run_unit(unit, attachments, date).await?);
        }

        if report.failed() == 0 {
            tracing::info!(
                units = report.units.len(),
                succeeded = report.succeeded(),
                "Attachment backup complete"
            );
        } else {
            tracing::warn!(
                units = report.units.len(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                incomplete_units = report.incomplete_units().count(),
                "Attachment backup finished with failures"
            );
        }
        Ok(report)
    }

    /// Back up one unit from an already enumerated attachment list
    ///
    /// # Errors
    ///
    /// Returns [`Error::DestinationUnwritable`] if the unit directory cannot be prepared
    /// and [`Error::Manifest`] if a manifest cannot be written. Failed downloads are not
    /// errors; inspect [`UnitReport::failed`] or call [`UnitReport::ensure_complete`].
    pub async fn run_unit(
        &self,
        unit: &UnitConfig,
        attachments: Vec<RemoteAttachment>,
        date: NaiveDate,
    ) -> Result<UnitReport> {
        let started_at = Utc::now();
        let directory = unit_directory(&self.config.output, unit, date)?;
        prepare_destination(&directory).await?;

        let descriptors = attachments
            .into_iter()
            .map(|a| a.into_descriptor(&directory))
            .collect();
        let mut batch = Batch::new(unit.name.clone(), directory, descriptors);

        tracing::info!(
            unit = %unit.name,
            directory = %batch.directory().display(),
            attachments = batch.len(),
            duplicates_skipped = batch.duplicates_skipped(),
            "Backing up unit"
        );
        self.emit(Event::UnitStarted {
            unit: unit.name.clone(),
            attachments: batch.len(),
        });

        let bulk = self
            .engine
            .run(&batch, self.config.engine.concurrency)
            .await;
        batch.record_bulk_pass(bulk);

        let bulk_failures = batch.bulk_failures();
        if !bulk_failures.is_empty() {
            self.emit(Event::ReconciliationStarted {
                unit: unit.name.clone(),
                failed: bulk_failures.len(),
            });
            let reconciled = self.engine.reconcile(&unit.name, &bulk_failures).await;
            batch.record_reconciliation(reconciled);
        }

        let paths = self.manifest_writer.write(&batch, batch.directory())?;

        let final_outcomes = batch.final_outcomes();
        let failed = final_outcomes.iter().filter(|o| !o.is_success()).count();
        let mut report = UnitReport {
            unit: unit.name.clone(),
            directory: batch.directory().to_path_buf(),
            total: batch.len(),
            succeeded: final_outcomes.len() - failed,
            failed,
            recovered: bulk_failures.len().saturating_sub(failed),
            duplicates_skipped: batch.duplicates_skipped(),
            manifest: paths.manifest,
            failure_manifest: paths.failure_manifest,
            results_attached: false,
            started_at,
            finished_at: started_at,
        };

        if self.config.attach_results {
            report.results_attached = self.attach_results(unit, &report).await;
        }
        report.finished_at = Utc::now();

        match &report.failure_manifest {
            None => tracing::info!(
                unit = %report.unit,
                succeeded = report.succeeded,
                recovered = report.recovered,
                "Unit backed up completely"
            ),
            Some(failure_manifest) => tracing::warn!(
                unit = %report.unit,
                succeeded = report.succeeded,
                failed = report.failed,
                failure_manifest = %failure_manifest.display(),
                "Unit backed up with failures"
            ),
        }
        self.emit(Event::UnitCompleted {
            unit: report.unit.clone(),
            succeeded: report.succeeded,
            failed: report.failed,
            failure_manifest: report.failure_manifest.clone(),
        });

        Ok(report)
    }

    /// Run the attach step; failures are logged, not propagated
    async fn attach_results(&self, unit: &UnitConfig, report: &UnitReport) -> bool {
        let Some(attacher) = &self.attacher else {
            tracing::warn!(
                unit = %unit.name,
                "attach_results is enabled but no result attacher is configured"
            );
            return false;
        };

        match attacher.attach_results(unit, report).await {
            Ok(()) => {
                tracing::info!(unit = %unit.name, "Results attached");
                self.emit(Event::ResultsAttached {
                    unit: unit.name.clone(),
                });
                true
            }
            Err(e) => {
                tracing::error!(unit = %unit.name, error = %e, "Failed to attach results");
                false
            }
        }
    }

    fn emit(&self, event: Event) {
        // no subscribers is fine
        self.event_tx.send(event).ok();
    }
}

/// Create `directory` and prove a file can be written into it
async fn prepare_destination(directory: &Path) -> Result<()> {
    let unwritable = |source| Error::DestinationUnwritable {
        path: directory.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(directory)
        .await
        .map_err(unwritable)?;

    let probe = directory.join(WRITE_PROBE);
    tokio::fs::write(&probe, b"").await.map_err(unwritable)?;
    if let Err(e) = tokio::fs::remove_file(&probe).await {
        tracing::debug!(path = %probe.display(), error = %e, "Failed to remove write probe");
    }
    Ok(())
}
