//! Download engine: runs a batch through the retry layer, sequentially or on a worker pool.
//!
//! - [`pool`] - Fixed-size worker pool for the bulk pass
//!
//! Both modes produce exactly one [`DownloadOutcome`] per descriptor. The reconciliation
//! pass always runs sequentially.

mod pool;


use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::ConcurrencyMode;
use crate::fetcher::Fetcher;
use crate::retry::RetryPolicy;
use crate::types::{AttachmentDescriptor, Batch, DownloadOutcome, Event};

/// Runs descriptors through a [`Fetcher`] under a [`RetryPolicy`]
#[derive(Clone)]
pub struct DownloadEngine {
    fetcher: Arc<dyn Fetcher>,
    policy: Arc<RetryPolicy>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl DownloadEngine {
    /// Create an engine that reports nothing but its return values
    pub fn new(fetcher: Arc<dyn Fetcher>, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            policy: Arc::new(policy),
            event_tx: None,
        }
    }

    /// Emit [`Event::AttachmentSaved`] / [`Event::AttachmentFailed`] for every outcome
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Retry policy applied to every descriptor
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Bulk pass: one outcome per descriptor of `batch`
    ///
    /// Sequential mode returns outcomes in descriptor order. Pooled mode returns them in
    /// completion order; sort by key when order matters.
    pub async fn run(&self, batch: &Batch, mode: ConcurrencyMode) -> Vec<DownloadOutcome> {
        tracing::info!(
            unit = %batch.unit(),
            attachments = batch.len(),
            workers = mode.worker_count(),
            "Starting bulk download pass"
        );

        let outcomes = match mode {
            ConcurrencyMode::Sequential => {
                self.run_sequential(batch.unit(), batch.descriptors()).await
            }
            ConcurrencyMode::Pooled { workers } => {
                pool::run_pooled(self, batch.unit(), batch.descriptors(), workers).await
            }
        };

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        tracing::info!(
            unit = %batch.unit(),
            succeeded = outcomes.len() - failed,
            failed = failed,
            "Bulk download pass finished"
        );
        outcomes
    }

    /// Replay failed outcomes once more, strictly one at a time
    ///
    /// Each replay gets the full retry budget. Successful outcomes in `failed` are ignored.
    pub async fn reconcile(&self, unit: &str, failed: &[DownloadOutcome]) -> Vec<DownloadOutcome> {
        let descriptors: Vec<AttachmentDescriptor> = failed
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.descriptor.clone())
            .collect();
        if descriptors.is_empty() {
            return Vec::new();
        }

        tracing::info!(
            unit = %unit,
            failed = descriptors.len(),
            "Retrying failed attachments sequentially"
        );

        let outcomes = self.run_sequential(unit, &descriptors).await;

        let recovered = outcomes.iter().filter(|o| o.is_success()).count();
        if recovered == outcomes.len() {
            tracing::info!(unit = %unit, recovered, "Reconciliation recovered every failure");
        } else {
            tracing::warn!(
                unit = %unit,
                recovered,
                still_failed = outcomes.len() - recovered,
                "Reconciliation left failures behind"
            );
        }
        outcomes
    }

    async fn run_sequential(
        &self,
        unit: &str,
        descriptors: &[AttachmentDescriptor],
    ) -> Vec<DownloadOutcome> {
        let mut outcomes = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let outcome = self.policy.execute(descriptor, self.fetcher.as_ref()).await;
            emit_outcome(self.event_tx.as_ref(), unit, &outcome);
            outcomes.push(outcome);
        }
        outcomes
    }
}

/// Log and broadcast a single outcome
pub(crate) fn emit_outcome(
    event_tx: Option<&broadcast::Sender<Event>>,
    unit: &str,
    outcome: &DownloadOutcome,
) {
    let descriptor = &outcome.descriptor;
    let event = match &outcome.resolved_path {
        Some(path) if outcome.is_success() => {
            tracing::debug!(
                unit = %unit,
                parent_id = %descriptor.parent_record_id(),
                attachment_id = %descriptor.attachment_id(),
                path = %path.display(),
                attempts = outcome.attempts_made,
                "Attachment saved"
            );
            Event::AttachmentSaved {
                unit: unit.to_string(),
                parent_record_id: descriptor.parent_record_id().clone(),
                attachment_id: descriptor.attachment_id().clone(),
                path: path.clone(),
                attempts: outcome.attempts_made,
            }
        }
        _ => Event::AttachmentFailed {
            unit: unit.to_string(),
            parent_record_id: descriptor.parent_record_id().clone(),
            attachment_id: descriptor.attachment_id().clone(),
            error: outcome.last_error.clone().unwrap_or_default(),
            attempts: outcome.attempts_made,
        },
    };

    if let Some(tx) = event_tx {
        // no subscribers is fine
        tx.send(event).ok();
    }
}
