//! Bounded retry of single-attachment downloads
//!
//! Every descriptor gets a fixed budget of attempts. The pause before the first retry is
//! longer than the pauses after it, which can grow exponentially and carry jitter.
//! Every [`TransferError`] is retried until the budget is spent, unless
//! [`RetryConfig::stop_on_permanent_errors`] is set.
//! Whatever happens, the caller receives a [`DownloadOutcome`]; nothing escapes as an error.
//!
//! # Example
//!
//! ```no_run
//! use attachment_backup::config::RetryConfig;
//! use attachment_backup::fetcher::HttpFetcher;
//! use attachment_backup::retry::{RetryPolicy, execute_with_retry};
//! use attachment_backup::types::AttachmentDescriptor;
//! use std::time::Duration;
//!
//! # async fn example() -> attachment_backup::Result<()> {
//! let fetcher = HttpFetcher::new(Duration::from_secs(120))?;
//! let policy = RetryPolicy::new(RetryConfig::default(), Duration::from_secs(120));
//! let descriptor =
//!     AttachmentDescriptor::new(12i64, 3i64, "photo.jpg", "https://example.com/a", "/backups");
//!
//! let outcome = execute_with_retry(&descriptor, &fetcher, &policy).await;
//! println!("{} after {} attempt(s)", outcome.status, outcome.attempts_made);
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::TransferError;
use crate::fetcher::Fetcher;
use crate::types::{AttachmentDescriptor, DownloadOutcome};
use crate::utils::resolve_path;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, server errors, connection resets) return `true`.
/// Failures that will recur on every attempt (missing resource, denied write) return `false`.
/// The classification only shortens the budget when `stop_on_permanent_errors` is set.
pub trait IsRetryable {
    /// Returns true if the error is transient and the attempt should be repeated
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            // malformed request; every attempt would be built the same way
            TransferError::Request { source, .. } => !source.is_builder(),
            // throttling and request timeouts are the only 4xx worth repeating
            TransferError::Status { status, .. } => {
                !(400..500).contains(status) || *status == 408 || *status == 429
            }
            TransferError::Body { .. } | TransferError::Timeout { .. } => true,
            TransferError::Write { source, .. } => !matches!(
                source.kind(),
                std::io::ErrorKind::PermissionDenied
                    | std::io::ErrorKind::StorageFull
                    | std::io::ErrorKind::ReadOnlyFilesystem
            ),
            // custom fetchers report transport trouble here
            TransferError::Other(_) => true,
        }
    }
}

/// Attempt budget and pause schedule for one descriptor
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    config: RetryConfig,
    attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Create a policy; each attempt is abandoned after `attempt_timeout`
    pub fn new(config: RetryConfig, attempt_timeout: Duration) -> Self {
        Self {
            config,
            attempt_timeout,
        }
    }

    /// Total attempts per descriptor (at least 1)
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Time budget of a single attempt
    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Pause before retry number `retry` (1-based), without jitter
    ///
    /// Retry 1 waits `first_retry_delay`; retry `n > 1` waits
    /// `retry_delay * backoff_multiplier^(n-2)`. Every pause is capped at `max_delay`.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let delay = if retry <= 1 {
            self.config.first_retry_delay
        } else {
            let exponent = i32::try_from(retry - 2).unwrap_or(i32::MAX);
            let secs = self.config.retry_delay.as_secs_f64()
                * self.config.backoff_multiplier.powi(exponent);
            if secs.is_nan() || secs <= 0.0 {
                Duration::ZERO
            } else if secs.is_finite() && secs < self.config.max_delay.as_secs_f64() {
                Duration::from_secs_f64(secs)
            } else {
                self.config.max_delay
            }
        };
        delay.min(self.config.max_delay)
    }

    fn should_retry(&self, error: &TransferError) -> bool {
        !self.config.stop_on_permanent_errors || error.is_retryable()
    }

    fn pause_before_retry(&self, retry: u32) -> Duration {
        let delay = self.delay_before_retry(retry);
        if self.config.jitter {
            add_jitter(delay)
        } else {
            delay
        }
    }

    /// Fetch one descriptor, retrying failures until the budget is spent
    ///
    /// Malformed descriptors fail without touching the fetcher. With
    /// `stop_on_permanent_errors`, non-retryable errors end the loop early;
    /// `attempts_made` always reports the attempts actually spent.
    pub async fn execute(
        &self,
        descriptor: &AttachmentDescriptor,
        fetcher: &dyn Fetcher,
    ) -> DownloadOutcome {
        if let Err(e) = descriptor.validate() {
            tracing::warn!(
                parent_id = %descriptor.parent_record_id(),
                attachment_id = %descriptor.attachment_id(),
                error = %e,
                "Skipping malformed attachment descriptor"
            );
            return DownloadOutcome::failed(descriptor.clone(), 1, e);
        }

        let destination = resolve_path(descriptor);
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;

            let result = match tokio::time::timeout(
                self.attempt_timeout,
                fetcher.fetch(descriptor.source_location(), &destination),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => {
                    // the abandoned fetch may have left a truncated file behind
                    discard_partial(&destination).await;
                    Err(TransferError::Timeout {
                        url: descriptor.source_location().to_string(),
                        timeout: self.attempt_timeout,
                    })
                }
            };

            match result {
                Ok(receipt) => {
                    if attempt > 1 {
                        tracing::info!(
                            parent_id = %descriptor.parent_record_id(),
                            attachment_id = %descriptor.attachment_id(),
                            attempts = attempt,
                            "Attachment downloaded after retry"
                        );
                    }
                    return DownloadOutcome::success(
                        descriptor.clone(),
                        attempt,
                        destination,
                        receipt,
                    );
                }
                Err(e) if attempt < max_attempts && self.should_retry(&e) => {
                    let delay = self.pause_before_retry(attempt);

                    tracing::warn!(
                        parent_id = %descriptor.parent_record_id(),
                        attachment_id = %descriptor.attachment_id(),
                        error = %e,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = delay.as_millis(),
                        "Attachment download failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        tracing::error!(
                            parent_id = %descriptor.parent_record_id(),
                            attachment_id = %descriptor.attachment_id(),
                            error = %e,
                            attempts = attempt,
                            "Attachment download failed after all attempts exhausted"
                        );
                    } else {
                        tracing::error!(
                            parent_id = %descriptor.parent_record_id(),
                            attachment_id = %descriptor.attachment_id(),
                            error = %e,
                            attempts = attempt,
                            "Attachment download failed with non-retryable error"
                        );
                    }
                    return DownloadOutcome::failed(descriptor.clone(), attempt, e);
                }
            }
        }
    }
}

/// Fetch one descriptor under `policy`; see [`RetryPolicy::execute`]
pub async fn execute_with_retry(
    descriptor: &AttachmentDescriptor,
    fetcher: &dyn Fetcher,
    policy: &RetryPolicy,
) -> DownloadOutcome {
    policy.execute(descriptor, fetcher).await
}

async fn discard_partial(path: &std::path::Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        tracing::debug!(
            path = %path.display(),
            error = %e,
            "Failed to remove partial attachment file"
        );
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
