//! Shared test fakes

use crate::error::TransferError;
use crate::fetcher::Fetcher;
use crate::types::{AttachmentDescriptor, FetchReceipt};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a scripted location does when fetched
#[derive(Clone, Copy, Debug)]
pub(crate) enum Script {
    /// Fail (retryably) on the first `n` calls, then succeed
    FailTimes(u32),
    /// Always fail retryably
    AlwaysFail,
    /// Always answer HTTP 404
    NotFound,
    /// Always fail writing the destination with permission denied
    DeniedWrite,
    /// Never answer
    Hang,
    /// Write part of the body, then stall forever
    StallMidBody,
    /// Panic inside the fetch
    Panic,
}

/// Fetcher whose behavior per location is scripted up front
///
/// Unscripted locations succeed immediately. Successful fetches write the location
/// string as the file body.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    scripts: HashMap<String, Script>,
    delay: Duration,
    calls: Mutex<HashMap<String, u32>>,
    order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn script(mut self, location: &str, script: Script) -> Self {
        self.scripts.insert(location.to_string(), script);
        self
    }

    /// Every fetch sleeps this long before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn calls(&self, location: &str) -> u32 {
        self.calls
            .lock()
            .unwrap()
            .get(location)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    /// Locations in the order their first attempt started
    pub(crate) fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        source_location: &str,
        destination: &Path,
    ) -> Result<FetchReceipt, TransferError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(source_location.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if call == 1 {
            self.order
                .lock()
                .unwrap()
                .push(source_location.to_string());
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fail = |msg: String| -> Result<FetchReceipt, TransferError> {
            Err(TransferError::Other(msg))
        };
        match self.scripts.get(source_location) {
            Some(Script::FailTimes(n)) if call <= *n => {
                return fail(format!("scripted failure {call} of {n}"));
            }
            Some(Script::AlwaysFail) => return fail("scripted permanent outage".to_string()),
            Some(Script::NotFound) => {
                return Err(TransferError::Status {
                    url: source_location.to_string(),
                    status: 404,
                });
            }
            Some(Script::DeniedWrite) => {
                return Err(TransferError::Write {
                    path: destination.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Some(Script::StallMidBody) => {
                if let Some(parent) = destination.parent() {
                    tokio::fs::create_dir_all(parent).await.unwrap();
                }
                tokio::fs::write(destination, b"partial").await.unwrap();
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Some(Script::Panic) => panic!("scripted panic for {source_location}"),
            _ => {}
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(destination, source_location.as_bytes())
            .await
            .unwrap();
        Ok(FetchReceipt {
            bytes: source_location.len() as u64,
            sha256: None,
        })
    }
}

/// Descriptor `(parent, attachment)` rooted at `root`, fetched from `https://files.test/{parent}/{attachment}`
pub(crate) fn descriptor(root: &Path, parent: i64, attachment: i64) -> AttachmentDescriptor {
    AttachmentDescriptor::new(
        parent,
        attachment,
        format!("file_{parent}_{attachment}.jpg"),
        location(parent, attachment),
        root,
    )
}

pub(crate) fn location(parent: i64, attachment: i64) -> String {
    format!("https://files.test/{parent}/{attachment}")
}
