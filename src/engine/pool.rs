//! Fixed-size worker pool for the bulk pass.
//!
//! Workers are spawned tasks on the multi-threaded runtime pulling from one shared queue.
//! A worker that dies mid-descriptor loses only that descriptor's outcome, which is
//! synthesized as a failure after the join so nothing disappears from the batch.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc};

use super::{DownloadEngine, emit_outcome};
use crate::fetcher::Fetcher;
use crate::retry::RetryPolicy;
use crate::types::{AttachmentDescriptor, AttachmentKey, DownloadOutcome, Event};

/// Parameters shared by every worker of one pool
struct WorkerParams {
    /// Worker index, for logging
    worker: usize,
    /// Unit name, for logging and events
    unit: Arc<str>,
    /// Shared work queue; closed once filled
    queue: Arc<Mutex<mpsc::Receiver<AttachmentDescriptor>>>,
    /// Outcome sink appended to by every worker
    sink: Arc<Mutex<Vec<DownloadOutcome>>>,
    /// Transport
    fetcher: Arc<dyn Fetcher>,
    /// Retry budget per descriptor
    policy: Arc<RetryPolicy>,
    /// Event channel
    event_tx: Option<broadcast::Sender<Event>>,
}

/// Run `descriptors` on `workers` concurrent workers, one outcome per descriptor
pub(super) async fn run_pooled(
    engine: &DownloadEngine,
    unit: &str,
    descriptors: &[AttachmentDescriptor],
    workers: usize,
) -> Vec<DownloadOutcome> {
    if descriptors.is_empty() {
        return Vec::new();
    }
    let workers = workers.clamp(1, descriptors.len());

    let (queue_tx, queue_rx) = mpsc::channel(descriptors.len());
    for descriptor in descriptors {
        // capacity equals the batch size, so this never waits
        if queue_tx.send(descriptor.clone()).await.is_err() {
            break;
        }
    }
    drop(queue_tx);

    let queue = Arc::new(Mutex::new(queue_rx));
    let sink = Arc::new(Mutex::new(Vec::with_capacity(descriptors.len())));
    let unit: Arc<str> = Arc::from(unit);

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            tokio::spawn(run_worker(WorkerParams {
                worker,
                unit: unit.clone(),
                queue: queue.clone(),
                sink: sink.clone(),
                fetcher: engine.fetcher.clone(),
                policy: engine.policy.clone(),
                event_tx: engine.event_tx.clone(),
            }))
        })
        .collect();

    for (worker, handle) in handles.into_iter().enumerate() {
        if let Err(e) = handle.await {
            tracing::error!(
                unit = %unit,
                worker,
                error = %e,
                "Download worker terminated abnormally"
            );
        }
    }

    let mut outcomes = std::mem::take(&mut *sink.lock().await);
    if outcomes.len() < descriptors.len() {
        let reported: HashSet<AttachmentKey> = outcomes.iter().map(DownloadOutcome::key).collect();
        for descriptor in descriptors {
            if !reported.contains(&descriptor.key()) {
                let outcome = DownloadOutcome::failed(
                    descriptor.clone(),
                    1,
                    "download worker terminated before reporting an outcome",
                );
                emit_outcome(engine.event_tx.as_ref(), &unit, &outcome);
                outcomes.push(outcome);
            }
        }
    }
    outcomes
}

async fn run_worker(params: WorkerParams) {
    let WorkerParams {
        worker,
        unit,
        queue,
        sink,
        fetcher,
        policy,
        event_tx,
    } = params;

    let mut processed = 0usize;
    loop {
        // the queue is pre-filled and closed, so the lock is held only for a dequeue
        let next = queue.lock().await.recv().await;
        let Some(descriptor) = next else {
            break;
        };

        let outcome = policy.execute(&descriptor, fetcher.as_ref()).await;
        emit_outcome(event_tx.as_ref(), &unit, &outcome);
        sink.lock().await.push(outcome);
        processed += 1;
    }

    tracing::debug!(unit = %unit, worker, processed, "Download worker finished");
}
