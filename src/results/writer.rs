//! Fire-and-forget result persistence
//!
//! Race completion must never wait on the result store. Finished outcomes
//! are pushed onto a bounded queue and drained by a background task; a full
//! queue or a failing store costs the record, not the race. Failures are
//! logged and counted, never retried.

use crate::results::store::{RaceOutcome, ResultStore};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Background writer draining outcomes into a result store
pub struct ResultWriter {
    sender: mpsc::Sender<RaceOutcome>,
    worker: Mutex<Option<JoinHandle<()>>>,
    submitted: AtomicU64,
    dropped: AtomicU64,
    write_failures: Arc<AtomicU64>,
}

impl ResultWriter {
    /// Spawn the drain task and return the writer handle
    pub fn start(store: Arc<dyn ResultStore>, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<RaceOutcome>(capacity);
        let write_failures = Arc::new(AtomicU64::new(0));
        let failures = Arc::clone(&write_failures);

        let worker = tokio::spawn(async move {
            while let Some(outcome) = receiver.recv().await {
                let room_id = outcome.room_id;
                match store.persist(outcome).await {
                    Ok(()) => {
                        debug!("Persisted result for room {}", room_id);
                    }
                    Err(e) => {
                        failures.fetch_add(1, Ordering::Relaxed);
                        error!("Failed to persist result for room {}: {}", room_id, e);
                    }
                }
            }
            debug!("Result writer drained and stopped");
        });

        Self {
            sender,
            worker: Mutex::new(Some(worker)),
            submitted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            write_failures,
        }
    }

    /// Queue an outcome for persistence without blocking
    ///
    /// Returns whether the outcome was accepted onto the queue.
    pub fn try_submit(&self, outcome: RaceOutcome) -> bool {
        let room_id = outcome.room_id;
        match self.sender.try_send(outcome) {
            Ok(()) => {
                self.submitted.fetch_add(1, Ordering::Relaxed);
                debug!("Queued result for room {}", room_id);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Result queue full, dropping result for room {}", room_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Result writer stopped, dropping result for room {}", room_id);
                false
            }
        }
    }

    /// Results accepted onto the queue so far
    pub fn submitted_count(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    /// Results lost to a full queue or stopped writer
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Store writes that failed after draining
    pub fn write_failure_count(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Stop the drain task immediately (service shutdown)
    pub fn abort(&self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                handle.abort();
            }
        }
    }
}

impl std::fmt::Debug for ResultWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultWriter")
            .field("submitted", &self.submitted_count())
            .field("dropped", &self.dropped_count())
            .field("write_failures", &self.write_failure_count())
            .finish()
    }
}
