//! Mirror Queue
//!
//! Hands successful primary writes to a background worker that replays them
//! against the secondary store. Mirroring is best effort: failures are
//! counted and logged, never surfaced to the caller.

use crate::domain::operation::Operation;
use crate::domain::ports::StoreAdapter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Default capacity of the mirror queue.
pub const DEFAULT_MIRROR_CAPACITY: usize = 256;

/// Counter snapshot for the mirror queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MirrorStats {
    /// Jobs accepted into the queue
    pub enqueued: u64,
    /// Jobs applied to the secondary
    pub mirrored: u64,
    /// Jobs the secondary rejected
    pub failed: u64,
    /// Jobs refused because the queue was full or closed
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    mirrored: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

enum MirrorJob {
    Apply(Operation),
    Shutdown,
}

/// Bounded queue feeding a single background worker.
pub struct MirrorQueue {
    tx: mpsc::Sender<MirrorJob>,
    counters: Arc<Counters>,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MirrorQueue {
    /// Spawn the worker and return the queue handle.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(secondary: Arc<dyn StoreAdapter>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        let worker = tokio::spawn(Self::run_worker(secondary, rx, counters.clone()));

        Self {
            tx,
            counters,
            closed: AtomicBool::new(false),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue one operation for replay on the secondary.
    ///
    /// Never blocks: when the queue is full the job is dropped and counted.
    pub fn submit(&self, op: Operation) {
        if self.closed.load(Ordering::SeqCst) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("mirror queue closed, dropped {} on {}", op.kind, op.collection);
            return;
        }

        match self.tx.try_send(MirrorJob::Apply(op)) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let MirrorJob::Apply(op) = job {
                    tracing::warn!("mirror queue full, dropped {} on {}", op.kind, op.collection);
                }
            }
            // The worker closes the channel on shutdown; a racing submit
            // lands here.
            Err(TrySendError::Closed(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                if let MirrorJob::Apply(op) = job {
                    tracing::warn!("mirror queue closed, dropped {} on {}", op.kind, op.collection);
                }
            }
        }
    }

    /// Current counter values.
    pub fn stats(&self) -> MirrorStats {
        MirrorStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            mirrored: self.counters.mirrored.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Close the intake and wait for queued jobs to finish.
    ///
    /// Returns false if the worker did not finish within the timeout.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.closed.store(true, Ordering::SeqCst);
        let handle = match self.worker.lock().take() {
            Some(handle) => handle,
            None => return true,
        };

        // The sentinel queues behind any pending jobs so the worker
        // finishes them first; on a full channel the send itself parks,
        // so it counts against the timeout too.
        let tx = self.tx.clone();
        let finish = async move {
            let _ = tx.send(MirrorJob::Shutdown).await;
            let _ = handle.await;
        };
        match tokio::time::timeout(timeout, finish).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("mirror queue did not drain within {:?}", timeout);
                false
            }
        }
    }

    async fn run_worker(
        secondary: Arc<dyn StoreAdapter>,
        mut rx: mpsc::Receiver<MirrorJob>,
        counters: Arc<Counters>,
    ) {
        while let Some(job) = rx.recv().await {
            let op = match job {
                MirrorJob::Apply(op) => op,
                // A submit racing drain can land a job behind the
                // sentinel. Closing the channel stops further intake
                // while recv keeps yielding whatever is buffered.
                MirrorJob::Shutdown => {
                    rx.close();
                    continue;
                }
            };

            match secondary.execute(&op).await {
                Ok(_) => {
                    counters.mirrored.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        "mirrored {} on {} to {}",
                        op.kind,
                        op.collection,
                        secondary.name()
                    );
                }
                Err(err) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        "mirror {} on {} to {} failed: {}",
                        op.kind,
                        op.collection,
                        secondary.name(),
                        err
                    );
                }
            }
        }
    }
}
