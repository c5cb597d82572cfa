//! The bounded, single-producer multi-consumer handoff between the
//! Producer and the Worker pool.
//!
//! Backpressure lives here rather than in a blocking enqueue: the Producer
//! must stay responsive to the shutdown flag and must never park on a full
//! queue while holding the DB notification channel open. `try_enqueue`
//! therefore never blocks; callers that get `Full` back apply their own
//! backoff (see the Producer loop).

use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};

use crate::job::JobRecord;
use crate::shutdown::ShutdownFlag;

/// Fallback queue capacity when no system hint is available.
pub const DEFAULT_CAPACITY: usize = 5;

/// Outcome of a non-blocking enqueue attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Full,
}

/// Bounded FIFO queue shared by the Producer (sole writer) and the Worker
/// pool (many readers). Built on a crossbeam MPMC channel, which already
/// gives FIFO ordering across however many consumers pull from `rx`.
pub struct JobQueue {
    tx: Sender<JobRecord>,
    rx: Receiver<JobRecord>,
    capacity: usize,
}

impl JobQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of queued jobs. Racy by nature in a concurrent
    /// queue; used only for logging and tests, never for control flow.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Attempt to enqueue `job` without blocking. Never loses `job`: on
    /// `Full`, ownership of `job` is not consumed by this call path (the
    /// Producer holds onto the same `JobRecord` and retries it later).
    pub fn try_enqueue(&self, job: JobRecord) -> (EnqueueOutcome, Option<JobRecord>) {
        match self.tx.try_send(job) {
            Ok(()) => (EnqueueOutcome::Enqueued, None),
            Err(TrySendError::Full(job)) => (EnqueueOutcome::Full, Some(job)),
            Err(TrySendError::Disconnected(job)) => (EnqueueOutcome::Full, Some(job)),
        }
    }

    /// Block until a job is available or shutdown is observed. Returns
    /// `None` only once the queue has actually drained; a shutdown that
    /// arrives while items are still queued still yields them first, so
    /// no in-flight job is silently dropped.
    pub fn dequeue_blocking(&self, shutdown: &ShutdownFlag) -> Option<JobRecord> {
        if shutdown.is_set() {
            return self.rx.try_recv().ok();
        }

        let shutdown_rx = shutdown.wait_channel();
        select! {
            recv(self.rx) -> msg => msg.ok(),
            recv(shutdown_rx) -> _ => self.rx.try_recv().ok(),
        }
    }
}
