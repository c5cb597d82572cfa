//! The Producer: discovers pending submissions and hands them to the
//! Worker pool, applying backpressure when the Job Queue is saturated.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::db::{DbError, DbGateway, NotificationOutcome};
use crate::job::JobRecord;
use crate::queue::{EnqueueOutcome, JobQueue};
use crate::rate_limited_warner::RateLimitedWarner;
use crate::shutdown::ShutdownView;

/// Fixed backoff applied when the Job Queue is saturated. Long enough
/// that polling a drained queue isn't wasteful, short enough that a
/// freed-up slot doesn't stall the submission in the DB for long.
pub const QUEUE_FULL_BACKOFF: Duration = Duration::from_secs(60);

pub const NOTIFICATION_CHANNEL: &str = "rteval_submq";

/// Why the Producer loop returned.
#[derive(Debug, PartialEq, Eq)]
pub enum ProducerOutcome {
    /// Shutdown was requested; no DB or queue error occurred.
    ShutdownRequested,
    /// A claim or notification-wait call failed; the caller should set
    /// shutdown (if not already set) and exit with a nonzero status.
    Fatal(String),
}

pub struct Producer {
    db: Box<dyn DbGateway>,
    queue: Arc<JobQueue>,
    shutdown: ShutdownView,
    notification_channel: String,
    queue_full_backoff: Duration,
}

impl Producer {
    pub fn new(db: Box<dyn DbGateway>, queue: Arc<JobQueue>, shutdown: ShutdownView) -> Self {
        Self {
            db,
            queue,
            shutdown,
            notification_channel: NOTIFICATION_CHANNEL.to_string(),
            queue_full_backoff: QUEUE_FULL_BACKOFF,
        }
    }

    #[cfg(test)]
    fn with_backoff(mut self, backoff: Duration) -> Self {
        self.queue_full_backoff = backoff;
        self
    }

    /// Run until shutdown is observed or a fatal error occurs.
    ///
    /// Preserves the "claim before wait" ordering on every iteration:
    /// pending rows left over from a prior daemon lifetime are drained on
    /// restart even before the first notification arrives.
    pub fn run(&mut self) -> ProducerOutcome {
        loop {
            if self.shutdown.is_set() {
                return ProducerOutcome::ShutdownRequested;
            }

            match self.db.claim_next_submission() {
                Ok(Some(job)) => self.enqueue_with_backpressure(job),
                Ok(None) => match self.await_notification() {
                    Ok(()) => continue,
                    Err(outcome) => return outcome,
                },
                Err(err) => {
                    error!("producer: claim_next_submission failed: {err}");
                    self.shutdown.trigger();
                    return ProducerOutcome::Fatal(err.to_string());
                }
            }
        }
    }

    fn await_notification(&mut self) -> Result<(), ProducerOutcome> {
        match self
            .db
            .wait_for_notification(&self.notification_channel, &self.shutdown, None)
        {
            Ok(NotificationOutcome::Notified) => Ok(()),
            Ok(NotificationOutcome::Timeout) => Ok(()),
            Ok(NotificationOutcome::Shutdown) => {
                self.shutdown.trigger();
                Err(ProducerOutcome::ShutdownRequested)
            }
            Err(err) => {
                error!("producer: wait_for_notification failed: {err}");
                self.shutdown.trigger();
                Err(ProducerOutcome::Fatal(err.to_string()))
            }
        }
    }

    /// Enqueue `job`, retrying on `Full` with a fixed backoff. Never
    /// re-claims: the same `JobRecord` is retried until it lands, so a
    /// saturated queue never loses work.
    fn enqueue_with_backpressure(&mut self, mut job: JobRecord) {
        let warner = RateLimitedWarner::new(self.queue_full_backoff);
        loop {
            let (outcome, returned) = self.queue.try_enqueue(job);
            match outcome {
                EnqueueOutcome::Enqueued => return,
                EnqueueOutcome::Full => {
                    job = returned.expect("Full outcome always returns the job");
                    warner.record_drop();
                    warner.warn_if_due(|_| {
                        warn!(
                            "submission {}: job queue full (capacity {}); backing off",
                            job.submission_id,
                            self.queue.capacity()
                        );
                    });
                    self.shutdown
                        .interruptible_sleep(self.queue_full_backoff);
                }
            }
        }
    }
}

pub fn log_outcome(outcome: &ProducerOutcome) {
    match outcome {
        ProducerOutcome::ShutdownRequested => info!("producer: shutdown observed, exiting cleanly"),
        ProducerOutcome::Fatal(reason) => error!("producer: fatal error, exiting: {reason}"),
    }
}
