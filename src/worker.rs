//! Worker thread lifecycle: dequeue, transform, persist, mark done.
//!
//! Each worker owns one DB session exclusively, shares the XSLT handle and
//! report-directory arbiter read-only, and absorbs every per-job error
//! itself — only Producer or initialisation errors are allowed to
//! terminate the process.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, warn};

use crate::arbiter::ReportDirArbiter;
use crate::backoff::{BackoffPolicy, BackoffSequence};
use crate::db::{DbError, DbGateway};
use crate::extract::ReportExtractor;
use crate::job::JobRecord;
use crate::queue::JobQueue;
use crate::shutdown::ShutdownView;
use crate::transform::{TransformError, XsltTransformer};

/// Everything a worker thread needs for its entire lifetime. Constructed
/// once per worker and moved into its thread.
pub struct WorkerContext {
    pub worker_id: usize,
    pub db: Box<dyn DbGateway>,
    pub xslt: Arc<dyn XsltTransformer>,
    pub extractor: Arc<dyn ReportExtractor>,
    pub arbiter: Arc<ReportDirArbiter>,
    pub report_root: PathBuf,
    pub queue: Arc<JobQueue>,
    pub shutdown: ShutdownView,
}

impl WorkerContext {
    /// Run until the queue is drained and shutdown has been observed.
    pub fn run(mut self) {
        loop {
            let job = match self.queue.dequeue_blocking(&self.shutdown) {
                Some(job) => job,
                None => break,
            };
            self.process(job);
        }
    }

    fn process(&mut self, job: JobRecord) {
        // Held for the whole iteration: both the report-file write below and
        // the DB persist that follows touch this client's report subtree,
        // and the arbiter only guarantees exclusivity while the slot lives.
        let _slot = self.arbiter.acquire(&job.client_id);

        let report_xml = match self.xslt.transform(&job.payload_path) {
            Ok(doc) => doc,
            Err(TransformError::Structural(reason)) => {
                self.reject(job.submission_id, &reason);
                return;
            }
            Err(TransformError::Io(reason)) => {
                self.fail(job.submission_id, &reason);
                return;
            }
        };

        if let Err(err) = self.write_report(&job.client_id, job.submission_id, &report_xml) {
            self.fail(job.submission_id, &err.to_string());
            return;
        }

        let rows = match self.extractor.extract(&report_xml) {
            Ok(rows) => rows,
            Err(err) => {
                self.reject(job.submission_id, &err.to_string());
                return;
            }
        };

        self.persist_with_retry(job.submission_id, &rows);
    }

    /// Materialises the transformed report under
    /// `report_root/<client_id>/<submission_id>.xml`, creating the
    /// per-client subdirectory on first use. Only ever called while this
    /// job's arbiter slot is held, so two workers sharing a `client_id`
    /// never race on the same subtree.
    fn write_report(
        &self,
        client_id: &str,
        submission_id: i64,
        report_xml: &str,
    ) -> std::io::Result<()> {
        let client_dir = self.report_root.join(client_id);
        fs::create_dir_all(&client_dir)?;
        let report_path = client_dir.join(format!("{submission_id}.xml"));
        fs::write(&report_path, report_xml)
    }

    fn persist_with_retry(&mut self, submission_id: i64, rows: &[crate::db::ReportRow]) {
        let mut backoff = BackoffSequence::new(BackoffPolicy::worker_persist());
        let mut last_err: Option<DbError> = None;
        loop {
            match self.db.persist_report(submission_id, rows) {
                Ok(()) => return,
                Err(err) => {
                    warn!(
                        "worker {}: persist_report failed for submission {submission_id}: {err}",
                        self.worker_id
                    );
                    last_err = Some(err);
                    match backoff.next_delay() {
                        Some(delay) => self.shutdown.interruptible_sleep(delay),
                        None => break,
                    }
                }
            }
        }
        let reason = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown persist failure".to_string());
        self.fail(submission_id, &reason);
    }

    fn reject(&mut self, submission_id: i64, reason: &str) {
        warn!("submission {submission_id}: rejected: {reason}");
        if let Err(err) = self.db.mark_rejected(submission_id, reason) {
            error!("submission {submission_id}: failed to record rejection: {err}");
        }
    }

    fn fail(&mut self, submission_id: i64, reason: &str) {
        warn!("submission {submission_id}: failed: {reason}");
        if let Err(err) = self.db.mark_failed(submission_id, reason) {
            error!("submission {submission_id}: failed to record failure: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::{FakeFactory, FakeState};
    use crate::db::{DbGatewayFactory, NotificationOutcome};
    use crate::extract::LineReportExtractor;
    use crate::queue::JobQueue;
    use crate::shutdown::ShutdownFlag;
    use crate::transform::fake::FixedTransformer;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    fn make_worker(
        state: Arc<Mutex<FakeState>>,
        transform_result: Result<String, TransformError>,
        queue: Arc<JobQueue>,
        shutdown: ShutdownView,
        report_root: PathBuf,
    ) -> WorkerContext {
        let factory = FakeFactory { state };
        WorkerContext {
            worker_id: 0,
            db: factory.connect().unwrap(),
            xslt: Arc::new(FixedTransformer {
                result: transform_result,
            }),
            extractor: Arc::new(LineReportExtractor),
            arbiter: Arc::new(ReportDirArbiter::new()),
            report_root,
            queue,
            shutdown,
        }
    }

    #[test]
    fn successful_job_ends_in_succeeded() {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let queue = Arc::new(JobQueue::with_capacity(4));
        let shutdown = ShutdownFlag::new();
        let report_root = tempfile::tempdir().unwrap();
        queue.try_enqueue(JobRecord::claimed(1, "a", PathBuf::from("/tmp/a.xml")));
        shutdown.trigger();

        let worker = make_worker(
            state.clone(),
            Ok("row-one\nrow-two".into()),
            queue,
            shutdown,
            report_root.path().to_path_buf(),
        );
        worker.run();

        let state = state.lock().unwrap();
        assert_eq!(state.succeeded.len(), 1);
        assert_eq!(state.succeeded[0].0, 1);
        assert_eq!(state.succeeded[0].1.len(), 2);
        assert!(state.failed.is_empty());
        assert!(state.rejected.is_empty());
    }

    #[test]
    fn successful_job_materialises_report_under_client_subdir() {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let queue = Arc::new(JobQueue::with_capacity(4));
        let shutdown = ShutdownFlag::new();
        let report_root = tempfile::tempdir().unwrap();
        queue.try_enqueue(JobRecord::claimed(42, "client-x", PathBuf::from("/tmp/a.xml")));
        shutdown.trigger();

        let worker = make_worker(
            state,
            Ok("<report/>".into()),
            queue,
            shutdown,
            report_root.path().to_path_buf(),
        );
        worker.run();

        let report_path = report_root.path().join("client-x").join("42.xml");
        let contents = std::fs::read_to_string(&report_path).unwrap();
        assert_eq!(contents, "<report/>");
    }

    #[test]
    fn structural_transform_failure_is_rejected_not_failed() {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let queue = Arc::new(JobQueue::with_capacity(4));
        let shutdown = ShutdownFlag::new();
        let report_root = tempfile::tempdir().unwrap();
        queue.try_enqueue(JobRecord::claimed(2, "b", PathBuf::from("/tmp/b.xml")));
        shutdown.trigger();

        let worker = make_worker(
            state.clone(),
            Err(TransformError::Structural("bad xml".into())),
            queue,
            shutdown,
            report_root.path().to_path_buf(),
        );
        worker.run();

        let state = state.lock().unwrap();
        assert_eq!(state.rejected.len(), 1);
        assert_eq!(state.rejected[0].0, 2);
        assert!(state.failed.is_empty());
        assert!(state.succeeded.is_empty());
    }

    #[test]
    fn transient_io_failure_is_marked_failed() {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let queue = Arc::new(JobQueue::with_capacity(4));
        let shutdown = ShutdownFlag::new();
        let report_root = tempfile::tempdir().unwrap();
        queue.try_enqueue(JobRecord::claimed(3, "c", PathBuf::from("/tmp/c.xml")));
        shutdown.trigger();

        let worker = make_worker(
            state.clone(),
            Err(TransformError::Io("disk full".into())),
            queue,
            shutdown,
            report_root.path().to_path_buf(),
        );
        worker.run();

        let state = state.lock().unwrap();
        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.failed[0].0, 3);
    }

    #[test]
    fn report_write_failure_is_marked_failed_without_persisting() {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let queue = Arc::new(JobQueue::with_capacity(4));
        let shutdown = ShutdownFlag::new();
        queue.try_enqueue(JobRecord::claimed(6, "f", PathBuf::from("/tmp/f.xml")));
        shutdown.trigger();

        // A report root that collides with a plain file can never hold a
        // per-client subdirectory, so the write is guaranteed to fail.
        let blocked_root = tempfile::tempdir().unwrap();
        let file_in_the_way = blocked_root.path().join("f");
        std::fs::write(&file_in_the_way, b"not a directory").unwrap();

        let worker = make_worker(
            state.clone(),
            Ok("<report/>".into()),
            queue,
            shutdown,
            blocked_root.path().to_path_buf(),
        );
        worker.run();

        let state = state.lock().unwrap();
        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.failed[0].0, 6);
        assert!(state.succeeded.is_empty());
    }

    #[test]
    fn persist_retries_then_succeeds() {
        let mut initial = FakeState::default();
        initial.persist_failures_remaining = 2;
        let state = Arc::new(Mutex::new(initial));
        let queue = Arc::new(JobQueue::with_capacity(4));
        let shutdown = ShutdownFlag::new();
        let report_root = tempfile::tempdir().unwrap();
        queue.try_enqueue(JobRecord::claimed(4, "d", PathBuf::from("/tmp/d.xml")));
        shutdown.trigger();

        let worker = make_worker(
            state.clone(),
            Ok("row".into()),
            queue,
            shutdown,
            report_root.path().to_path_buf(),
        );
        worker.run();

        let state = state.lock().unwrap();
        assert_eq!(state.succeeded.len(), 1);
        assert!(state.failed.is_empty());
    }

    #[test]
    fn persist_exhausts_retries_and_marks_failed() {
        let mut initial = FakeState::default();
        initial.persist_failures_remaining = 10;
        let state = Arc::new(Mutex::new(initial));
        let queue = Arc::new(JobQueue::with_capacity(4));
        let shutdown = ShutdownFlag::new();
        let report_root = tempfile::tempdir().unwrap();
        queue.try_enqueue(JobRecord::claimed(5, "e", PathBuf::from("/tmp/e.xml")));
        shutdown.trigger();

        let worker = make_worker(
            state.clone(),
            Ok("row".into()),
            queue,
            shutdown,
            report_root.path().to_path_buf(),
        );
        worker.run();

        let state = state.lock().unwrap();
        assert!(state.succeeded.is_empty());
        assert_eq!(state.failed.len(), 1);
        assert_eq!(state.failed[0].0, 5);
    }

    #[test]
    fn empty_queue_with_shutdown_exits_immediately() {
        let state = Arc::new(Mutex::new(FakeState::default()));
        let queue = Arc::new(JobQueue::with_capacity(4));
        let shutdown = ShutdownFlag::new();
        shutdown.trigger();
        let report_root = tempfile::tempdir().unwrap();
        let worker = make_worker(
            state,
            Ok(String::new()),
            queue,
            shutdown,
            report_root.path().to_path_buf(),
        );
        worker.run();
    }

    #[test]
    fn notification_outcome_variants_are_distinct() {
        assert_ne!(NotificationOutcome::Notified, NotificationOutcome::Timeout);
        assert_ne!(NotificationOutcome::Timeout, NotificationOutcome::Shutdown);
    }
}
