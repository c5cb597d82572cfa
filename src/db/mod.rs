//! The DB Gateway contract.
//!
//! The coordination core depends only on this trait boundary; the
//! submission/report schema and the actual SQL text are external
//! collaborators per the spec. [`postgres_gateway`] provides the
//! production adapter.

mod postgres_gateway;

pub use postgres_gateway::{PgGateway, PgGatewayFactory};

use std::collections::BTreeMap;
use std::time::Duration;

use thiserror::Error;

use crate::job::JobRecord;
use crate::shutdown::ShutdownFlag;

/// A single structured row extracted from a transformed report, handed to
/// `persist_report`. Its schema is explicitly out of scope for the core,
/// so it is carried as an opaque bag of named values.
pub type ReportRow = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database unavailable: {0}")]
    Unavailable(String),
    #[error("database query failed: {0}")]
    Query(String),
}

/// Outcome of a `wait_for_notification` call.
#[derive(Debug, PartialEq, Eq)]
pub enum NotificationOutcome {
    Notified,
    Timeout,
    Shutdown,
}

/// One exclusively-owned database session. Never shared between threads;
/// each Worker and the Producer each hold their own.
pub trait DbGateway: Send {
    /// Claim the oldest `pending` submission in a single transaction,
    /// transitioning it to `claimed`. Returns `None` if the queue is
    /// empty. Only the Producer calls this.
    fn claim_next_submission(&mut self) -> Result<Option<JobRecord>, DbError>;

    /// Block up to `timeout` (or indefinitely if `None`) on the DB
    /// notification channel, waking promptly once `shutdown` is
    /// triggered.
    fn wait_for_notification(
        &mut self,
        channel: &str,
        shutdown: &ShutdownFlag,
        timeout: Option<Duration>,
    ) -> Result<NotificationOutcome, DbError>;

    /// Transactionally persist `rows` and mark the submission `succeeded`.
    fn persist_report(&mut self, submission_id: i64, rows: &[ReportRow]) -> Result<(), DbError>;

    /// Transition the submission to `failed`, recording `reason`.
    fn mark_failed(&mut self, submission_id: i64, reason: &str) -> Result<(), DbError>;

    /// Transition the submission to the terminal `rejected` state.
    fn mark_rejected(&mut self, submission_id: i64, reason: &str) -> Result<(), DbError>;
}

/// Opens exclusive [`DbGateway`] sessions. One factory is shared read-only
/// across the Producer and every Worker; each call to `connect` hands back
/// a session owned solely by its caller.
pub trait DbGatewayFactory: Send + Sync {
    fn connect(&self) -> Result<Box<dyn DbGateway>, DbError>;
}
