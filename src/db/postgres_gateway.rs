//! Production [`DbGateway`] backed by a synchronous `postgres::Client`.
//!
//! A blocking client is deliberate: each Worker and the Producer own an
//! exclusive session for its lifetime, and `postgres::Client` is not
//! `Sync`, which makes accidental session sharing a compile error rather
//! than a runtime race. `wait_for_notification` polls the connection's
//! notification iterator in short slices so it can re-check the shutdown
//! flag and still wake within a few seconds of a signal.
//!
//! Per spec.md §4.2, this gateway — not its callers — owns
//! reconnect-on-dropped-connection: every operation runs through
//! [`PgGateway::run_with_reconnect`], which reconnects and retries once
//! when `postgres::Error::is_closed` reports the session died underneath
//! it, rather than surfacing a bare `DbError` for a session that a fresh
//! connection could have served.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use postgres::{Client, NoTls};

use super::{DbError, DbGateway, DbGatewayFactory, NotificationOutcome, ReportRow};
use crate::job::JobRecord;
use crate::shutdown::ShutdownFlag;

/// How often `wait_for_notification` re-polls the socket to check the
/// shutdown flag while waiting.
const POLL_SLICE: Duration = Duration::from_millis(500);

impl From<postgres::Error> for DbError {
    fn from(err: postgres::Error) -> Self {
        DbError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Query(format!("report row is not valid JSON: {err}"))
    }
}

pub struct PgGatewayFactory {
    dsn: String,
}

impl PgGatewayFactory {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self { dsn: dsn.into() }
    }
}

impl DbGatewayFactory for PgGatewayFactory {
    fn connect(&self) -> Result<Box<dyn DbGateway>, DbError> {
        let client =
            Client::connect(&self.dsn, NoTls).map_err(|e| DbError::Unavailable(e.to_string()))?;
        Ok(Box::new(PgGateway {
            dsn: self.dsn.clone(),
            client,
            listening_on: None,
        }))
    }
}

pub struct PgGateway {
    dsn: String,
    client: Client,
    listening_on: Option<String>,
}

impl PgGateway {
    fn ensure_listening(&mut self, channel: &str) -> Result<(), DbError> {
        if self.listening_on.as_deref() == Some(channel) {
            return Ok(());
        }
        self.client
            .batch_execute(&format!("LISTEN \"{channel}\""))?;
        self.listening_on = Some(channel.to_string());
        Ok(())
    }

    /// Reconnects using the DSN captured at `connect` time. `LISTEN`
    /// state is lost on a dropped connection, so forgetting
    /// `listening_on` forces `ensure_listening` to reissue it against the
    /// new session.
    fn reconnect(&mut self) -> Result<(), DbError> {
        self.client =
            Client::connect(&self.dsn, NoTls).map_err(|e| DbError::Unavailable(e.to_string()))?;
        self.listening_on = None;
        Ok(())
    }

    /// Runs `op` against the current session, reconnecting and retrying
    /// exactly once if the session turns out to have been dropped
    /// (checked eagerly via `Client::is_closed` and, if `op` still fails,
    /// via `postgres::Error::is_closed`). A second consecutive failure is
    /// surfaced as-is: the caller's own retry/backoff policy (the
    /// Worker's `persist_with_retry`, the Producer's claim-failure path)
    /// decides what to do from there.
    fn run_with_reconnect<T>(
        &mut self,
        mut op: impl FnMut(&mut Client) -> Result<T, postgres::Error>,
    ) -> Result<T, DbError> {
        if self.client.is_closed() {
            self.reconnect()?;
        }
        match op(&mut self.client) {
            Ok(value) => Ok(value),
            Err(err) if err.is_closed() => {
                self.reconnect()?;
                op(&mut self.client).map_err(DbError::from)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl DbGateway for PgGateway {
    fn claim_next_submission(&mut self) -> Result<Option<JobRecord>, DbError> {
        self.run_with_reconnect(|client| {
            let mut txn = client.transaction()?;
            let row = txn.query_opt(
                "SELECT id, client_id, payload_path FROM submissions \
                 WHERE status = 'pending' ORDER BY id ASC \
                 FOR UPDATE SKIP LOCKED LIMIT 1",
                &[],
            )?;
            let Some(row) = row else {
                txn.commit()?;
                return Ok(None);
            };
            let id: i64 = row.get(0);
            let client_id: String = row.get(1);
            let payload_path: String = row.get(2);
            txn.execute(
                "UPDATE submissions SET status = 'claimed' WHERE id = $1",
                &[&id],
            )?;
            txn.commit()?;
            Ok(Some(JobRecord::claimed(
                id,
                client_id,
                PathBuf::from(payload_path),
            )))
        })
    }

    fn wait_for_notification(
        &mut self,
        channel: &str,
        shutdown: &ShutdownFlag,
        timeout: Option<Duration>,
    ) -> Result<NotificationOutcome, DbError> {
        if self.client.is_closed() {
            self.reconnect()?;
        }
        self.ensure_listening(channel)?;
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            if shutdown.is_set() {
                return Ok(NotificationOutcome::Shutdown);
            }
            let mut notifications = self.client.notifications();
            let mut iter = notifications.timeout_iter(POLL_SLICE);
            match iter.next() {
                Some(Ok(_note)) => return Ok(NotificationOutcome::Notified),
                Some(Err(err)) if err.is_closed() => {
                    self.reconnect()?;
                    self.ensure_listening(channel)?;
                }
                Some(Err(err)) => return Err(err.into()),
                None => {
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            return Ok(NotificationOutcome::Timeout);
                        }
                    }
                }
            }
        }
    }

    fn persist_report(&mut self, submission_id: i64, rows: &[ReportRow]) -> Result<(), DbError> {
        // Serialised up front, outside `run_with_reconnect`: a malformed
        // row is not a dropped-connection condition, so it should not be
        // retried against a freshly reconnected session.
        let payloads = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.run_with_reconnect(|client| {
            let mut txn = client.transaction()?;
            for payload in &payloads {
                txn.execute(
                    "INSERT INTO report_rows (submission_id, data) VALUES ($1, $2)",
                    &[&submission_id, payload],
                )?;
            }
            txn.execute(
                "UPDATE submissions SET status = 'succeeded' WHERE id = $1",
                &[&submission_id],
            )?;
            txn.commit()
        })
    }

    fn mark_failed(&mut self, submission_id: i64, reason: &str) -> Result<(), DbError> {
        self.run_with_reconnect(|client| {
            client
                .execute(
                    "UPDATE submissions SET status = 'failed', failure_reason = $2 WHERE id = $1",
                    &[&submission_id, &reason],
                )
                .map(|_| ())
        })
    }

    fn mark_rejected(&mut self, submission_id: i64, reason: &str) -> Result<(), DbError> {
        self.run_with_reconnect(|client| {
            client
                .execute(
                    "UPDATE submissions SET status = 'rejected', failure_reason = $2 WHERE id = $1",
                    &[&submission_id, &reason],
                )
                .map(|_| ())
        })
    }
}
