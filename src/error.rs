//! Top-level error classification mapping every failure mode the
//! daemon can hit onto one of its documented process exit codes.

use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DbError;
use crate::logging::LoggingError;
use crate::pidfile::PidFileError;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("initialisation failed: {0}")]
    Init(#[from] InitError),
    #[error("producer exited with a fatal error: {0}")]
    ProducerFatal(String),
    #[error("failed to start worker thread {worker_id}: {reason}")]
    WorkerStart { worker_id: usize, reason: String },
}

#[derive(Debug, Error)]
pub enum InitError {
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("logging: {0}")]
    Logging(#[from] LoggingError),
    #[error("pid file: {0}")]
    PidFile(#[from] PidFileError),
    #[error("database: {0}")]
    Database(#[from] DbError),
    #[error("signal handler installation: {0}")]
    Signal(#[from] std::io::Error),
}

impl DaemonError {
    /// Exit code contract: 0 normal, 1 producer fatal, 2 init failure,
    /// 3 worker-start failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Init(_) => 2,
            Self::ProducerFatal(_) => 1,
            Self::WorkerStart { .. } => 3,
        }
    }
}
