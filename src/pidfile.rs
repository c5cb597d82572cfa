//! PID file management. The daemon core only writes and removes this
//! one file; surrounding process supervision (daemonising, double-fork,
//! stale-lock checks) is not this crate's concern.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("failed to write pid file {path}: {reason}")]
    Write { path: PathBuf, reason: String },
}

/// Writes the current PID to `path` on construction, removes the file
/// on drop. Holding one of these for the process lifetime is what
/// "owns" the PID file from this crate's point of view.
pub struct PidFileGuard {
    path: PathBuf,
}

impl PidFileGuard {
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, PidFileError> {
        let path = path.into();
        fs::write(&path, format!("{}\n", std::process::id())).map_err(|err| PidFileError::Write {
            path: path.clone(),
            reason: err.to_string(),
        })?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("failed to remove pid file {}: {err}", self.path.display());
        }
    }
}
