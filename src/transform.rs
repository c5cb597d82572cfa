//! The XSLT transformation boundary.
//!
//! The transform algorithm itself is explicitly out of scope for the
//! coordination core; what the core owns is the trait boundary and the
//! failure classification a Worker needs (structural vs transient). The
//! production adapter shells out to the `xsltproc` binary against a
//! configured stylesheet rather than linking an XSLT engine into this
//! crate's dependency graph.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    /// The payload failed to parse, or the stylesheet rejected it: a
    /// permanent, non-retryable failure. Maps to `mark_rejected`.
    #[error("XSLT transform rejected payload: {0}")]
    Structural(String),
    /// A transient I/O failure spawning or reading from the transform
    /// process. Maps to `mark_failed`.
    #[error("XSLT transform I/O error: {0}")]
    Io(String),
}

/// Applies the configured stylesheet to a submission payload, producing
/// the transformed report document.
pub trait XsltTransformer: Send + Sync {
    fn transform(&self, payload_path: &Path) -> Result<String, TransformError>;
}

/// Production transformer invoking `xsltproc <stylesheet> <payload>`.
pub struct XsltProcTransformer {
    stylesheet: PathBuf,
}

impl XsltProcTransformer {
    /// `xslt_dir` is the directory named by the `xsltpath` config option;
    /// the stylesheet file itself is always `xmlparser.xsl` within it.
    pub fn new(xslt_dir: impl AsRef<Path>) -> Self {
        Self {
            stylesheet: xslt_dir.as_ref().join("xmlparser.xsl"),
        }
    }
}

impl XsltTransformer for XsltProcTransformer {
    fn transform(&self, payload_path: &Path) -> Result<String, TransformError> {
        let output = Command::new("xsltproc")
            .arg(&self.stylesheet)
            .arg(payload_path)
            .output()
            .map_err(|err| TransformError::Io(err.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            return Err(TransformError::Structural(stderr));
        }

        String::from_utf8(output.stdout)
            .map_err(|err| TransformError::Structural(format!("non-UTF-8 transform output: {err}")))
    }
}
