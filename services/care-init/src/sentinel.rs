//! Health sentinel file.
//!
//! An empty file whose presence tells the process supervisor that
//! initialization finished. Cleared at the start of a run, written only
//! after every preceding step succeeded.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::StepError;

#[derive(Debug, Clone)]
pub struct Sentinel {
    path: PathBuf,
}

impl Sentinel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Remove the sentinel if present.
    pub fn clear(&self) -> Result<(), StepError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "removed stale health sentinel");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(self.error(source)),
        }
    }

    /// Create (or truncate) the empty sentinel.
    pub fn mark(&self) -> Result<(), StepError> {
        std::fs::write(&self.path, b"").map_err(|source| self.error(source))
    }

    fn error(&self, source: std::io::Error) -> StepError {
        StepError::Sentinel {
            path: self.path.display().to_string(),
            source,
        }
    }
}
