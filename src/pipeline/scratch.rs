//! Request-scoped scratch storage.
//!
//! Each request owns one fresh directory under the configured scratch root,
//! named after its request id. The directory is a [`TempDir`], so it is
//! removed when the [`ScratchSpace`] is dropped: on success, on error, on
//! panic, and when the request future is cancelled or times out. No code path
//! has to remember to clean up.
//!
//! Workers only ever receive the directory *path*. A detached recognition
//! call that outlives its request cannot keep the directory alive.

use crate::error::OcrError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

/// Scratch directory owned by a single request.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: TempDir,
    request_id: Uuid,
}

impl ScratchSpace {
    /// Create `<root>/req-<request_id>-XXXXXX`, creating `root` if needed.
    pub fn create(root: &Path, request_id: Uuid) -> Result<Self, OcrError> {
        std::fs::create_dir_all(root).map_err(|e| {
            OcrError::InternalPipelineError(format!(
                "Failed to create scratch root {}: {}",
                root.display(),
                e
            ))
        })?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("req-{}-", request_id))
            .tempdir_in(root)
            .map_err(|e| {
                OcrError::InternalPipelineError(format!("Failed to create scratch dir: {}", e))
            })?;

        debug!("Scratch directory: {}", dir.path().display());
        Ok(Self { dir, request_id })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Owned copy of the path, for handing to blocking workers.
    pub fn path_buf(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Remove the directory now and report failures.
    ///
    /// Dropping the value also removes it, silently; this variant exists so
    /// the success path can log a cleanup problem.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Failed to remove scratch directory {}: {}", path.display(), e);
        }
    }
}
