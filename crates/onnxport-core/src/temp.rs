//! Scoped temporary artifacts.
//!
//! Intermediate files and directories live at paths derived from the
//! conversion target. A [`TempArtifact`] removes its path when dropped, so
//! every exit from a stage (success, error, early return) cleans up. The
//! one way to keep the contents is [`TempArtifact::persist`], which renames
//! them onto their final location.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{OnnxportError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TempKind {
    File,
    Dir,
}

/// A path that is deleted when the guard goes out of scope.
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
    kind: TempKind,
    armed: bool,
}

impl TempArtifact {
    /// Guard a temporary file, clearing any leftover from a previous run.
    pub fn file(path: impl Into<PathBuf>) -> Result<Self> {
        let guard = Self {
            path: path.into(),
            kind: TempKind::File,
            armed: true,
        };
        guard.clear()?;
        Ok(guard)
    }

    /// Guard a temporary directory, clearing any leftover from a previous run.
    ///
    /// The directory itself is not created; the producing tool does that.
    pub fn dir(path: impl Into<PathBuf>) -> Result<Self> {
        let guard = Self {
            path: path.into(),
            kind: TempKind::Dir,
            armed: true,
        };
        guard.clear()?;
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Move the artifact to `dest` and disarm the guard.
    pub fn persist(mut self, dest: &Path) -> Result<PathBuf> {
        std::fs::rename(&self.path, dest)
            .map_err(|e| OnnxportError::io("moving artifact into place", &self.path, e))?;
        self.armed = false;
        debug!("Moved {} -> {}", self.path.display(), dest.display());
        Ok(dest.to_path_buf())
    }

    fn clear(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        debug!("Removing leftover temporary path {}", self.path.display());
        let result = match self.kind {
            TempKind::File => std::fs::remove_file(&self.path),
            TempKind::Dir => std::fs::remove_dir_all(&self.path),
        };
        result.map_err(|e| OnnxportError::io("removing leftover temporary path", &self.path, e))
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let result = match self.kind {
            TempKind::File => std::fs::remove_file(&self.path),
            TempKind::Dir => std::fs::remove_dir_all(&self.path),
        };
        match result {
            Ok(()) => debug!("Removed temporary {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove temporary {}: {}", self.path.display(), e),
        }
    }
}
