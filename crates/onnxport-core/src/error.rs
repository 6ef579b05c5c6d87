//! Error types for onnxport.
//!
//! The taxonomy follows the conversion pipeline: detection ambiguity, missing
//! tooling, weights without an architecture, external tool failures, input
//! validation and verification. Ambient IO/JSON/network errors carry their
//! source so the operator sees the underlying cause.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::orchestrator::RunState;

/// Main error type for onnxport.
#[derive(Debug, Error)]
pub enum OnnxportError {
    // Detection
    #[error("Ambiguous source format for '{reference}': {reason}")]
    DetectionAmbiguous { reference: String, reason: String },

    // Tooling
    #[error("Missing dependency: {dependency}. {hint}")]
    MissingDependency { dependency: String, hint: String },

    #[error("{tool} failed: {diagnostic}")]
    ExternalToolFailure { tool: String, diagnostic: String },

    // Conversion
    #[error("Architecture missing: {message}")]
    ArchitectureMissing { message: String },

    #[error("Invalid hub identifier: {0}")]
    InvalidHubId(String),

    // Validation
    #[error("Unknown quantization type '{kind}'. Use: int8, uint8")]
    UnsupportedQuantizationKind { kind: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Verification failed for {path:?}: {message}")]
    VerificationFailed { path: PathBuf, message: String },

    // Ambient
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// An error annotated with the run state it escaped from.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: RunState,
        #[source]
        source: Box<OnnxportError>,
    },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for onnxport operations.
pub type Result<T> = std::result::Result<T, OnnxportError>;

impl From<std::io::Error> for OnnxportError {
    fn from(err: std::io::Error) -> Self {
        OnnxportError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for OnnxportError {
    fn from(err: serde_json::Error) -> Self {
        OnnxportError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for OnnxportError {
    fn from(err: reqwest::Error) -> Self {
        OnnxportError::Network {
            message: err.to_string(),
            cause: err.status().map(|s| s.to_string()),
        }
    }
}

impl OnnxportError {
    /// Create an IO error with a short description of what was being done.
    pub fn io(context: &str, path: impl AsRef<Path>, err: std::io::Error) -> Self {
        let path = path.as_ref();
        OnnxportError::Io {
            message: format!("{context}: {err}"),
            path: Some(path.to_path_buf()),
            source: Some(err),
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        OnnxportError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Wrap the error with the run state that produced it.
    ///
    /// Already-wrapped errors keep their original stage.
    pub fn in_stage(self, stage: RunState) -> Self {
        match self {
            OnnxportError::Stage { .. } => self,
            other => OnnxportError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error escaped from, if it was annotated.
    pub fn stage(&self) -> Option<RunState> {
        match self {
            OnnxportError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The originating error with any stage annotation removed.
    pub fn root(&self) -> &OnnxportError {
        match self {
            OnnxportError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a failed primary strategy may hand over to a secondary one.
    ///
    /// Missing tooling is not absorbed: the secondary hub export depends on
    /// the same Python stack and would fail the same way.
    pub fn absorbed_by_fallback(&self) -> bool {
        !matches!(self.root(), OnnxportError::MissingDependency { .. })
    }

    /// Process exit code for the CLI.
    ///
    /// - 1: internal/other error
    /// - 2: input validation (bad quantization kind, strict detection)
    /// - 3: missing dependency
    /// - 4: weights without architecture
    /// - 5: external tool failure
    /// - 6: verification failed
    pub fn exit_code(&self) -> i32 {
        match self.root() {
            OnnxportError::UnsupportedQuantizationKind { .. }
            | OnnxportError::Validation { .. }
            | OnnxportError::DetectionAmbiguous { .. }
            | OnnxportError::InvalidHubId(_) => 2,

            OnnxportError::MissingDependency { .. } => 3,

            OnnxportError::ArchitectureMissing { .. } => 4,

            OnnxportError::ExternalToolFailure { .. } | OnnxportError::Network { .. } => 5,

            OnnxportError::VerificationFailed { .. } => 6,

            _ => 1,
        }
    }
}

/// Attach path context to IO results.
pub trait IoResultExt<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| OnnxportError::io_with_path(e, path.as_ref()))
    }
}
