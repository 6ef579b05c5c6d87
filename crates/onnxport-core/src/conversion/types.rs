//! Types for model conversion operations.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::config::ConverterConfig;
use crate::Result;

/// Shape of the synthetic tensor fed through the model during export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub batch: u32,
    pub channels: u32,
    pub height: u32,
    pub width: u32,
}

impl InputShape {
    /// `(1, 3, size, size)`, the layout image classifiers expect.
    pub fn square(size: u32) -> Self {
        Self {
            batch: 1,
            channels: ConverterConfig::INPUT_CHANNELS,
            height: size,
            width: size,
        }
    }

    pub fn dims(&self) -> [u32; 4] {
        [self.batch, self.channels, self.height, self.width]
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.batch, self.channels, self.height, self.width
        )
    }
}

/// What a hub export learned about the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubExport {
    /// Input size the export actually used
    pub input_size: Option<u32>,
    /// Class index to label mapping from the model configuration
    pub labels: Option<BTreeMap<String, String>>,
}

/// JSON line emitted by the helper scripts on stdout.
///
/// Every script reports `{"stage": ...}` lines while it works, finishes with
/// a `complete` line, or fails with an `error` line carrying a `kind`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptProgressLine {
    pub stage: String,
    #[serde(default)]
    pub message: Option<String>,
    /// Error class on `error` lines (`architecture_missing`, `missing_dependency`, ...)
    #[serde(default)]
    pub kind: Option<String>,
    /// Missing package on `missing_dependency` errors
    #[serde(default)]
    pub dependency: Option<String>,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub input_size: Option<u32>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    /// Modules a dependency probe could not import
    #[serde(default)]
    pub missing: Option<Vec<String>>,
}

impl ScriptProgressLine {
    pub fn is_error(&self) -> bool {
        self.stage == "error"
    }

    pub fn is_complete(&self) -> bool {
        self.stage == "complete"
    }
}

/// Everything the conversion strategies need from the outside world.
///
/// Each method writes its artifact at the given path or fails with a typed
/// error. Implementations may run in-process or delegate to subprocesses;
/// the strategies cannot tell the difference.
#[async_trait::async_trait]
pub trait ExportBackend: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    /// Check that the base tooling is present before any conversion work.
    async fn preflight(&self) -> Result<()>;

    /// Load a serialized model object and export it with a synthetic input.
    ///
    /// Fails with `ArchitectureMissing` when the checkpoint is a plain
    /// mapping of weights.
    async fn export_checkpoint(
        &self,
        checkpoint: &Path,
        output: &Path,
        shape: InputShape,
    ) -> Result<()>;

    /// Load a hub model (identifier or local snapshot) and trace-export it.
    ///
    /// `input_size` is the size derived from the model configuration, if the
    /// caller could resolve it; otherwise the backend derives it itself and
    /// falls back to `default_size`.
    async fn export_hub_direct(
        &self,
        model: &str,
        output: &Path,
        input_size: Option<u32>,
        default_size: u32,
    ) -> Result<HubExport>;

    /// Export a hub model through the higher-level helper library into
    /// `output_dir`.
    async fn export_hub_helper(&self, model: &str, output_dir: &Path) -> Result<()>;

    /// Write a layered-format model file out as an exported graph directory.
    async fn materialize_graph_dir(&self, layered: &Path, output_dir: &Path) -> Result<()>;

    /// Run the external graph converter on an exported graph directory.
    async fn convert_graph_dir(&self, graph_dir: &Path, output: &Path) -> Result<()>;
}
