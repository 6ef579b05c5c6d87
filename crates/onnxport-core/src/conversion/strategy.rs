//! Conversion strategies, one per source category.
//!
//! A strategy turns its input into a canonical artifact at the output path
//! it is given, or fails with a typed error. It never writes the final
//! target itself; the orchestrator decides where the artifact ends up.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use super::types::{ExportBackend, InputShape};
use crate::config::{DerivedPaths, PathsConfig};
use crate::detect::SourceFormat;
use crate::error::{OnnxportError, Result};
use crate::temp::TempArtifact;

/// A way of producing a canonical artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Load a serialized model object and trace-export it
    TorchCheckpoint,
    /// Load a hub model and its configuration and trace-export it
    HubDirect,
    /// Export a hub model through the helper library
    HubHelper,
    /// Run the external graph converter on an exported graph directory
    GraphDirectory,
    /// Materialize a graph directory from a layered file, then convert it
    LayeredFile,
    /// Refuse: weights without architecture cannot be exported
    WeightsOnly,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::TorchCheckpoint => "torch_checkpoint",
            Strategy::HubDirect => "hub_direct",
            Strategy::HubHelper => "hub_helper",
            Strategy::GraphDirectory => "graph_directory",
            Strategy::LayeredFile => "layered_file",
            Strategy::WeightsOnly => "weights_only",
        }
    }

    /// Whether the strategy calls into the backend at all.
    pub fn needs_toolchain(&self) -> bool {
        !matches!(self, Strategy::WeightsOnly)
    }

    /// Produce the artifact at `ctx.output`.
    pub async fn run(
        &self,
        ctx: &StrategyContext<'_>,
        backend: &dyn ExportBackend,
    ) -> Result<StrategyOutput> {
        info!("Converting {} with {} strategy", ctx.reference, self);

        let mut output = StrategyOutput::new(*self, ctx.output);
        match self {
            Strategy::TorchCheckpoint => {
                let shape = InputShape::square(ctx.input_size);
                info!("Converting to ONNX with input shape: {}", shape);
                backend
                    .export_checkpoint(Path::new(ctx.reference), ctx.output, shape)
                    .await?;
            }
            Strategy::HubDirect => {
                let export = backend
                    .export_hub_direct(ctx.reference, ctx.output, ctx.hub_input_size, ctx.input_size)
                    .await?;
                output.input_size = export.input_size;
                output.labels = export.labels;
            }
            Strategy::HubHelper => {
                let export_dir = TempArtifact::dir(&ctx.paths.hub_export_dir)?;
                backend
                    .export_hub_helper(ctx.reference, export_dir.path())
                    .await?;

                let produced = export_dir.path().join(PathsConfig::HELPER_ARTIFACT_NAME);
                if !produced.is_file() {
                    return Err(OnnxportError::ExternalToolFailure {
                        tool: "optimum export".to_string(),
                        diagnostic: format!(
                            "no {} found in {}",
                            PathsConfig::HELPER_ARTIFACT_NAME,
                            export_dir.path().display()
                        ),
                    });
                }
                std::fs::rename(&produced, ctx.output)
                    .map_err(|e| OnnxportError::io("moving helper export", &produced, e))?;
            }
            Strategy::GraphDirectory => {
                backend
                    .convert_graph_dir(Path::new(ctx.reference), ctx.output)
                    .await?;
            }
            Strategy::LayeredFile => {
                let graph_dir = TempArtifact::dir(&ctx.paths.saved_model_dir)?;
                backend
                    .materialize_graph_dir(Path::new(ctx.reference), graph_dir.path())
                    .await?;
                info!("Saved temporary SavedModel to {}", graph_dir.path().display());
                backend.convert_graph_dir(graph_dir.path(), ctx.output).await?;
            }
            Strategy::WeightsOnly => {
                return Err(OnnxportError::ArchitectureMissing {
                    message: format!(
                        "{} holds only weights, not the model architecture. Pass a Hugging Face \
                         model ID or a directory with config.json instead.",
                        ctx.reference
                    ),
                });
            }
        }

        if !ctx.output.is_file() {
            return Err(OnnxportError::ExternalToolFailure {
                tool: self.as_str().to_string(),
                diagnostic: format!("no artifact was written to {}", ctx.output.display()),
            });
        }
        Ok(output)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a strategy needs to know about the job.
#[derive(Debug, Clone)]
pub struct StrategyContext<'a> {
    pub reference: &'a str,
    pub format: SourceFormat,
    /// Where the artifact must be written
    pub output: &'a Path,
    pub paths: &'a DerivedPaths,
    /// Requested input size, also the hub default
    pub input_size: u32,
    /// Input size read from the hub model configuration
    pub hub_input_size: Option<u32>,
}

/// What a successful strategy produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyOutput {
    pub strategy: Strategy,
    pub artifact: PathBuf,
    pub input_size: Option<u32>,
    pub labels: Option<BTreeMap<String, String>>,
}

impl StrategyOutput {
    fn new(strategy: Strategy, artifact: &Path) -> Self {
        Self {
            strategy,
            artifact: artifact.to_path_buf(),
            input_size: None,
            labels: None,
        }
    }
}
