//! Subprocess backend driving the Python conversion stack.
//!
//! Every operation is one embedded helper script (or `python -m tf2onnx`)
//! run through the [`Toolchain`]. The scripts speak the JSON progress-line
//! protocol so failures arrive here already classified.

use std::ffi::OsString;
use std::path::Path;

use tracing::{debug, info};

use super::scripts::Script;
use super::toolchain::Toolchain;
use super::types::{ExportBackend, HubExport, InputShape};
use crate::config::{ConverterConfig, ToolchainConfig};
use crate::error::{OnnxportError, Result};
use crate::quantize::{QuantizationBackend, QuantizationKind};

/// Backend for torch, transformers, optimum, tensorflow, tf2onnx and
/// onnxruntime, all reached through one Python interpreter.
#[derive(Debug, Clone)]
pub struct PythonBackend {
    toolchain: Toolchain,
}

impl PythonBackend {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    /// Modules from `modules` that the interpreter cannot import.
    pub async fn missing_modules(&self, modules: &[&str]) -> Result<Vec<String>> {
        let output = self
            .toolchain
            .run_script(Script::CheckDependencies, modules.iter().copied())
            .await?;
        Ok(output
            .completion
            .and_then(|line| line.missing)
            .unwrap_or_default())
    }
}

/// Shared tracing arguments: tensor names, dynamic axis and opset.
fn export_args() -> Vec<OsString> {
    vec![
        "--input-name".into(),
        ConverterConfig::INPUT_NAME.into(),
        "--output-name".into(),
        ConverterConfig::OUTPUT_NAME.into(),
        "--batch-axis".into(),
        ConverterConfig::BATCH_AXIS.into(),
        "--opset".into(),
        ConverterConfig::OPSET_VERSION.to_string().into(),
    ]
}

#[async_trait::async_trait]
impl ExportBackend for PythonBackend {
    fn name(&self) -> &str {
        "python"
    }

    async fn preflight(&self) -> Result<()> {
        let missing = self.missing_modules(&ConverterConfig::BASE_DEPENDENCIES).await?;
        if missing.is_empty() {
            debug!("Base dependencies present");
            return Ok(());
        }
        Err(OnnxportError::MissingDependency {
            hint: format!("Install with: pip install {}", missing.join(" ")),
            dependency: missing.join(", "),
        })
    }

    async fn export_checkpoint(
        &self,
        checkpoint: &Path,
        output: &Path,
        shape: InputShape,
    ) -> Result<()> {
        let mut args: Vec<OsString> = vec![
            "--checkpoint".into(),
            checkpoint.into(),
            "--output".into(),
            output.into(),
            "--shape".into(),
        ];
        args.extend(shape.dims().iter().map(|d| OsString::from(d.to_string())));
        args.extend(export_args());

        self.toolchain.run_script(Script::ExportCheckpoint, args).await?;
        Ok(())
    }

    async fn export_hub_direct(
        &self,
        model: &str,
        output: &Path,
        input_size: Option<u32>,
        default_size: u32,
    ) -> Result<HubExport> {
        let mut args: Vec<OsString> = vec![
            "--model".into(),
            model.into(),
            "--output".into(),
            output.into(),
            "--default-size".into(),
            default_size.to_string().into(),
        ];
        if let Some(size) = input_size {
            args.push("--image-size".into());
            args.push(size.to_string().into());
        }
        args.extend(export_args());

        let completion = self
            .toolchain
            .run_script(Script::ExportHub, args)
            .await?
            .completion;

        Ok(HubExport {
            input_size: completion.as_ref().and_then(|c| c.input_size),
            labels: completion.and_then(|c| c.labels),
        })
    }

    async fn export_hub_helper(&self, model: &str, output_dir: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "--model".into(),
            model.into(),
            "--output-dir".into(),
            output_dir.into(),
        ];
        self.toolchain.run_script(Script::ExportHubHelper, args).await?;
        Ok(())
    }

    async fn materialize_graph_dir(&self, layered: &Path, output_dir: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "--model".into(),
            layered.into(),
            "--output-dir".into(),
            output_dir.into(),
        ];
        self.toolchain.run_script(Script::SaveGraphDir, args).await?;
        Ok(())
    }

    async fn convert_graph_dir(&self, graph_dir: &Path, output: &Path) -> Result<()> {
        info!("Converting with tf2onnx...");
        let args: Vec<OsString> = vec![
            "--saved-model".into(),
            graph_dir.into(),
            "--output".into(),
            output.into(),
            "--opset".into(),
            ConverterConfig::OPSET_VERSION.to_string().into(),
        ];
        self.toolchain
            .run_module(ToolchainConfig::GRAPH_CONVERTER_MODULE, args)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl QuantizationBackend for PythonBackend {
    fn name(&self) -> &str {
        "onnxruntime"
    }

    async fn quantize(&self, input: &Path, output: &Path, kind: QuantizationKind) -> Result<()> {
        let args: Vec<OsString> = vec![
            "--input".into(),
            input.into(),
            "--output".into(),
            output.into(),
            "--kind".into(),
            kind.as_str().into(),
        ];
        self.toolchain.run_script(Script::QuantizeDynamic, args).await?;
        Ok(())
    }
}
