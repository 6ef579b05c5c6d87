//! Structural validation and signature report for a finished artifact.
//!
//! Verification is read-only: it runs the ONNX checker and opens an
//! inference session to list the declared inputs and outputs, but never
//! writes to the artifact.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::conversion::{Script, Toolchain};
use crate::error::{OnnxportError, Result};

/// One axis of a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Dimension {
    Fixed(i64),
    /// Left symbolic in the graph, with the symbol name when it has one.
    Dynamic(Option<String>),
}

impl Dimension {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dimension::Dynamic(_))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(n) => write!(f, "{n}"),
            Dimension::Dynamic(Some(symbol)) => f.write_str(symbol),
            Dimension::Dynamic(None) => f.write_str("?"),
        }
    }
}

/// Declared name, shape and element type of a graph input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorSignature {
    pub name: String,
    pub shape: Vec<Dimension>,
    pub element_type: String,
}

impl TensorSignature {
    pub fn has_dynamic_leading_dim(&self) -> bool {
        self.shape.first().is_some_and(Dimension::is_dynamic)
    }
}

impl fmt::Display for TensorSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(ToString::to_string).collect();
        write!(f, "{}: [{}] ({})", self.name, dims.join(", "), self.element_type)
    }
}

/// Inputs and outputs of a graph, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArtifactSignature {
    pub inputs: Vec<TensorSignature>,
    pub outputs: Vec<TensorSignature>,
}

/// What the operator sees after `--verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub inputs: Vec<TensorSignature>,
    pub outputs: Vec<TensorSignature>,
}

impl VerificationReport {
    pub fn input(&self, name: &str) -> Option<&TensorSignature> {
        self.inputs.iter().find(|t| t.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorSignature> {
        self.outputs.iter().find(|t| t.name == name)
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model Info:")?;
        writeln!(f, "  Inputs:")?;
        for input in &self.inputs {
            writeln!(f, "    - {input}")?;
        }
        writeln!(f, "  Outputs:")?;
        for output in &self.outputs {
            writeln!(f, "    - {output}")?;
        }
        write!(
            f,
            "  File size: {:.2} MB",
            self.size_bytes as f64 / (1024.0 * 1024.0)
        )
    }
}

/// Read-only access to an artifact's validity and signature.
#[async_trait::async_trait]
pub trait ArtifactInspector: Send + Sync {
    /// Structural validation. An invalid artifact is an `ExternalToolFailure`
    /// carrying the checker's message.
    async fn check(&self, path: &Path) -> Result<()>;

    /// Open an inference session and list the declared inputs and outputs.
    async fn describe(&self, path: &Path) -> Result<ArtifactSignature>;
}

/// Validate `path` and build its report.
///
/// Anything wrong with the artifact itself becomes `VerificationFailed`.
/// Missing tooling stays `MissingDependency` so the operator knows the
/// artifact was never actually checked.
pub async fn verify(inspector: &dyn ArtifactInspector, path: &Path) -> Result<VerificationReport> {
    let size_bytes = match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        Ok(_) => return Err(failed(path, "not a file".to_string())),
        Err(e) => return Err(failed(path, e.to_string())),
    };

    info!("Verifying ONNX model: {}", path.display());
    inspector.check(path).await.map_err(|e| as_verification_failure(path, e))?;
    info!("ONNX model is valid");

    let signature = inspector
        .describe(path)
        .await
        .map_err(|e| as_verification_failure(path, e))?;

    Ok(VerificationReport {
        path: path.to_path_buf(),
        size_bytes,
        inputs: signature.inputs,
        outputs: signature.outputs,
    })
}

fn failed(path: &Path, message: String) -> OnnxportError {
    OnnxportError::VerificationFailed {
        path: path.to_path_buf(),
        message,
    }
}

fn as_verification_failure(path: &Path, err: OnnxportError) -> OnnxportError {
    match err {
        OnnxportError::MissingDependency { .. } | OnnxportError::VerificationFailed { .. } => err,
        OnnxportError::ExternalToolFailure { diagnostic, .. } => failed(path, diagnostic),
        other => failed(path, other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// ONNX implementation
// ---------------------------------------------------------------------------

/// Checks with `onnx.checker` through the toolchain and describes with an
/// in-process ONNX Runtime session.
#[derive(Debug, Clone)]
pub struct OnnxInspector {
    toolchain: Toolchain,
}

impl OnnxInspector {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }
}

#[async_trait::async_trait]
impl ArtifactInspector for OnnxInspector {
    async fn check(&self, path: &Path) -> Result<()> {
        let model = path.as_os_str();
        self.toolchain
            .run_script(Script::CheckModel, [std::ffi::OsStr::new("--model"), model])
            .await?;
        Ok(())
    }

    async fn describe(&self, path: &Path) -> Result<ArtifactSignature> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || describe_with_session(&path))
            .await
            .map_err(|e| OnnxportError::Other(format!("inspection task failed: {e}")))?
    }
}

fn describe_with_session(path: &Path) -> Result<ArtifactSignature> {
    let session = open_session(path)
        .map_err(|e| failed(path, format!("failed to open inference session: {e}")))?;

    Ok(ArtifactSignature {
        inputs: session
            .inputs()
            .iter()
            .map(|i| signature_of(i.name(), i.dtype()))
            .collect(),
        outputs: session
            .outputs()
            .iter()
            .map(|o| signature_of(o.name(), o.dtype()))
            .collect(),
    })
}

fn open_session(path: &Path) -> ort::Result<ort::session::Session> {
    ort::session::Session::builder()?.commit_from_file(path)
}

fn signature_of(name: &str, value_type: &ort::value::ValueType) -> TensorSignature {
    match value_type {
        ort::value::ValueType::Tensor {
            ty,
            shape,
            dimension_symbols,
        } => TensorSignature {
            name: name.to_string(),
            shape: shape
                .iter()
                .enumerate()
                .map(|(i, &dim)| {
                    let symbol = dimension_symbols
                        .get(i)
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string());
                    dimension_from_raw(dim, symbol)
                })
                .collect(),
            element_type: format!("{ty:?}").to_lowercase(),
        },
        other => TensorSignature {
            name: name.to_string(),
            shape: Vec::new(),
            element_type: format!("{other:?}").to_lowercase(),
        },
    }
}

/// ONNX Runtime reports symbolic axes as -1.
fn dimension_from_raw(dim: i64, symbol: Option<String>) -> Dimension {
    if dim < 0 {
        Dimension::Dynamic(symbol)
    } else {
        Dimension::Fixed(dim)
    }
}
