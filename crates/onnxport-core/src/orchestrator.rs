//! Conversion run orchestration.
//!
//! A run moves through `Detecting -> Converting -> (Quantizing) ->
//! (Verifying) -> Done`, or ends in `Failed` from any of them. The
//! orchestrator owns every intermediate path: strategies write to the
//! derived temporary path, the quantizer writes to a staging path, and only
//! a finished artifact is renamed onto the target.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{ConverterConfig, DerivedPaths};
use crate::conversion::{
    convert_with_fallback, plan, ExportBackend, PythonBackend, Strategy, StrategyContext,
    Toolchain,
};
use crate::detect::{detect, DetectionPolicy, SourceFormat};
use crate::error::{OnnxportError, Result};
use crate::hub::{self, HubClient};
use crate::quantize::{quantize_artifact, QuantizationBackend, QuantizationKind, SizeReport};
use crate::temp::TempArtifact;
use crate::verify::{verify, ArtifactInspector, OnnxInspector, VerificationReport};

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Detecting,
    Converting,
    Quantizing,
    Verifying,
    Done,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Detecting => "detecting",
            RunState::Converting => "converting",
            RunState::Quantizing => "quantizing",
            RunState::Verifying => "verifying",
            RunState::Done => "done",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Whether the run may move from `self` to `next`.
    ///
    /// Stages only move forward; optional stages may be skipped and
    /// `Failed` is reachable from every non-terminal state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Detecting, Converting | Quantizing | Verifying | Done) => true,
            (Converting, Quantizing | Verifying | Done) => true,
            (Quantizing, Verifying | Done) => true,
            (Verifying, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversion request as it arrives from the outside, unvalidated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConversionRequest {
    #[serde(alias = "modelPath")]
    pub model_path: String,
    pub output: PathBuf,
    #[serde(default, alias = "inputSize")]
    pub input_size: Option<u32>,
    /// Quantization kind as typed by the operator
    #[serde(default)]
    pub quantize: Option<String>,
    #[serde(default)]
    pub verify: bool,
}

/// A validated conversion job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    reference: String,
    target: PathBuf,
    input_size: u32,
    quantize: Option<QuantizationKind>,
    verify: bool,
    source_format: Option<SourceFormat>,
}

impl ConversionJob {
    /// Validate a request. Nothing on disk is touched.
    pub fn from_request(request: ConversionRequest) -> Result<Self> {
        let quantize = request
            .quantize
            .as_deref()
            .map(str::parse::<QuantizationKind>)
            .transpose()?;

        let job = Self {
            reference: request.model_path,
            target: request.output,
            input_size: request
                .input_size
                .unwrap_or(ConverterConfig::DEFAULT_INPUT_SIZE),
            quantize,
            verify: request.verify,
            source_format: None,
        };
        job.validate()?;
        Ok(job)
    }

    fn validate(&self) -> Result<()> {
        if self.reference.trim().is_empty() {
            return Err(OnnxportError::Validation {
                field: "model_path".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.target.as_os_str().is_empty() {
            return Err(OnnxportError::Validation {
                field: "output".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.input_size == 0 {
            return Err(OnnxportError::Validation {
                field: "input_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn quantize(&self) -> Option<QuantizationKind> {
        self.quantize
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    /// Filled in once detection has run.
    pub fn source_format(&self) -> Option<SourceFormat> {
        self.source_format
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub state: RunState,
    pub source_format: SourceFormat,
    /// Written artifact. `None` when the reference was already canonical and
    /// nothing was requested.
    pub artifact: Option<PathBuf>,
    pub strategy: Option<Strategy>,
    pub size_report: Option<SizeReport>,
    pub verification: Option<VerificationReport>,
    /// Class labels reported by a hub export
    pub labels: Option<BTreeMap<String, String>>,
}

/// Tracks the current state and stamps errors with it.
#[derive(Debug)]
struct RunTracker {
    state: RunState,
}

impl RunTracker {
    fn new() -> Self {
        Self {
            state: RunState::Detecting,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!("Run state: {} -> {}", self.state, next);
        self.state = next;
    }

    /// Move to `Failed`, stamping `err` with the stage it escaped from.
    fn fail(&mut self, err: OnnxportError) -> OnnxportError {
        let stage = self.state;
        debug!("Run state: {} -> {}", stage, RunState::Failed);
        self.state = RunState::Failed;
        err.in_stage(stage)
    }
}

/// Sequences detection, conversion, quantization and verification.
pub struct Orchestrator {
    exporter: Arc<dyn ExportBackend>,
    quantizer: Arc<dyn QuantizationBackend>,
    inspector: Arc<dyn ArtifactInspector>,
    hub: Option<HubClient>,
    detection_policy: DetectionPolicy,
}

impl Orchestrator {
    pub fn new(
        exporter: Arc<dyn ExportBackend>,
        quantizer: Arc<dyn QuantizationBackend>,
        inspector: Arc<dyn ArtifactInspector>,
    ) -> Self {
        Self {
            exporter,
            quantizer,
            inspector,
            hub: None,
            detection_policy: DetectionPolicy::default(),
        }
    }

    /// Everything through one Python interpreter, verification through ONNX Runtime.
    pub fn with_python_toolchain(toolchain: Toolchain) -> Self {
        let backend = Arc::new(PythonBackend::new(toolchain.clone()));
        Self::new(
            backend.clone(),
            backend,
            Arc::new(OnnxInspector::new(toolchain)),
        )
    }

    /// Look up hub model configurations over HTTP.
    pub fn with_hub_client(mut self, client: HubClient) -> Self {
        self.hub = Some(client);
        self
    }

    pub fn with_detection_policy(mut self, policy: DetectionPolicy) -> Self {
        self.detection_policy = policy;
        self
    }

    /// Run a job to completion.
    ///
    /// On failure the error is annotated with the stage it escaped from
    /// and no intermediate file is left behind.
    pub async fn run(&self, mut job: ConversionJob) -> Result<RunOutcome> {
        let mut tracker = RunTracker::new();
        info!("Detecting format of {}", job.reference);

        let format = detect(&job.reference, self.detection_policy).map_err(|e| tracker.fail(e))?;
        job.source_format = Some(format);
        info!("Detected format: {}", format);
        check_reference(&job.reference, format).map_err(|e| tracker.fail(e))?;

        let writes_output = plan(format).is_some() || job.quantize.is_some();
        if writes_output && format != SourceFormat::HubIdentifier {
            let paths = DerivedPaths::for_target(&job.target);
            check_output_paths(Path::new(&job.reference), &paths).map_err(|e| tracker.fail(e))?;
        }

        let outcome = match plan(format) {
            Some(attempts) => self.convert(&job, format, attempts, &mut tracker).await?,
            None => self.post_process_canonical(&job, &mut tracker).await?,
        };

        tracker.advance(RunState::Done);
        Ok(RunOutcome {
            state: RunState::Done,
            ..outcome
        })
    }

    async fn convert(
        &self,
        job: &ConversionJob,
        format: SourceFormat,
        attempts: &[Strategy],
        tracker: &mut RunTracker,
    ) -> Result<RunOutcome> {
        tracker.advance(RunState::Converting);

        // Weights-only plans never write, so no output directory is created
        if attempts.iter().any(Strategy::needs_toolchain) {
            self.exporter.preflight().await.map_err(|e| tracker.fail(e))?;
            ensure_parent_dir(&job.target).map_err(|e| tracker.fail(e))?;
        }
        let paths = DerivedPaths::for_target(&job.target);
        let temp = TempArtifact::file(&paths.temp).map_err(|e| tracker.fail(e))?;

        let hub_input_size = match format {
            SourceFormat::HubIdentifier | SourceFormat::HubLocalDirectory => {
                hub::resolve_input_size(self.hub.as_ref(), &job.reference, format).await
            }
            _ => None,
        };

        let ctx = StrategyContext {
            reference: &job.reference,
            format,
            output: temp.path(),
            paths: &paths,
            input_size: job.input_size,
            hub_input_size,
        };
        let converted = convert_with_fallback(attempts, &ctx, self.exporter.as_ref())
            .await
            .map_err(|e| tracker.fail(e))?;
        info!("Converted with {} strategy", converted.strategy);
        if let Some(labels) = &converted.labels {
            info!("Labels: {:?}", labels);
        }

        let (artifact, size_report) = match job.quantize {
            Some(kind) => {
                tracker.advance(RunState::Quantizing);
                let staging = TempArtifact::file(&paths.quant_staging).map_err(|e| tracker.fail(e))?;
                let report =
                    quantize_artifact(self.quantizer.as_ref(), temp.path(), staging.path(), kind)
                        .await;
                // The unquantized artifact goes whatever the outcome
                drop(temp);
                let report = report.map_err(|e| tracker.fail(e))?;
                let artifact = staging.persist(&job.target).map_err(|e| tracker.fail(e))?;
                (artifact, Some(report))
            }
            None => (
                temp.persist(&job.target).map_err(|e| tracker.fail(e))?,
                None,
            ),
        };
        info!("Saved ONNX model to: {}", artifact.display());

        let verification = self.maybe_verify(job, &artifact, tracker).await?;

        Ok(RunOutcome {
            state: tracker.state,
            source_format: format,
            artifact: Some(artifact),
            strategy: Some(converted.strategy),
            size_report,
            verification,
            labels: converted.labels,
        })
    }

    /// The reference is already canonical: quantize and/or verify it directly.
    async fn post_process_canonical(
        &self,
        job: &ConversionJob,
        tracker: &mut RunTracker,
    ) -> Result<RunOutcome> {
        let reference = PathBuf::from(&job.reference);

        let (artifact, size_report) = match job.quantize {
            Some(kind) => {
                tracker.advance(RunState::Quantizing);
                ensure_parent_dir(&job.target).map_err(|e| tracker.fail(e))?;
                let paths = DerivedPaths::for_target(&job.target);
                let staging = TempArtifact::file(&paths.quant_staging).map_err(|e| tracker.fail(e))?;
                let report =
                    quantize_artifact(self.quantizer.as_ref(), &reference, staging.path(), kind)
                        .await
                        .map_err(|e| tracker.fail(e))?;
                let artifact = staging.persist(&job.target).map_err(|e| tracker.fail(e))?;
                info!("Saved ONNX model to: {}", artifact.display());
                (Some(artifact), Some(report))
            }
            None => {
                info!("Model is already in ONNX format: {}", reference.display());
                (None, None)
            }
        };

        let checked = artifact.as_deref().unwrap_or(&reference);
        let verification = self.maybe_verify(job, checked, tracker).await?;

        Ok(RunOutcome {
            state: tracker.state,
            source_format: SourceFormat::AlreadyCanonical,
            artifact,
            strategy: None,
            size_report,
            verification,
            labels: None,
        })
    }

    async fn maybe_verify(
        &self,
        job: &ConversionJob,
        artifact: &Path,
        tracker: &mut RunTracker,
    ) -> Result<Option<VerificationReport>> {
        if !job.verify {
            return Ok(None);
        }
        tracker.advance(RunState::Verifying);
        let report = verify(self.inspector.as_ref(), artifact)
            .await
            .map_err(|e| tracker.fail(e))?;
        Ok(Some(report))
    }
}

/// Local references must exist; hub identifiers must be well-formed.
fn check_reference(reference: &str, format: SourceFormat) -> Result<()> {
    if format == SourceFormat::HubIdentifier {
        return hub::validate_repo_id(reference);
    }
    if !Path::new(reference).exists() {
        return Err(OnnxportError::Validation {
            field: "model_path".to_string(),
            message: format!("{reference} does not exist"),
        });
    }
    Ok(())
}

/// Refuse targets whose derived paths would replace or remove the reference.
///
/// Intermediate guards clear whatever sits at their path, so a reference at
/// (or under) one of them would be deleted.
fn check_output_paths(reference: &Path, paths: &DerivedPaths) -> Result<()> {
    let Some(reference) = resolve_path(reference) else {
        return Ok(());
    };
    let owned = [
        &paths.target,
        &paths.temp,
        &paths.quant_staging,
        &paths.hub_export_dir,
        &paths.saved_model_dir,
    ];
    for path in owned {
        let Some(resolved) = resolve_path(path) else {
            continue;
        };
        if reference.starts_with(&resolved) {
            return Err(OnnxportError::Validation {
                field: "output".to_string(),
                message: format!(
                    "{} would overwrite the model at {}; choose another output path",
                    path.display(),
                    reference.display()
                ),
            });
        }
    }
    Ok(())
}

/// Canonical form of `path`, resolving through its parent when the path
/// itself does not exist yet. `None` when not even the parent exists.
fn resolve_path(path: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = path.canonicalize() {
        return Some(resolved);
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Some(parent.canonicalize().ok()?.join(path.file_name()?))
}

fn ensure_parent_dir(target: &Path) -> Result<()> {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent)
            .map_err(|e| OnnxportError::io("creating output directory", parent, e)),
        _ => Ok(()),
    }
}
