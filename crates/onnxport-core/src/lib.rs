//! onnxport - convert model artifacts to ONNX.
//!
//! Takes a local checkpoint, an exported graph directory, a Keras file or a
//! model hub identifier, picks a conversion strategy for it, and optionally
//! quantizes and verifies the result. The tensor work itself is delegated to
//! the Python ML stack through embedded helper scripts; this crate decides
//! what to run, chains the steps and cleans up after them.
//!
//! # Example
//!
//! ```rust,ignore
//! use onnxport::{ConversionJob, ConversionRequest, Orchestrator, Toolchain};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> onnxport::Result<()> {
//!     let job = ConversionJob::from_request(ConversionRequest {
//!         model_path: "umm-maybe/AI-image-detector".into(),
//!         output: "models/detector.onnx".into(),
//!         quantize: Some("int8".into()),
//!         verify: true,
//!         ..Default::default()
//!     })?;
//!
//!     let outcome = Orchestrator::with_python_toolchain(Toolchain::from_env())
//!         .run(job)
//!         .await?;
//!     println!("{:?}", outcome.artifact);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod conversion;
pub mod detect;
pub mod error;
pub mod hub;
pub mod orchestrator;
pub mod quantize;
pub mod temp;
pub mod verify;

pub use config::{ConverterConfig, DerivedPaths, HubConfig, PathsConfig, ToolchainConfig};
pub use conversion::{
    ExportBackend, HubExport, InputShape, PythonBackend, Strategy, StrategyContext,
    StrategyOutput, Toolchain,
};
pub use detect::{classify, detect, Detection, DetectionPolicy, SourceFormat};
pub use error::{OnnxportError, Result};
pub use hub::HubClient;
pub use orchestrator::{ConversionJob, ConversionRequest, Orchestrator, RunOutcome, RunState};
pub use quantize::{quantize_artifact, QuantizationBackend, QuantizationKind, SizeReport};
pub use temp::TempArtifact;
pub use verify::{
    verify, ArtifactInspector, ArtifactSignature, Dimension, OnnxInspector, TensorSignature,
    VerificationReport,
};
