//! Source format detection.
//!
//! Classifies a model reference (filesystem path or hub identifier) into
//! exactly one [`SourceFormat`]. Existence on disk is checked before any
//! extension parsing so that local paths containing a slash are never
//! mistaken for hub identifiers.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{OnnxportError, Result};

/// Marker file of an exported graph directory.
const GRAPH_MARKER: &str = "saved_model.pb";

/// Weight files that identify a hub-style model directory.
const HUB_WEIGHT_MARKERS: [&str; 4] = [
    "model.safetensors",
    "pytorch_model.bin",
    "model.safetensors.index.json",
    "pytorch_model.bin.index.json",
];

/// Source format of a model reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    /// Serialized model object (`.pt`, `.pth`, `.bin`)
    NativeCheckpoint,
    /// Remote model hub identifier (`owner/name`)
    HubIdentifier,
    /// Local directory laid out like a hub snapshot
    HubLocalDirectory,
    /// Directory holding a serialized graph (`saved_model.pb`)
    ExportedGraphDirectory,
    /// Layered HDF5/Keras file (`.h5`, `.keras`)
    LayeredFormatFile,
    /// Weight container without architecture (`.safetensors`)
    WeightsOnlyFile,
    /// Already ONNX
    AlreadyCanonical,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::NativeCheckpoint => "native_checkpoint",
            SourceFormat::HubIdentifier => "hub_identifier",
            SourceFormat::HubLocalDirectory => "hub_local_directory",
            SourceFormat::ExportedGraphDirectory => "exported_graph_directory",
            SourceFormat::LayeredFormatFile => "layered_format_file",
            SourceFormat::WeightsOnlyFile => "weights_only_file",
            SourceFormat::AlreadyCanonical => "already_canonical",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to treat references whose format can only be guessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPolicy {
    /// Pick the default category and warn.
    #[default]
    Lenient,
    /// Refuse to guess.
    Strict,
}

/// Result of classifying a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub format: SourceFormat,
    /// Set when the format was a best-effort default.
    pub ambiguity: Option<String>,
}

impl Detection {
    fn certain(format: SourceFormat) -> Self {
        Self {
            format,
            ambiguity: None,
        }
    }

    fn guessed(format: SourceFormat, reason: String) -> Self {
        Self {
            format,
            ambiguity: Some(reason),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.ambiguity.is_some()
    }
}

/// Classify a model reference. Never fails; ambiguous cases carry a reason.
pub fn classify(reference: &str) -> Detection {
    let path = Path::new(reference);

    if reference.contains('/') && !path.exists() {
        return Detection::certain(SourceFormat::HubIdentifier);
    }

    if path.is_dir() {
        if path.join(GRAPH_MARKER).exists() {
            return Detection::certain(SourceFormat::ExportedGraphDirectory);
        }
        if HUB_WEIGHT_MARKERS.iter().any(|m| path.join(m).exists()) {
            return Detection::certain(SourceFormat::HubLocalDirectory);
        }
        return Detection::guessed(
            SourceFormat::ExportedGraphDirectory,
            "directory detected but format unclear, trying as SavedModel".to_string(),
        );
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "pt" | "pth" | "bin" => Detection::certain(SourceFormat::NativeCheckpoint),
        "h5" | "keras" => Detection::certain(SourceFormat::LayeredFormatFile),
        "onnx" => Detection::certain(SourceFormat::AlreadyCanonical),
        "safetensors" => Detection::certain(SourceFormat::WeightsOnlyFile),
        other => Detection::guessed(
            SourceFormat::NativeCheckpoint,
            format!("unknown extension '{other}', trying as PyTorch checkpoint"),
        ),
    }
}

/// Classify a reference under the given policy.
///
/// Lenient detection logs the ambiguity and keeps going; strict detection
/// turns it into [`OnnxportError::DetectionAmbiguous`].
pub fn detect(reference: &str, policy: DetectionPolicy) -> Result<SourceFormat> {
    let detection = classify(reference);

    match (&detection.ambiguity, policy) {
        (None, _) => Ok(detection.format),
        (Some(reason), DetectionPolicy::Lenient) => {
            warn!("{}: {}", reference, reason);
            Ok(detection.format)
        }
        (Some(reason), DetectionPolicy::Strict) => Err(OnnxportError::DetectionAmbiguous {
            reference: reference.to_string(),
            reason: reason.clone(),
        }),
    }
}
