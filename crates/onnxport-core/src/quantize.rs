//! Dynamic (weight-only) quantization of a canonical artifact.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{OnnxportError, Result};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Target weight precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuantizationKind {
    Int8,
    Uint8,
}

impl QuantizationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuantizationKind::Int8 => "int8",
            QuantizationKind::Uint8 => "uint8",
        }
    }
}

impl fmt::Display for QuantizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuantizationKind {
    type Err = OnnxportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "int8" => Ok(QuantizationKind::Int8),
            "uint8" => Ok(QuantizationKind::Uint8),
            _ => Err(OnnxportError::UnsupportedQuantizationKind {
                kind: s.to_string(),
            }),
        }
    }
}

/// Size of an artifact before and after quantization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub original_bytes: u64,
    pub quantized_bytes: u64,
}

impl SizeReport {
    /// Percentage of the original size saved. Negative if the output grew.
    pub fn reduction_percent(&self) -> f64 {
        if self.original_bytes == 0 {
            return 0.0;
        }
        (1.0 - self.quantized_bytes as f64 / self.original_bytes as f64) * 100.0
    }

    pub fn original_mb(&self) -> f64 {
        self.original_bytes as f64 / BYTES_PER_MB
    }

    pub fn quantized_mb(&self) -> f64 {
        self.quantized_bytes as f64 / BYTES_PER_MB
    }
}

impl fmt::Display for SizeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} MB -> {:.2} MB ({:.1}% reduction)",
            self.original_mb(),
            self.quantized_mb(),
            self.reduction_percent()
        )
    }
}

/// Something that can write a quantized copy of an ONNX file.
#[async_trait::async_trait]
pub trait QuantizationBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Write a quantized copy of `input` to `output`. Must not modify `input`.
    async fn quantize(&self, input: &Path, output: &Path, kind: QuantizationKind) -> Result<()>;
}

/// Quantize `input` into `output` and report the size change.
///
/// The caller owns both paths; this function neither renames nor deletes.
pub async fn quantize_artifact(
    backend: &dyn QuantizationBackend,
    input: &Path,
    output: &Path,
    kind: QuantizationKind,
) -> Result<SizeReport> {
    let original_bytes = file_size(input).await?;

    info!("Quantizing model to {} with {}...", kind, backend.name());
    backend.quantize(input, output, kind).await?;

    if !output.exists() {
        return Err(OnnxportError::ExternalToolFailure {
            tool: backend.name().to_string(),
            diagnostic: format!("no quantized model was written to {}", output.display()),
        });
    }

    let report = SizeReport {
        original_bytes,
        quantized_bytes: file_size(output).await?,
    };

    info!("Original size: {:.2} MB", report.original_mb());
    info!("Quantized size: {:.2} MB", report.quantized_mb());
    info!("Size reduction: {:.1}%", report.reduction_percent());
    if report.quantized_bytes > report.original_bytes {
        warn!(
            "Quantized model is larger than the original ({} > {} bytes)",
            report.quantized_bytes, report.original_bytes
        );
    }

    Ok(report)
}

async fn file_size(path: &Path) -> Result<u64> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| OnnxportError::io("reading artifact size", path, e))?;
    Ok(metadata.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct HalvingBackend;

    #[async_trait::async_trait]
    impl QuantizationBackend for HalvingBackend {
        fn name(&self) -> &str {
            "halving"
        }

        async fn quantize(&self, input: &Path, output: &Path, _kind: QuantizationKind) -> Result<()> {
            let bytes = std::fs::read(input)?;
            std::fs::write(output, &bytes[..bytes.len() / 2])?;
            Ok(())
        }
    }

    struct SilentBackend;

    #[async_trait::async_trait]
    impl QuantizationBackend for SilentBackend {
        fn name(&self) -> &str {
            "silent"
        }

        async fn quantize(&self, _: &Path, _: &Path, _: QuantizationKind) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!("int8".parse::<QuantizationKind>().unwrap(), QuantizationKind::Int8);
        assert_eq!("UINT8".parse::<QuantizationKind>().unwrap(), QuantizationKind::Uint8);

        let err = "fp4".parse::<QuantizationKind>().unwrap_err();
        assert!(matches!(
            err,
            OnnxportError::UnsupportedQuantizationKind { ref kind } if kind == "fp4"
        ));
    }

    #[test]
    fn test_reduction_percent() {
        let report = SizeReport {
            original_bytes: 400,
            quantized_bytes: 100,
        };
        assert!((report.reduction_percent() - 75.0).abs() < f64::EPSILON);

        let empty = SizeReport {
            original_bytes: 0,
            quantized_bytes: 0,
        };
        assert_eq!(empty.reduction_percent(), 0.0);
    }

    #[tokio::test]
    async fn test_quantize_reports_sizes() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("model.temp.onnx");
        let output = dir.path().join("model.quant.onnx");
        std::fs::write(&input, vec![7u8; 1000]).unwrap();

        let report = quantize_artifact(&HalvingBackend, &input, &output, QuantizationKind::Int8)
            .await
            .unwrap();

        assert_eq!(report.original_bytes, 1000);
        assert_eq!(report.quantized_bytes, 500);
        assert_eq!(std::fs::read(&input).unwrap().len(), 1000);
    }

    #[tokio::test]
    async fn test_missing_output_is_tool_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("model.temp.onnx");
        std::fs::write(&input, b"graph").unwrap();

        let err = quantize_artifact(
            &SilentBackend,
            &input,
            &dir.path().join("model.quant.onnx"),
            QuantizationKind::Uint8,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OnnxportError::ExternalToolFailure { .. }));
    }
}
