//! Centralized configuration for onnxport.
//!
//! Export parameters, derived-path naming and hub settings live here as
//! constants; the only runtime configuration is the [`Toolchain`] built by
//! the caller.
//!
//! [`Toolchain`]: crate::conversion::Toolchain

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parameters shared by every graph export.
pub struct ConverterConfig;

impl ConverterConfig {
    /// Input spatial size used when none is given or derivable.
    pub const DEFAULT_INPUT_SIZE: u32 = 224;
    pub const INPUT_CHANNELS: u32 = 3;
    pub const OPSET_VERSION: u32 = 14;
    pub const INPUT_NAME: &'static str = "input";
    pub const OUTPUT_NAME: &'static str = "output";
    /// Symbolic name of the dynamic leading axis on input and output.
    pub const BATCH_AXIS: &'static str = "batch_size";
    /// Dependencies every Python-side step needs.
    pub const BASE_DEPENDENCIES: [&'static str; 2] = ["onnx", "numpy"];
}

/// Toolchain discovery.
pub struct ToolchainConfig;

impl ToolchainConfig {
    pub const DEFAULT_PYTHON: &'static str = "python3";
    pub const PYTHON_ENV_VAR: &'static str = "ONNXPORT_PYTHON";
    pub const WORK_DIR_NAME: &'static str = "onnxport";
    pub const SCRIPTS_DIR_NAME: &'static str = "scripts";
    /// External graph converter module, invoked as `python -m <module>`.
    pub const GRAPH_CONVERTER_MODULE: &'static str = "tf2onnx.convert";
}

/// Naming of the canonical artifact and of the paths derived from a target.
pub struct PathsConfig;

impl PathsConfig {
    pub const CANONICAL_EXTENSION: &'static str = "onnx";
    /// Unquantized intermediate written by the primary conversion.
    pub const TEMP_EXTENSION: &'static str = "temp.onnx";
    /// Staging file for the quantized output.
    pub const QUANT_STAGING_EXTENSION: &'static str = "quant.onnx";
    /// Directory the hub helper library exports into.
    pub const HUB_EXPORT_EXTENSION: &'static str = "export";
    /// Directory holding a graph materialized from a layered-format file.
    pub const SAVED_MODEL_EXTENSION: &'static str = "saved_model";
    /// File the hub helper library writes inside its export directory.
    pub const HELPER_ARTIFACT_NAME: &'static str = "model.onnx";
}

/// Model hub settings.
pub struct HubConfig;

impl HubConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "https://huggingface.co";
    pub const ENDPOINT_ENV_VAR: &'static str = "HF_ENDPOINT";
    pub const TOKEN_ENV_VAR: &'static str = "HF_TOKEN";
    pub const DEFAULT_REVISION: &'static str = "main";
    pub const CONFIG_FILENAME: &'static str = "config.json";
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const USER_AGENT: &'static str = "onnxport/0.1";
}

/// Paths derived deterministically from a conversion target.
///
/// All of them live next to the target so renames never cross filesystems.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedPaths {
    pub target: PathBuf,
    pub temp: PathBuf,
    pub quant_staging: PathBuf,
    pub hub_export_dir: PathBuf,
    pub saved_model_dir: PathBuf,
}

impl DerivedPaths {
    pub fn for_target(target: &Path) -> Self {
        Self {
            target: target.to_path_buf(),
            temp: target.with_extension(PathsConfig::TEMP_EXTENSION),
            quant_staging: target.with_extension(PathsConfig::QUANT_STAGING_EXTENSION),
            hub_export_dir: target.with_extension(PathsConfig::HUB_EXPORT_EXTENSION),
            saved_model_dir: target.with_extension(PathsConfig::SAVED_MODEL_EXTENSION),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_paths() {
        let paths = DerivedPaths::for_target(Path::new("/models/detector.onnx"));
        assert_eq!(paths.temp, PathBuf::from("/models/detector.temp.onnx"));
        assert_eq!(paths.quant_staging, PathBuf::from("/models/detector.quant.onnx"));
        assert_eq!(paths.hub_export_dir, PathBuf::from("/models/detector.export"));
        assert_eq!(paths.saved_model_dir, PathBuf::from("/models/detector.saved_model"));
    }

    #[test]
    fn test_derived_paths_never_alias_target() {
        for target in ["out/model.onnx", "out/model", "out/model.temp.onnx"] {
            let paths = DerivedPaths::for_target(Path::new(target));
            assert_ne!(paths.temp, paths.target);
            assert_ne!(paths.quant_staging, paths.target);
            assert_ne!(paths.temp, paths.quant_staging);
        }
    }
}
