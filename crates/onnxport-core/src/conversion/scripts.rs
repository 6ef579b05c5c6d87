//! Embedded Python helper scripts and deployment utilities.
//!
//! Scripts are compiled into the binary and written to the work directory on
//! first use, or when the embedded version changes (detected via a `.hash`
//! sidecar).

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::ToolchainConfig;
use crate::error::IoResultExt;
use crate::Result;

/// A helper script shipped with the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    CheckDependencies,
    ExportCheckpoint,
    ExportHub,
    ExportHubHelper,
    SaveGraphDir,
    QuantizeDynamic,
    CheckModel,
}

impl Script {
    pub const ALL: [Script; 7] = [
        Script::CheckDependencies,
        Script::ExportCheckpoint,
        Script::ExportHub,
        Script::ExportHubHelper,
        Script::SaveGraphDir,
        Script::QuantizeDynamic,
        Script::CheckModel,
    ];

    pub fn file_name(&self) -> &'static str {
        match self {
            Script::CheckDependencies => "check_dependencies.py",
            Script::ExportCheckpoint => "export_checkpoint.py",
            Script::ExportHub => "export_hub.py",
            Script::ExportHubHelper => "export_hub_helper.py",
            Script::SaveGraphDir => "save_graph_dir.py",
            Script::QuantizeDynamic => "quantize_dynamic.py",
            Script::CheckModel => "check_model.py",
        }
    }

    pub fn source(&self) -> &'static str {
        match self {
            Script::CheckDependencies => include_str!("scripts/check_dependencies.py"),
            Script::ExportCheckpoint => include_str!("scripts/export_checkpoint.py"),
            Script::ExportHub => include_str!("scripts/export_hub.py"),
            Script::ExportHubHelper => include_str!("scripts/export_hub_helper.py"),
            Script::SaveGraphDir => include_str!("scripts/save_graph_dir.py"),
            Script::QuantizeDynamic => include_str!("scripts/quantize_dynamic.py"),
            Script::CheckModel => include_str!("scripts/check_model.py"),
        }
    }

    /// Label used in logs and error messages.
    pub fn tool_name(&self) -> &'static str {
        match self {
            Script::CheckDependencies => "dependency check",
            Script::ExportCheckpoint => "torch.onnx export",
            Script::ExportHub => "transformers export",
            Script::ExportHubHelper => "optimum export",
            Script::SaveGraphDir => "keras SavedModel export",
            Script::QuantizeDynamic => "onnxruntime quantize_dynamic",
            Script::CheckModel => "onnx.checker",
        }
    }
}

/// Compute a short hash of a string for staleness checking.
fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..8])
}

/// Get the path to the helper scripts directory.
pub fn scripts_dir(work_dir: &Path) -> PathBuf {
    work_dir.join(ToolchainConfig::SCRIPTS_DIR_NAME)
}

/// Deploy embedded scripts to disk if missing or outdated.
pub fn ensure_scripts_deployed(work_dir: &Path) -> Result<()> {
    let dir = scripts_dir(work_dir);
    std::fs::create_dir_all(&dir).with_path(&dir)?;

    let mut written = 0usize;
    for script in Script::ALL {
        if deploy_script(&dir, script.file_name(), script.source())? {
            written += 1;
        }
    }

    if written > 0 {
        info!("Deployed {} helper script(s) to {}", written, dir.display());
    }
    Ok(())
}

/// Write one script unless the stored hash matches. Returns whether it wrote.
fn deploy_script(dir: &Path, filename: &str, content: &str) -> Result<bool> {
    let script_path = dir.join(filename);
    let hash_path = dir.join(format!("{}.hash", filename));
    let current_hash = content_hash(content);

    if script_path.exists() {
        if let Ok(stored_hash) = std::fs::read_to_string(&hash_path) {
            if stored_hash.trim() == current_hash {
                return Ok(false);
            }
        }
    }

    debug!("Writing {}", script_path.display());
    std::fs::write(&script_path, content).with_path(&script_path)?;
    std::fs::write(&hash_path, &current_hash).with_path(&hash_path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_deploy_writes_every_script() {
        let work = TempDir::new().unwrap();
        ensure_scripts_deployed(work.path()).unwrap();

        for script in Script::ALL {
            let path = scripts_dir(work.path()).join(script.file_name());
            assert_eq!(std::fs::read_to_string(path).unwrap(), script.source());
        }
    }

    #[test]
    fn test_deploy_skips_up_to_date_and_rewrites_stale() {
        let work = TempDir::new().unwrap();
        let dir = scripts_dir(work.path());
        std::fs::create_dir_all(&dir).unwrap();

        assert!(deploy_script(&dir, "probe.py", "print(1)").unwrap());
        assert!(!deploy_script(&dir, "probe.py", "print(1)").unwrap());
        assert!(deploy_script(&dir, "probe.py", "print(2)").unwrap());
        assert_eq!(std::fs::read_to_string(dir.join("probe.py")).unwrap(), "print(2)");
    }

    #[test]
    fn test_scripts_speak_the_progress_protocol() {
        for script in Script::ALL {
            assert!(
                script.source().contains("\"stage\""),
                "{} does not emit progress lines",
                script.file_name()
            );
        }
    }
}
