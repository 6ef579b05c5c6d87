//! The Python interpreter and work directory used by the subprocess backends.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::debug;

use super::pipeline::{run_tool, ToolOutput};
use super::scripts::{self, Script};
use crate::config::ToolchainConfig;
use crate::Result;

/// Where to find Python and where to deploy the helper scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    python: PathBuf,
    work_dir: PathBuf,
}

impl Toolchain {
    pub fn new(python: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Build from `ONNXPORT_PYTHON` and the platform cache directory.
    pub fn from_env() -> Self {
        let python = std::env::var_os(ToolchainConfig::PYTHON_ENV_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(ToolchainConfig::DEFAULT_PYTHON));
        Self::new(python, Self::default_work_dir())
    }

    /// `<cache dir>/onnxport`, or the system temp dir when there is no cache dir.
    pub fn default_work_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(ToolchainConfig::WORK_DIR_NAME)
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn script_path(&self, script: Script) -> PathBuf {
        scripts::scripts_dir(&self.work_dir).join(script.file_name())
    }

    /// Run an embedded helper script, deploying it first if needed.
    pub async fn run_script<I, S>(&self, script: Script, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        scripts::ensure_scripts_deployed(&self.work_dir)?;

        let mut command = Command::new(&self.python);
        command.arg(self.script_path(script)).args(args);
        debug!("Running {} via {}", script.file_name(), self.python.display());

        run_tool(script.tool_name(), command).await
    }

    /// Run `python -m <module> <args>`.
    pub async fn run_module<I, S>(&self, module: &str, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.python);
        command.arg("-m").arg(module).args(args);
        debug!("Running python -m {}", module);

        let tool = module.split('.').next().unwrap_or(module);
        run_tool(tool, command).await
    }
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::from_env()
    }
}
