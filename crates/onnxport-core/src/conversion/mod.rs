//! Conversion strategies and the toolchain behind them.
//!
//! Strategies describe *what* to run for each source category and go
//! through the [`ExportBackend`] trait for the actual work. The bundled
//! [`PythonBackend`] runs embedded helper scripts with a Python interpreter
//! located by the [`Toolchain`]; tests substitute in-process fakes.

pub mod fallback;
pub(crate) mod pipeline;
mod python;
mod scripts;
mod strategy;
mod toolchain;
mod types;

pub use fallback::{convert_with_fallback, plan};
pub use pipeline::{run_tool, ToolOutput};
pub use python::PythonBackend;
pub use scripts::{ensure_scripts_deployed, Script};
pub use strategy::{Strategy, StrategyContext, StrategyOutput};
pub use toolchain::Toolchain;
pub use types::{ExportBackend, HubExport, InputShape, ScriptProgressLine};
