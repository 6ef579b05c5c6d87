//! Ordered strategy attempts per source format.

use tracing::{debug, warn};

use super::strategy::{Strategy, StrategyContext, StrategyOutput};
use super::types::ExportBackend;
use crate::detect::SourceFormat;
use crate::error::{OnnxportError, Result};

const CHECKPOINT: &[Strategy] = &[Strategy::TorchCheckpoint];
const HUB: &[Strategy] = &[Strategy::HubDirect, Strategy::HubHelper];
const GRAPH_DIRECTORY: &[Strategy] = &[Strategy::GraphDirectory];
const LAYERED_FILE: &[Strategy] = &[Strategy::LayeredFile];
const WEIGHTS_ONLY: &[Strategy] = &[Strategy::WeightsOnly];

/// Strategies to try for `format`, in order. `None` means nothing to convert.
pub fn plan(format: SourceFormat) -> Option<&'static [Strategy]> {
    match format {
        SourceFormat::NativeCheckpoint => Some(CHECKPOINT),
        SourceFormat::HubIdentifier | SourceFormat::HubLocalDirectory => Some(HUB),
        SourceFormat::ExportedGraphDirectory => Some(GRAPH_DIRECTORY),
        SourceFormat::LayeredFormatFile => Some(LAYERED_FILE),
        SourceFormat::WeightsOnlyFile => Some(WEIGHTS_ONLY),
        SourceFormat::AlreadyCanonical => None,
    }
}

/// Try `attempts` in order and return the first success.
///
/// A failed attempt's partial output is removed before the next one runs.
/// When every attempt fails the last error wins; earlier ones are logged.
/// Errors that fallback cannot fix (missing tooling) stop the sequence.
pub async fn convert_with_fallback(
    attempts: &[Strategy],
    ctx: &StrategyContext<'_>,
    backend: &dyn ExportBackend,
) -> Result<StrategyOutput> {
    let mut last_error = None;

    for (i, strategy) in attempts.iter().enumerate() {
        let err = match strategy.run(ctx, backend).await {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };

        remove_partial_output(ctx);

        match attempts.get(i + 1) {
            Some(next) if err.absorbed_by_fallback() => {
                warn!("{} failed, trying {}: {}", strategy, next, err);
                last_error = Some(err);
            }
            _ => return Err(err),
        }
    }

    Err(last_error
        .unwrap_or_else(|| OnnxportError::Other(format!("no strategy for {}", ctx.format))))
}

fn remove_partial_output(ctx: &StrategyContext<'_>) {
    match std::fs::remove_file(ctx.output) {
        Ok(()) => debug!("Removed partial output {}", ctx.output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "Failed to remove partial output {}: {}",
            ctx.output.display(),
            e
        ),
    }
}
