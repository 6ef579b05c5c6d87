//! onnxport - convert PyTorch, TensorFlow/Keras and Hugging Face models to ONNX.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use onnxport::{
    ConversionJob, ConversionRequest, DetectionPolicy, HubClient, OnnxportError, Orchestrator,
    RunOutcome, RunState, Toolchain,
};
use tracing::{debug, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "onnxport")]
#[command(about = "Convert ML models to ONNX format")]
struct Args {
    /// Model file, directory, or Hugging Face model ID
    #[arg(long, alias = "modelPath")]
    model_path: String,

    /// Output ONNX file path
    #[arg(long)]
    output: PathBuf,

    /// Input image size
    #[arg(long, alias = "inputSize", default_value_t = 224)]
    input_size: u32,

    /// Quantize the model (int8, uint8)
    #[arg(long)]
    quantize: Option<String>,

    /// Verify the converted model
    #[arg(long)]
    verify: bool,

    /// Fail instead of guessing when the format is unclear
    #[arg(long)]
    strict_detection: bool,

    /// Python interpreter with the ML stack installed [env: ONNXPORT_PYTHON]
    #[arg(long)]
    python: Option<PathBuf>,

    /// Directory for helper scripts (defaults to the user cache directory)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn request(&self) -> ConversionRequest {
        ConversionRequest {
            model_path: self.model_path.clone(),
            output: self.output.clone(),
            input_size: Some(self.input_size),
            quantize: self.quantize.clone(),
            verify: self.verify,
        }
    }

    fn toolchain(&self) -> Toolchain {
        let defaults = Toolchain::from_env();
        Toolchain::new(
            self.python
                .clone()
                .unwrap_or_else(|| defaults.python().to_path_buf()),
            self.work_dir
                .clone()
                .unwrap_or_else(|| defaults.work_dir().to_path_buf()),
        )
    }

    /// Validate the request; failures belong to the first stage of the run.
    fn job(&self) -> Result<ConversionJob, OnnxportError> {
        ConversionJob::from_request(self.request()).map_err(|e| e.in_stage(RunState::Detecting))
    }

    fn detection_policy(&self) -> DetectionPolicy {
        if self.strict_detection {
            DetectionPolicy::Strict
        } else {
            DetectionPolicy::Lenient
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(&args).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

async fn run(args: &Args) -> Result<RunOutcome> {
    let job = args.job()?;

    let toolchain = args.toolchain();
    debug!(
        "Using {} with scripts in {}",
        toolchain.python().display(),
        toolchain.work_dir().display()
    );

    let mut orchestrator =
        Orchestrator::with_python_toolchain(toolchain).with_detection_policy(args.detection_policy());
    // Only hub identifiers need the client; local conversions go ahead without it
    match HubClient::from_env() {
        Ok(client) => orchestrator = orchestrator.with_hub_client(client),
        Err(e) => warn!("Hub config lookups disabled: {}", e),
    }

    Ok(orchestrator.run(job).await?)
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let code = err
        .downcast_ref::<OnnxportError>()
        .map(OnnxportError::exit_code)
        .unwrap_or(1);
    u8::try_from(code).unwrap_or(1)
}

fn print_outcome(outcome: &RunOutcome) {
    if let Some(report) = &outcome.size_report {
        println!("Size: {report}");
    }
    if let Some(report) = &outcome.verification {
        println!("{report}");
    }
    match &outcome.artifact {
        Some(path) => println!("Conversion complete: {}", path.display()),
        None => println!("Model is already in ONNX format, nothing to convert"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_camel_case_aliases() {
        let args = Args::try_parse_from([
            "onnxport",
            "--modelPath",
            "owner/model",
            "--output",
            "out.onnx",
            "--inputSize",
            "384",
        ])
        .unwrap();
        assert_eq!(args.model_path, "owner/model");
        assert_eq!(args.input_size, 384);
        assert_eq!(args.detection_policy(), DetectionPolicy::Lenient);
    }

    #[test]
    fn test_defaults() {
        let args =
            Args::try_parse_from(["onnxport", "--model-path", "m.pt", "--output", "m.onnx"])
                .unwrap();
        let request = args.request();
        assert_eq!(request.input_size, Some(224));
        assert_eq!(request.quantize, None);
        assert!(!request.verify);
    }

    #[test]
    fn test_unknown_quantization_exit_code() {
        let args = Args::try_parse_from([
            "onnxport",
            "--model-path",
            "m.pt",
            "--output",
            "m.onnx",
            "--quantize",
            "fp4",
        ])
        .unwrap();
        let err: anyhow::Error = args.job().unwrap_err().into();
        assert_eq!(exit_code(&err), 2);
        assert_eq!(
            err.to_string(),
            "detecting stage failed: Unknown quantization type 'fp4'. Use: int8, uint8"
        );
    }
}
