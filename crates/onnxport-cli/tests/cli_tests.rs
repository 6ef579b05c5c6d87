//! Integration tests for the onnxport binary.
//!
//! Only paths that need no Python installation are exercised here: the
//! canonical short-circuit and argument validation.

use std::process::{Command, Output};
use tempfile::TempDir;

fn command(args: &[&str], work_dir: &TempDir) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_onnxport"));
    command
        .args(args)
        .arg("--work-dir")
        .arg(work_dir.path())
        .env("ONNXPORT_PYTHON", "/nonexistent/python3")
        .env_remove("HF_ENDPOINT");
    command
}

fn onnxport(args: &[&str], work_dir: &TempDir) -> Output {
    command(args, work_dir)
        .output()
        .expect("Failed to run onnxport")
}

#[test]
fn test_existing_onnx_exits_zero_without_writing() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.onnx");
    std::fs::write(&model, b"graph").unwrap();
    let output_path = dir.path().join("converted.onnx");

    let output = onnxport(
        &[
            "--model-path",
            model.to_str().unwrap(),
            "--output",
            output_path.to_str().unwrap(),
        ],
        &dir,
    );

    assert!(output.status.success(), "{:?}", output);
    assert!(String::from_utf8_lossy(&output.stdout).contains("already in ONNX format"));
    assert!(!output_path.exists());
}

#[test]
fn test_unknown_quantization_kind_exits_with_validation_code() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.pt");
    std::fs::write(&model, b"checkpoint").unwrap();
    let output_path = dir.path().join("out/model.onnx");

    let output = onnxport(
        &[
            "--modelPath",
            model.to_str().unwrap(),
            "--output",
            output_path.to_str().unwrap(),
            "--quantize",
            "fp4",
        ],
        &dir,
    );

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("error: detecting stage failed: Unknown quantization type 'fp4'"),
        "{stderr}"
    );
    assert!(!dir.path().join("out").exists());
}

#[test]
fn test_missing_interpreter_exits_with_dependency_code() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.pt");
    std::fs::write(&model, b"checkpoint").unwrap();
    let output_path = dir.path().join("model.onnx");

    let output = onnxport(
        &[
            "--model-path",
            model.to_str().unwrap(),
            "--output",
            output_path.to_str().unwrap(),
        ],
        &dir,
    );

    assert_eq!(output.status.code(), Some(3));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: converting stage failed"), "{stderr}");
    assert!(!output_path.exists());
}

#[test]
fn test_strict_detection_rejects_unknown_extension() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.ckpt");
    std::fs::write(&model, b"checkpoint").unwrap();

    let output = onnxport(
        &[
            "--model-path",
            model.to_str().unwrap(),
            "--output",
            dir.path().join("model.onnx").to_str().unwrap(),
            "--strict-detection",
        ],
        &dir,
    );

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("detecting stage failed"));
}

#[test]
fn test_malformed_hub_endpoint_does_not_block_local_models() {
    let dir = TempDir::new().unwrap();
    let model = dir.path().join("model.onnx");
    std::fs::write(&model, b"graph").unwrap();

    let output = command(
        &[
            "--model-path",
            model.to_str().unwrap(),
            "--output",
            dir.path().join("converted.onnx").to_str().unwrap(),
        ],
        &dir,
    )
    .env("HF_ENDPOINT", "not a url")
    .output()
    .expect("Failed to run onnxport");

    assert!(output.status.success(), "{:?}", output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Hub config lookups disabled"), "{stderr}");
}
