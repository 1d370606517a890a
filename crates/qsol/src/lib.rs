pub mod backend;
pub mod cancel;
pub mod diagnostics;
pub mod elaborate;
pub mod ground;
pub mod kernel;
pub mod lexer;
pub mod loader;
pub mod logging;
pub mod pipeline;
pub mod sema;
pub mod surface;
pub mod targeting;

use std::fs;
use std::path::Path;

use thiserror::Error;

pub use cancel::CancelToken;
pub use diagnostics::{
    has_errors, render_diagnostic, render_diagnostics, render_summary, Diagnostic, Severity,
    SourceText, Span,
};
pub use ground::{GroundIr, ParamValue, ScenarioPayload};
pub use pipeline::{
    build_for_target, check_target_support, compile_frontend, compile_with_scenario,
    run_for_target, run_scenarios, support_report_to_json, CombineMode, CompilationUnit,
    CompileOptions, FailurePolicy, MultiScenarioOptions, MultiScenarioResult, PipelineStatus,
    ScenarioSpec,
};
pub use targeting::{PluginBundle, PluginRegistry, StandardRunResult, TargetSelection};

#[derive(Debug, Error)]
pub enum QsolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid scenario payload: {0}")]
    Scenario(String),
    #[error("{0}")]
    Usage(String),
    #[error("plugin registration failed: {0}")]
    Plugin(String),
    #[error("compilation reported diagnostics")]
    Diagnostics,
}

/// Read a scenario payload (the JSON shape described in the manual) from
/// disk.
pub fn load_scenario_payload(path: &Path) -> Result<ScenarioPayload, QsolError> {
    let text = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&text)?;
    ScenarioPayload::from_json(&value).map_err(QsolError::Scenario)
}

/// Write the finalized `run.json`. Aborted pipelines must not call this.
pub fn write_run_result(outdir: &Path, result: &StandardRunResult) -> Result<(), QsolError> {
    fs::create_dir_all(outdir)?;
    let path = outdir.join("run.json");
    fs::write(&path, serde_json::to_string_pretty(result)? + "\n")?;
    Ok(())
}

pub fn write_capability_report(
    outdir: &Path,
    report: &serde_json::Value,
) -> Result<std::path::PathBuf, QsolError> {
    fs::create_dir_all(outdir)?;
    let path = outdir.join("capability_report.json");
    fs::write(&path, serde_json::to_string_pretty(report)? + "\n")?;
    Ok(path)
}
