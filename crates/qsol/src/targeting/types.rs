use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::backend::{Bqm, Cqm, ModelStats};
use crate::diagnostics::Diagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityStatus {
    Full,
    Partial,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetSelection {
    pub runtime_id: String,
    pub backend_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStage {
    Resolution,
    Backend,
    Runtime,
    Pair,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportIssue {
    pub code: String,
    pub message: String,
    pub stage: IssueStage,
    pub capability_id: Option<String>,
    pub detail: serde_json::Value,
}

impl SupportIssue {
    pub fn new(code: &str, message: impl Into<String>, stage: IssueStage) -> Self {
        SupportIssue {
            code: code.to_string(),
            message: message.into(),
            stage,
            capability_id: None,
            detail: serde_json::Value::Null,
        }
    }

    pub fn with_capability(mut self, capability_id: &str) -> Self {
        self.capability_id = Some(capability_id.to_string());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub kind: String,
    pub stats: ModelStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportReport {
    pub selection: TargetSelection,
    pub supported: bool,
    pub issues: Vec<SupportIssue>,
    /// Capabilities the backend covers only partially; informational.
    pub notes: Vec<String>,
    pub required_capabilities: Vec<String>,
    pub backend_capabilities: IndexMap<String, CapabilityStatus>,
    pub runtime_capabilities: IndexMap<String, CapabilityStatus>,
    pub model_summary: ModelSummary,
}

#[derive(Debug)]
pub struct CompiledModel {
    pub kind: String,
    pub backend_id: String,
    pub cqm: Cqm,
    pub bqm: Option<Bqm>,
    pub varmap: IndexMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: ModelStats,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeRunOptions {
    pub params: IndexMap<String, serde_json::Value>,
    pub outdir: Option<PathBuf>,
}

/// One raw sample handed back by a runtime before ranking.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub sample: IndexMap<String, u8>,
    pub energy: f64,
    pub num_occurrences: u32,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub code: String,
    pub message: String,
}

impl RuntimeError {
    pub fn execution(message: impl Into<String>) -> Self {
        RuntimeError {
            code: "QSOL5001".to_string(),
            message: message.into(),
        }
    }

    pub fn policy(message: impl Into<String>) -> Self {
        RuntimeError {
            code: "QSOL5002".to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for RuntimeError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedAssignment {
    pub variable: String,
    pub meaning: String,
    pub value: u8,
}

#[derive(Debug, Clone, Serialize)]
pub struct StandardRunResult {
    pub schema_version: String,
    pub runtime: String,
    pub backend: String,
    pub status: String,
    pub energy: Option<f64>,
    pub reads: u64,
    pub best_sample: IndexMap<String, u8>,
    pub selected_assignments: Vec<SelectedAssignment>,
    pub timing_ms: f64,
    pub capability_report_path: String,
    pub extensions: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug)]
pub struct CompatibilityResult {
    pub report: SupportReport,
    pub compiled_model: Option<CompiledModel>,
}
