use serde_json::json;

use crate::diagnostics::Severity;
use crate::ground::GroundIr;
use crate::targeting::interfaces::{BackendPlugin, RuntimePlugin};
use crate::targeting::types::{
    CapabilityStatus, CompatibilityResult, IssueStage, ModelSummary, SupportIssue, SupportReport,
    TargetSelection,
};

/// Union of the per-problem capability sets recorded during grounding.
pub fn extract_required_capabilities(ground: &GroundIr) -> Vec<String> {
    let mut out = Vec::new();
    for problem in &ground.problems {
        for capability in &problem.required_capabilities {
            if !out.contains(capability) {
                out.push(capability.clone());
            }
        }
    }
    out.sort();
    out
}

/// Gate a (runtime, backend) pair against the model: pair compatibility,
/// backend capability coverage, then a trial compilation. `partial`
/// coverage is allowed but recorded as a note.
pub fn check_pair_support(
    ground: &GroundIr,
    selection: &TargetSelection,
    backend: &dyn BackendPlugin,
    runtime: &dyn RuntimePlugin,
) -> CompatibilityResult {
    let required = extract_required_capabilities(ground);
    let backend_catalog = backend.capability_catalog();
    let runtime_catalog = runtime.capability_catalog();

    let mut issues = Vec::new();
    let mut notes = Vec::new();

    let allowed = backend_allowed(runtime, &selection.backend_id);
    if !allowed {
        issues.push(
            SupportIssue::new(
                "QSOL4008",
                format!(
                    "runtime `{}` is not compatible with backend `{}`",
                    selection.runtime_id, selection.backend_id
                ),
                IssueStage::Pair,
            )
            .with_detail(json!({
                "allowed_backends": sorted(runtime.compatible_backend_ids()),
            })),
        );
    }

    issues.extend(backend.check_support(ground, &required));
    for capability in &required {
        if backend_catalog.get(capability) == Some(&CapabilityStatus::Partial) {
            notes.push(format!(
                "backend `{}` supports `{capability}` partially",
                selection.backend_id
            ));
        }
    }

    let mut compiled_model = None;
    if issues.is_empty() {
        let model = backend.compile_model(ground);
        for diag in &model.diagnostics {
            if diag.severity != Severity::Error {
                continue;
            }
            issues.push(
                SupportIssue::new("QSOL4010", diag.message.clone(), IssueStage::Backend)
                    .with_detail(json!({
                        "diagnostic_code": diag.code,
                        "line": diag.span.line,
                        "col": diag.span.col,
                    })),
            );
        }
        compiled_model = Some(model);
    }

    if let Some(model) = &compiled_model {
        if issues.is_empty() {
            issues.extend(runtime.check_support(model, selection));
        }
    }

    let model_summary = match &compiled_model {
        Some(model) => ModelSummary {
            kind: model.kind.clone(),
            stats: model.stats,
        },
        None => ModelSummary {
            kind: "cqm".to_string(),
            stats: Default::default(),
        },
    };

    let report = SupportReport {
        selection: selection.clone(),
        supported: issues.is_empty(),
        issues,
        notes,
        required_capabilities: required,
        backend_capabilities: backend_catalog,
        runtime_capabilities: runtime_catalog,
        model_summary,
    };
    CompatibilityResult {
        report,
        compiled_model,
    }
}

fn backend_allowed(runtime: &dyn RuntimePlugin, backend_id: &str) -> bool {
    runtime
        .compatible_backend_ids()
        .iter()
        .any(|allowed| allowed == backend_id)
}

fn sorted(mut ids: Vec<String>) -> Vec<String> {
    ids.sort();
    ids
}
