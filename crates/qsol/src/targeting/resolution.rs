use crate::targeting::types::{IssueStage, SupportIssue, TargetSelection};

pub const DEFAULT_BACKEND_ID: &str = "dimod-cqm-v1";

/// Selection sources, strongest first: CLI, then the scenario's
/// `execution` block, then the config entrypoint.
#[derive(Debug, Clone, Default)]
pub struct SelectionInputs {
    pub cli_runtime: Option<String>,
    pub cli_backend: Option<String>,
    pub scenario_runtime: Option<String>,
    pub scenario_backend: Option<String>,
    pub entrypoint_runtime: Option<String>,
    pub entrypoint_backend: Option<String>,
}

#[derive(Debug)]
pub struct SelectionResolution {
    pub selection: Option<TargetSelection>,
    pub issues: Vec<SupportIssue>,
}

pub fn resolve_target_selection(inputs: &SelectionInputs) -> SelectionResolution {
    let runtime = first_present(&[
        &inputs.cli_runtime,
        &inputs.scenario_runtime,
        &inputs.entrypoint_runtime,
    ]);
    let backend = first_present(&[
        &inputs.cli_backend,
        &inputs.scenario_backend,
        &inputs.entrypoint_backend,
    ])
    .unwrap_or_else(|| DEFAULT_BACKEND_ID.to_string());

    let Some(runtime) = runtime else {
        return SelectionResolution {
            selection: None,
            issues: vec![SupportIssue::new(
                "QSOL4006",
                "runtime is required; provide `--runtime` or set `execution.runtime` in the \
                 scenario",
                IssueStage::Resolution,
            )],
        };
    };

    SelectionResolution {
        selection: Some(TargetSelection {
            runtime_id: runtime,
            backend_id: backend,
        }),
        issues: Vec::new(),
    }
}

fn first_present(candidates: &[&Option<String>]) -> Option<String> {
    candidates
        .iter()
        .find_map(|candidate| {
            candidate
                .as_ref()
                .filter(|value| !value.trim().is_empty())
                .cloned()
        })
}
