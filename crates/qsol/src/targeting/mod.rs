mod compatibility;
mod interfaces;
mod plugins;
mod registry;
mod resolution;
mod runtime;
mod types;

pub use compatibility::{check_pair_support, extract_required_capabilities};
pub use interfaces::{BackendPlugin, PluginBundle, RuntimePlugin};
pub use plugins::{builtin_plugin_bundle, CqmBackendPlugin, LocalExactRuntimePlugin};
pub use registry::PluginRegistry;
pub use resolution::{
    resolve_target_selection, SelectionInputs, SelectionResolution, DEFAULT_BACKEND_ID,
};
pub use runtime::{
    collect_ranked_solutions, evaluate_energy_thresholds, merge_runtime_options, sample_signature,
    selected_assignments_for_sample, RankedSolution,
};
pub use types::{
    CapabilityStatus, CompatibilityResult, CompiledModel, IssueStage, ModelSummary, RawSample,
    RuntimeError, RuntimeRunOptions, SelectedAssignment, StandardRunResult, SupportIssue,
    SupportReport, TargetSelection,
};

#[cfg(test)]
mod tests;
