use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use indexmap::IndexMap;
use log::{debug, error, info};
use serde_json::json;

use crate::backend::BackendArtifacts;
use crate::cancel::CancelToken;
use crate::diagnostics::{has_errors, Diagnostic};
use crate::elaborate::elaborate_unknowns;
use crate::ground::{ground_ir, GroundIr, ScenarioPayload};
use crate::kernel::{lower_symbolic, KernelIr};
use crate::loader::{file_span, ModuleLoader};
use crate::sema::{check_program, resolve_program, validate_program, SymbolTable};
use crate::surface::{desugar_program, parse_program, Program};
use crate::targeting::{
    check_pair_support, merge_runtime_options, resolve_target_selection, sample_signature,
    CompiledModel, PluginRegistry, RuntimeRunOptions, SelectionInputs, StandardRunResult,
    SupportIssue, SupportReport, TargetSelection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Completed,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub filename: String,
    pub scenario: Option<ScenarioPayload>,
    pub selection: SelectionInputs,
    pub runtime_options: IndexMap<String, serde_json::Value>,
    pub outdir: Option<PathBuf>,
    pub output_format: String,
    pub cancel: Option<CancelToken>,
    pub module_root: Option<PathBuf>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            filename: "<input>".to_string(),
            scenario: None,
            selection: SelectionInputs::default(),
            runtime_options: IndexMap::new(),
            outdir: None,
            output_format: "qubo".to_string(),
            cancel: None,
            module_root: None,
        }
    }
}

/// All state produced by one pipeline run. Stages fill their slot and
/// append diagnostics; a stage that reports errors stops the pipeline.
#[derive(Default)]
pub struct CompilationUnit {
    pub ast: Option<Program>,
    pub symbols: Option<SymbolTable>,
    pub types: Option<std::collections::HashMap<usize, String>>,
    pub kernel: Option<KernelIr>,
    pub ground: Option<GroundIr>,
    pub artifacts: Option<BackendArtifacts>,
    pub target_selection: Option<TargetSelection>,
    pub support_report: Option<SupportReport>,
    pub compiled_model: Option<CompiledModel>,
    pub run_result: Option<StandardRunResult>,
    pub diagnostics: Vec<Diagnostic>,
    pub status: Option<PipelineStatus>,
}

impl CompilationUnit {
    pub fn has_errors(&self) -> bool {
        has_errors(&self.diagnostics)
    }

    pub fn aborted(&self) -> bool {
        self.status == Some(PipelineStatus::Aborted)
    }

    fn abort(&mut self) {
        self.status = Some(PipelineStatus::Aborted);
    }
}

fn cancelled(options: &CompileOptions) -> bool {
    options
        .cancel
        .as_ref()
        .map(CancelToken::is_cancelled)
        .unwrap_or(false)
}

/// Parse, load modules, elaborate, resolve, type-check, validate,
/// desugar, and lower. Cancellation is honored between stages.
pub fn compile_frontend(text: &str, options: &CompileOptions) -> CompilationUnit {
    debug!("starting frontend pipeline for {}", options.filename);
    let mut unit = CompilationUnit::default();

    let program = match parse_program(text, &options.filename) {
        Ok(program) => program,
        Err(diags) => {
            error!("parse failed for {}", options.filename);
            unit.diagnostics.extend(diags);
            unit.status = Some(PipelineStatus::Completed);
            return unit;
        }
    };
    debug!("parse stage completed");
    if cancelled(options) {
        unit.abort();
        return unit;
    }

    let module_root = options
        .module_root
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let loaded = ModuleLoader::new(module_root).resolve(program, &options.filename);
    unit.diagnostics.extend(loaded.diagnostics);
    if unit.has_errors() {
        unit.status = Some(PipelineStatus::Completed);
        return unit;
    }
    debug!("module loading completed");
    if cancelled(options) {
        unit.abort();
        return unit;
    }

    let elaborated = elaborate_unknowns(loaded.program);
    unit.diagnostics.extend(elaborated.diagnostics);
    let program = elaborated.program;
    if unit.has_errors() {
        unit.ast = Some(program);
        unit.status = Some(PipelineStatus::Completed);
        return unit;
    }
    debug!("elaboration completed");
    if cancelled(options) {
        unit.abort();
        return unit;
    }

    let resolution = resolve_program(&program);
    unit.diagnostics.extend(resolution.diagnostics);
    let symbols = resolution.symbols;
    if unit.has_errors() {
        unit.ast = Some(program);
        unit.symbols = Some(symbols);
        unit.status = Some(PipelineStatus::Completed);
        return unit;
    }
    debug!("resolve stage completed");

    let typecheck = check_program(&program, &symbols);
    unit.symbols = Some(symbols);
    unit.diagnostics.extend(typecheck.diagnostics);
    unit.types = Some(typecheck.types);
    unit.diagnostics.extend(validate_program(&program));
    if unit.has_errors() {
        unit.ast = Some(program);
        unit.status = Some(PipelineStatus::Completed);
        return unit;
    }
    debug!("typecheck and validation completed");
    if cancelled(options) {
        unit.ast = Some(program);
        unit.abort();
        return unit;
    }

    let desugared = desugar_program(program);
    match lower_symbolic(&desugared) {
        Ok(kernel) => unit.kernel = Some(kernel),
        Err(diags) => unit.diagnostics.extend(diags),
    }
    unit.ast = Some(desugared);
    debug!("lowering completed");
    unit.status = Some(PipelineStatus::Completed);
    unit
}

/// Frontend plus grounding against the scenario payload.
pub fn compile_with_scenario(text: &str, options: &CompileOptions) -> CompilationUnit {
    let mut unit = compile_frontend(text, options);
    if unit.has_errors() || unit.aborted() {
        return unit;
    }
    let Some(scenario) = &options.scenario else {
        unit.diagnostics.push(Diagnostic::error(
            "QSOL2201",
            "no scenario payload supplied for grounding",
            file_span(&options.filename),
        ));
        return unit;
    };
    let Some(kernel) = &unit.kernel else {
        return unit;
    };
    let result = ground_ir(kernel, scenario, options.cancel.as_ref());
    unit.diagnostics.extend(result.diagnostics);
    unit.ground = result.ground;
    if cancelled(options) {
        unit.abort();
        return unit;
    }
    debug!("grounding completed");
    unit
}

fn issue_to_diagnostic(issue: &SupportIssue, filename: &str) -> Diagnostic {
    Diagnostic::error(&issue.code, issue.message.clone(), file_span(filename))
}

/// Resolve the target pair and gate it against the model's required
/// capabilities. Populates `target_selection` and `support_report`.
pub fn check_target_support(
    text: &str,
    options: &CompileOptions,
    registry: &PluginRegistry,
) -> CompilationUnit {
    let mut unit = compile_with_scenario(text, options);
    if unit.has_errors() || unit.aborted() {
        return unit;
    }
    let Some(ground) = unit.ground.take() else {
        return unit;
    };

    let resolution = resolve_target_selection(&options.selection);
    for issue in &resolution.issues {
        unit.diagnostics
            .push(issue_to_diagnostic(issue, &options.filename));
    }
    let Some(selection) = resolution.selection else {
        unit.ground = Some(ground);
        return unit;
    };

    let backend = registry.backend(&selection.backend_id);
    let runtime = registry.runtime(&selection.runtime_id);
    let (Some(backend), Some(runtime)) = (backend, runtime) else {
        let missing = if backend.is_none() {
            format!("unknown backend id `{}`", selection.backend_id)
        } else {
            format!("unknown runtime id `{}`", selection.runtime_id)
        };
        unit.diagnostics.push(Diagnostic::error(
            "QSOL4007",
            missing,
            file_span(&options.filename),
        ));
        unit.ground = Some(ground);
        unit.target_selection = Some(selection);
        return unit;
    };

    let compatibility = check_pair_support(&ground, &selection, backend, runtime);
    for issue in &compatibility.report.issues {
        unit.diagnostics
            .push(issue_to_diagnostic(issue, &options.filename));
    }
    if let Some(model) = &compatibility.compiled_model {
        unit.diagnostics.extend(model.diagnostics.iter().cloned());
    }
    unit.support_report = Some(compatibility.report);
    unit.target_selection = Some(selection);
    unit.ground = Some(ground);
    unit.compiled_model = compatibility.compiled_model;
    unit
}

/// Compile for the selected target and export artifacts to the output
/// directory (when one is configured).
pub fn build_for_target(
    text: &str,
    options: &CompileOptions,
    registry: &PluginRegistry,
) -> CompilationUnit {
    let mut unit = check_target_support(text, options, registry);
    if unit.has_errors() || unit.aborted() {
        return unit;
    }
    let (Some(selection), Some(model)) = (&unit.target_selection, &unit.compiled_model) else {
        return unit;
    };
    if let Some(outdir) = &options.outdir {
        let Some(backend) = registry.backend(&selection.backend_id) else {
            return unit;
        };
        match backend.export_model(model, outdir, &options.output_format) {
            Ok(artifacts) => {
                info!("artifacts exported to {}", outdir.display());
                unit.artifacts = Some(artifacts);
            }
            Err(err) => unit.diagnostics.push(Diagnostic::error(
                "QSOL4003",
                format!("failed to write artifacts: {err}"),
                file_span(&options.filename),
            )),
        }
    }
    unit
}

/// Full pipeline: build, dispatch to the runtime, and record the
/// standard run result.
pub fn run_for_target(
    text: &str,
    options: &CompileOptions,
    registry: &PluginRegistry,
) -> CompilationUnit {
    let mut unit = build_for_target(text, options, registry);
    if unit.has_errors() || unit.aborted() {
        return unit;
    }
    if cancelled(options) {
        unit.abort();
        return unit;
    }
    let (Some(selection), Some(model)) = (&unit.target_selection, &unit.compiled_model) else {
        return unit;
    };
    let Some(runtime) = registry.runtime(&selection.runtime_id) else {
        return unit;
    };

    let run_options = RuntimeRunOptions {
        params: options.runtime_options.clone(),
        outdir: options.outdir.clone(),
    };
    match runtime.run_model(model, selection, &run_options) {
        Ok(result) => {
            info!(
                "runtime `{}` finished with status `{}`",
                selection.runtime_id, result.status
            );
            if result.status != "ok" {
                unit.diagnostics.push(Diagnostic::warning(
                    "QSOL5002",
                    format!("runtime finished with status `{}`", result.status),
                    file_span(&options.filename),
                ));
            }
            unit.run_result = Some(result);
        }
        Err(err) => {
            error!("runtime `{}` failed: {err}", selection.runtime_id);
            unit.diagnostics.push(Diagnostic::error(
                &err.code,
                err.message,
                file_span(&options.filename),
            ));
        }
    }
    unit
}

pub fn support_report_to_json(report: &SupportReport) -> serde_json::Value {
    json!({
        "supported": report.supported,
        "selection": {
            "runtime": report.selection.runtime_id,
            "backend": report.selection.backend_id,
        },
        "required_capabilities": report.required_capabilities,
        "backend_capabilities": report.backend_capabilities,
        "runtime_capabilities": report.runtime_capabilities,
        "model_summary": report.model_summary,
        "notes": report.notes,
        "issues": report.issues,
    })
}

// --- multi-scenario execution ------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMode {
    Intersection,
    Union,
}

impl CombineMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CombineMode::Intersection => "intersection",
            CombineMode::Union => "union",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    RunAllFail,
    FailFast,
    BestEffort,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::RunAllFail => "run-all-fail",
            FailurePolicy::FailFast => "fail-fast",
            FailurePolicy::BestEffort => "best-effort",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScenarioSpec {
    pub name: String,
    pub payload: ScenarioPayload,
    pub runtime_options: IndexMap<String, serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct MultiScenarioOptions {
    pub combine_mode: CombineMode,
    pub failure_policy: FailurePolicy,
    pub max_workers: usize,
    pub requested_solutions: usize,
}

impl Default for MultiScenarioOptions {
    fn default() -> Self {
        MultiScenarioOptions {
            combine_mode: CombineMode::Intersection,
            failure_policy: FailurePolicy::RunAllFail,
            max_workers: 4,
            requested_solutions: 1,
        }
    }
}

pub struct MultiScenarioOutcome {
    pub scenario: String,
    pub unit: CompilationUnit,
}

pub struct MultiScenarioResult {
    pub outcomes: Vec<MultiScenarioOutcome>,
    pub merged: StandardRunResult,
    pub ok: bool,
}

/// Run the same model across several scenarios on a bounded worker pool.
/// Results are reported in scenario declaration order regardless of
/// completion order; solutions merge per the combine mode.
pub fn run_scenarios(
    text: &str,
    scenarios: &[ScenarioSpec],
    base_options: &CompileOptions,
    multi: &MultiScenarioOptions,
    registry: &PluginRegistry,
) -> MultiScenarioResult {
    let slots: Mutex<Vec<Option<CompilationUnit>>> = Mutex::new(
        scenarios.iter().map(|_| None).collect(),
    );
    let next_index = AtomicUsize::new(0);
    let stop = CancelToken::new();
    let worker_count = multi.max_workers.max(1).min(scenarios.len().max(1));

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| loop {
                let index = next_index.fetch_add(1, Ordering::SeqCst);
                if index >= scenarios.len() || stop.is_cancelled() {
                    break;
                }
                let spec = &scenarios[index];
                let mut options = base_options.clone();
                options.scenario = Some(spec.payload.clone());
                options.runtime_options = merge_runtime_options(&[
                    &spec.runtime_options,
                    &base_options.runtime_options,
                ]);
                options.outdir = base_options
                    .outdir
                    .as_ref()
                    .map(|outdir| outdir.join(&spec.name));
                let unit = run_for_target(text, &options, registry);
                let failed = unit.has_errors() || unit.run_result.is_none();
                if failed && multi.failure_policy == FailurePolicy::FailFast {
                    stop.cancel();
                }
                let mut slots = slots.lock().expect("scenario result slots");
                slots[index] = Some(unit);
            });
        }
    });

    let outcomes: Vec<MultiScenarioOutcome> = slots
        .into_inner()
        .expect("scenario result slots")
        .into_iter()
        .enumerate()
        .map(|(index, unit)| MultiScenarioOutcome {
            scenario: scenarios[index].name.clone(),
            unit: unit.unwrap_or_default(),
        })
        .collect();

    let successes = outcomes
        .iter()
        .filter(|outcome| outcome.unit.run_result.is_some() && !outcome.unit.has_errors())
        .count();
    let failures = outcomes.len() - successes;
    let ok = match multi.failure_policy {
        FailurePolicy::BestEffort => successes > 0,
        _ => failures == 0,
    };

    let merged = merge_scenario_results(&outcomes, multi, ok);
    MultiScenarioResult {
        outcomes,
        merged,
        ok,
    }
}

fn merge_scenario_results(
    outcomes: &[MultiScenarioOutcome],
    multi: &MultiScenarioOptions,
    ok: bool,
) -> StandardRunResult {
    let successful: Vec<&MultiScenarioOutcome> = outcomes
        .iter()
        .filter(|outcome| outcome.unit.run_result.is_some() && !outcome.unit.has_errors())
        .collect();

    let mut per_scenario: Vec<(String, IndexMap<Vec<(String, u8)>, (f64, serde_json::Value)>)> =
        Vec::new();
    for outcome in &successful {
        let Some(result) = outcome.unit.run_result.as_ref() else {
            continue;
        };
        let mut map = IndexMap::new();
        if let Some(solutions) = result.extensions.get("solutions").and_then(|v| v.as_array()) {
            for solution in solutions {
                let Some(sample) = solution.get("sample").and_then(|v| v.as_object()) else {
                    continue;
                };
                let sample: IndexMap<String, u8> = sample
                    .iter()
                    .filter_map(|(k, v)| v.as_u64().map(|value| (k.clone(), value as u8)))
                    .collect();
                let Some(energy) = solution.get("energy").and_then(|v| v.as_f64()) else {
                    continue;
                };
                map.insert(sample_signature(&sample), (energy, solution.clone()));
            }
        }
        per_scenario.push((outcome.scenario.clone(), map));
    }

    let mut signatures: Vec<Vec<(String, u8)>> = Vec::new();
    for (index, (_, map)) in per_scenario.iter().enumerate() {
        for signature in map.keys() {
            let everywhere = per_scenario
                .iter()
                .all(|(_, other)| other.contains_key(signature));
            let include = match multi.combine_mode {
                CombineMode::Intersection => everywhere,
                CombineMode::Union => true,
            };
            let first_owner = per_scenario
                .iter()
                .position(|(_, other)| other.contains_key(signature))
                .unwrap_or(index);
            if include && first_owner == index && !signatures.contains(signature) {
                signatures.push(signature.clone());
            }
        }
    }

    let mut rows: Vec<(f64, Vec<(String, u8)>, serde_json::Value, serde_json::Map<String, serde_json::Value>)> =
        Vec::new();
    for signature in signatures {
        let mut worst = f64::NEG_INFINITY;
        let mut witness = None;
        let mut scenario_energies = serde_json::Map::new();
        for (scenario, map) in &per_scenario {
            if let Some((energy, solution)) = map.get(&signature) {
                worst = worst.max(*energy);
                scenario_energies.insert(scenario.clone(), json!(energy));
                if witness.is_none() {
                    witness = Some(solution.clone());
                }
            }
        }
        if let Some(witness) = witness {
            rows.push((worst, signature, witness, scenario_energies));
        }
    }
    rows.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut merged_solutions = Vec::new();
    for (rank, (energy, signature, witness, scenario_energies)) in
        rows.into_iter().enumerate()
    {
        if merged_solutions.len() >= multi.requested_solutions {
            break;
        }
        let sample: serde_json::Map<String, serde_json::Value> = signature
            .iter()
            .map(|(label, value)| (label.clone(), json!(value)))
            .collect();
        merged_solutions.push(json!({
            "rank": rank + 1,
            "energy": energy,
            "sample": sample,
            "selected_assignments": witness.get("selected_assignments").cloned()
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            "scenario_energies": scenario_energies,
        }));
    }

    let (runtime, backend) = successful
        .first()
        .and_then(|outcome| outcome.unit.run_result.as_ref())
        .map(|result| (result.runtime.clone(), result.backend.clone()))
        .unwrap_or(("<unresolved>".to_string(), "<unresolved>".to_string()));

    let first = merged_solutions.first().cloned();
    let energy = first
        .as_ref()
        .and_then(|solution| solution.get("energy"))
        .and_then(|v| v.as_f64());
    let best_sample: IndexMap<String, u8> = first
        .as_ref()
        .and_then(|solution| solution.get("sample"))
        .and_then(|v| v.as_object())
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_u64().map(|value| (k.clone(), value as u8)))
                .collect()
        })
        .unwrap_or_default();
    let selected = first
        .as_ref()
        .and_then(|solution| solution.get("selected_assignments"))
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let total_reads: u64 = successful
        .iter()
        .filter_map(|outcome| outcome.unit.run_result.as_ref())
        .map(|result| result.reads)
        .sum();
    let total_timing: f64 = successful
        .iter()
        .filter_map(|outcome| outcome.unit.run_result.as_ref())
        .map(|result| result.timing_ms)
        .sum();

    let mut extensions = serde_json::Map::new();
    extensions.insert("combine_mode".to_string(), json!(multi.combine_mode.as_str()));
    extensions.insert(
        "failure_policy".to_string(),
        json!(multi.failure_policy.as_str()),
    );
    extensions.insert(
        "requested_solutions".to_string(),
        json!(multi.requested_solutions),
    );
    extensions.insert(
        "returned_solutions".to_string(),
        json!(merged_solutions.len()),
    );
    extensions.insert("solutions".to_string(), json!(merged_solutions));
    extensions.insert(
        "scenario_results".to_string(),
        serde_json::Value::Object(
            outcomes
                .iter()
                .map(|outcome| {
                    let result = outcome.unit.run_result.as_ref();
                    (
                        outcome.scenario.clone(),
                        json!({
                            "status": result.map(|r| r.status.clone())
                                .unwrap_or_else(|| "failed".to_string()),
                            "energy": result.and_then(|r| r.energy),
                        }),
                    )
                })
                .collect(),
        ),
    );

    StandardRunResult {
        schema_version: "1.0".to_string(),
        runtime,
        backend,
        status: if ok { "ok" } else { "scenario_failed" }.to_string(),
        energy,
        reads: total_reads,
        best_sample,
        selected_assignments: selected,
        timing_ms: total_timing,
        capability_report_path: String::new(),
        extensions,
    }
}
