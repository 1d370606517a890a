use std::io;
use std::path::Path;
use std::time::Instant;

use indexmap::IndexMap;
use serde_json::json;

use crate::backend::{self, BackendArtifacts};
use crate::ground::GroundIr;
use crate::targeting::interfaces::{BackendPlugin, PluginBundle, RuntimePlugin};
use crate::targeting::runtime::{
    collect_ranked_solutions, evaluate_energy_thresholds, int_option, optional_float_option,
    optional_int_option,
};
use crate::targeting::types::{
    CapabilityStatus, CompiledModel, IssueStage, RawSample, RuntimeError, RuntimeRunOptions,
    StandardRunResult, SupportIssue, TargetSelection,
};

/// Exhaustive enumeration refuses models past this many decision
/// variables.
const MAX_EXACT_VARIABLES: usize = 24;

pub fn builtin_plugin_bundle() -> PluginBundle {
    PluginBundle {
        backends: vec![Box::new(CqmBackendPlugin)],
        runtimes: vec![Box::new(LocalExactRuntimePlugin)],
    }
}

/// The reference backend: CQM emission plus penalty-form BQM derivation.
pub struct CqmBackendPlugin;

impl BackendPlugin for CqmBackendPlugin {
    fn plugin_id(&self) -> &str {
        "dimod-cqm-v1"
    }

    fn display_name(&self) -> &str {
        "Constrained quadratic model backend (v1)"
    }

    fn capability_catalog(&self) -> IndexMap<String, CapabilityStatus> {
        let catalog = [
            ("unknown.subset.v1", CapabilityStatus::Full),
            ("unknown.mapping.v1", CapabilityStatus::Full),
            ("unknown.custom.v1", CapabilityStatus::None),
            ("constraint.compare.eq.v1", CapabilityStatus::Full),
            ("constraint.compare.ne.v1", CapabilityStatus::Full),
            ("constraint.compare.lt.v1", CapabilityStatus::Full),
            ("constraint.compare.le.v1", CapabilityStatus::Full),
            ("constraint.quantifier.forall.v1", CapabilityStatus::Full),
            ("constraint.quantifier.exists.v1", CapabilityStatus::Partial),
            ("objective.if_then_else.v1", CapabilityStatus::Partial),
            ("objective.sum.v1", CapabilityStatus::Full),
            ("expression.bool.and.v1", CapabilityStatus::Full),
            ("expression.bool.or.v1", CapabilityStatus::Full),
            ("expression.bool.implies.v1", CapabilityStatus::Full),
            ("expression.bool.not.v1", CapabilityStatus::Full),
        ];
        catalog
            .into_iter()
            .map(|(id, status)| (id.to_string(), status))
            .collect()
    }

    fn check_support(
        &self,
        _ground: &GroundIr,
        required_capabilities: &[String],
    ) -> Vec<SupportIssue> {
        let catalog = self.capability_catalog();
        let mut issues = Vec::new();
        for capability in required_capabilities {
            let status = catalog
                .get(capability)
                .copied()
                .unwrap_or(CapabilityStatus::None);
            if status == CapabilityStatus::None {
                issues.push(
                    SupportIssue::new(
                        "QSOL4010",
                        format!(
                            "backend `{}` does not support required capability `{capability}`",
                            self.plugin_id()
                        ),
                        IssueStage::Backend,
                    )
                    .with_capability(capability),
                );
            }
        }
        issues
    }

    fn compile_model(&self, ground: &GroundIr) -> CompiledModel {
        let result = backend::compile_ground(ground);
        CompiledModel {
            kind: "cqm".to_string(),
            backend_id: self.plugin_id().to_string(),
            cqm: result.cqm,
            bqm: result.bqm,
            varmap: result.varmap,
            diagnostics: result.diagnostics,
            stats: result.stats,
        }
    }

    fn export_model(
        &self,
        compiled_model: &CompiledModel,
        outdir: &Path,
        output_format: &str,
    ) -> io::Result<BackendArtifacts> {
        let result = backend::CodegenResult {
            cqm: compiled_model.cqm.clone(),
            bqm: compiled_model.bqm.clone(),
            varmap: compiled_model.varmap.clone(),
            diagnostics: compiled_model.diagnostics.clone(),
            stats: compiled_model.stats,
        };
        backend::export_artifacts(outdir, output_format, &result)
    }
}

/// Deterministic local runtime: enumerates every assignment of the CQM
/// variables, filters by feasibility, and ranks by objective value.
pub struct LocalExactRuntimePlugin;

impl RuntimePlugin for LocalExactRuntimePlugin {
    fn plugin_id(&self) -> &str {
        "local-exact"
    }

    fn display_name(&self) -> &str {
        "Local exhaustive runtime"
    }

    fn capability_catalog(&self) -> IndexMap<String, CapabilityStatus> {
        [
            ("model.kind.cqm.v1", CapabilityStatus::Full),
            ("sampler.exact.v1", CapabilityStatus::Full),
        ]
        .into_iter()
        .map(|(id, status)| (id.to_string(), status))
        .collect()
    }

    fn compatible_backend_ids(&self) -> Vec<String> {
        vec!["dimod-cqm-v1".to_string()]
    }

    fn check_support(
        &self,
        compiled_model: &CompiledModel,
        selection: &TargetSelection,
    ) -> Vec<SupportIssue> {
        let mut issues = Vec::new();
        if !self
            .compatible_backend_ids()
            .iter()
            .any(|id| id == &selection.backend_id)
        {
            issues.push(SupportIssue::new(
                "QSOL4008",
                format!(
                    "runtime `{}` is incompatible with backend `{}`",
                    self.plugin_id(),
                    selection.backend_id
                ),
                IssueStage::Pair,
            ));
        }
        if compiled_model.kind != "cqm" {
            issues.push(SupportIssue::new(
                "QSOL4010",
                format!(
                    "runtime `{}` expects `cqm` models, got `{}`",
                    self.plugin_id(),
                    compiled_model.kind
                ),
                IssueStage::Runtime,
            ));
        }
        if compiled_model.bqm.is_none() {
            issues.push(SupportIssue::new(
                "QSOL4010",
                "runtime requires a successfully derived BQM view",
                IssueStage::Runtime,
            ));
        }
        if compiled_model.cqm.variables.len() > MAX_EXACT_VARIABLES {
            issues.push(SupportIssue::new(
                "QSOL4010",
                format!(
                    "model has {} variables; exhaustive enumeration supports at most {}",
                    compiled_model.cqm.variables.len(),
                    MAX_EXACT_VARIABLES
                ),
                IssueStage::Runtime,
            ));
        }
        issues
    }

    fn run_model(
        &self,
        compiled_model: &CompiledModel,
        selection: &TargetSelection,
        run_options: &RuntimeRunOptions,
    ) -> Result<StandardRunResult, RuntimeError> {
        let params = &run_options.params;
        let requested_solutions = int_option(params, "solutions", 1)? as usize;
        let energy_min = optional_float_option(params, "energy_min")?;
        let energy_max = optional_float_option(params, "energy_max")?;
        if let (Some(min), Some(max)) = (energy_min, energy_max) {
            if min > max {
                return Err(RuntimeError::execution(
                    "runtime options `energy_min` and `energy_max` must satisfy `energy_min <= \
                     energy_max`",
                ));
            }
        }
        let timeout_ms = optional_int_option(params, "timeout_ms")?;

        let labels: Vec<String> = compiled_model.cqm.variables.iter().cloned().collect();
        if labels.len() > MAX_EXACT_VARIABLES {
            return Err(RuntimeError::execution(format!(
                "model has {} variables; exhaustive enumeration supports at most {}",
                labels.len(),
                MAX_EXACT_VARIABLES
            )));
        }

        let start = Instant::now();
        let total = 1u64 << labels.len();
        let mut samples = Vec::new();
        for word in 0..total {
            if word % 4096 == 0 {
                if let Some(limit) = timeout_ms {
                    if start.elapsed().as_millis() as u64 > limit {
                        return Err(RuntimeError::execution(format!(
                            "runtime exceeded timeout of {limit} ms"
                        )));
                    }
                }
            }
            let sample: IndexMap<String, u8> = labels
                .iter()
                .enumerate()
                .map(|(bit, label)| (label.clone(), ((word >> bit) & 1) as u8))
                .collect();
            if !compiled_model.cqm.is_feasible(&sample) {
                continue;
            }
            let energy = compiled_model.cqm.objective.evaluate(&sample);
            samples.push(RawSample {
                sample,
                energy,
                num_occurrences: 1,
            });
        }
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let solutions = collect_ranked_solutions(&samples, compiled_model, requested_solutions);
        if solutions.is_empty() {
            return Err(RuntimeError::execution(
                "runtime sampler returned no feasible solutions",
            ));
        }
        let (threshold_passed, violations) =
            evaluate_energy_thresholds(&solutions, energy_min, energy_max);

        let first = &solutions[0];
        let mut extensions = serde_json::Map::new();
        extensions.insert(
            "runtime_options".to_string(),
            serde_json::Value::Object(params.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
        );
        extensions.insert("sampler".to_string(), json!("exhaustive"));
        extensions.insert("requested_solutions".to_string(), json!(requested_solutions));
        extensions.insert("returned_solutions".to_string(), json!(solutions.len()));
        extensions.insert(
            "solutions".to_string(),
            serde_json::to_value(&solutions).unwrap_or(serde_json::Value::Null),
        );
        extensions.insert(
            "energy_threshold".to_string(),
            json!({
                "min": energy_min,
                "max": energy_max,
                "scope": "all_returned",
                "inclusive": true,
                "passed": threshold_passed,
                "violations": violations,
            }),
        );

        Ok(StandardRunResult {
            schema_version: "1.0".to_string(),
            runtime: selection.runtime_id.clone(),
            backend: selection.backend_id.clone(),
            status: if threshold_passed {
                "ok".to_string()
            } else {
                "threshold_failed".to_string()
            },
            energy: Some(first.energy),
            reads: total,
            best_sample: first.sample.clone(),
            selected_assignments: first.selected_assignments.clone(),
            timing_ms: elapsed_ms,
            capability_report_path: String::new(),
            extensions,
        })
    }
}
