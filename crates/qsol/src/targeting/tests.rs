use indexmap::IndexMap;
use serde_json::json;

use crate::backend::Cqm;
use crate::targeting::*;

fn model_with_varmap(labels: &[(&str, &str)]) -> CompiledModel {
    let mut cqm = Cqm::default();
    let mut varmap = IndexMap::new();
    for (label, meaning) in labels {
        cqm.add_variable(label);
        varmap.insert(label.to_string(), meaning.to_string());
    }
    CompiledModel {
        kind: "cqm".to_string(),
        backend_id: DEFAULT_BACKEND_ID.to_string(),
        cqm,
        bqm: None,
        varmap,
        diagnostics: Vec::new(),
        stats: Default::default(),
    }
}

fn sample(pairs: &[(&str, u8)]) -> IndexMap<String, u8> {
    pairs
        .iter()
        .map(|(label, value)| (label.to_string(), *value))
        .collect()
}

#[test]
fn registry_registers_builtins_and_rejects_duplicates() {
    let registry = PluginRegistry::from_discovery(Vec::new()).expect("registry");
    assert!(registry.backend("dimod-cqm-v1").is_some());
    assert!(registry.runtime("local-exact").is_some());

    let duplicate = PluginBundle {
        backends: vec![Box::new(CqmBackendPlugin)],
        runtimes: Vec::new(),
    };
    let err = PluginRegistry::from_discovery(vec![duplicate]).expect_err("duplicate id");
    assert_eq!(err.code, "QSOL4009");
}

#[test]
fn selection_prefers_cli_over_scenario_over_entrypoint() {
    let inputs = SelectionInputs {
        cli_runtime: Some("cli-runtime".to_string()),
        scenario_runtime: Some("scenario-runtime".to_string()),
        entrypoint_runtime: Some("entry-runtime".to_string()),
        ..SelectionInputs::default()
    };
    let resolution = resolve_target_selection(&inputs);
    let selection = resolution.selection.expect("selection");
    assert_eq!(selection.runtime_id, "cli-runtime");
    assert_eq!(selection.backend_id, DEFAULT_BACKEND_ID);

    let inputs = SelectionInputs {
        scenario_runtime: Some("scenario-runtime".to_string()),
        entrypoint_runtime: Some("entry-runtime".to_string()),
        ..SelectionInputs::default()
    };
    let resolution = resolve_target_selection(&inputs);
    assert_eq!(
        resolution.selection.expect("selection").runtime_id,
        "scenario-runtime"
    );
}

#[test]
fn missing_runtime_is_unresolved() {
    let resolution = resolve_target_selection(&SelectionInputs::default());
    assert!(resolution.selection.is_none());
    assert_eq!(resolution.issues[0].code, "QSOL4006");
}

#[test]
fn ranking_filters_infeasible_and_orders_deterministically() {
    let mut model = model_with_varmap(&[("x.has[a]", "x.has(a)"), ("x.has[b]", "x.has(b)")]);
    // x.has[a] must be 1.
    model.cqm.add_constraint(
        crate::backend::Poly::var("x.has[a]"),
        crate::backend::Sense::Eq,
        1.0,
        "c".to_string(),
    );

    let samples = vec![
        RawSample {
            sample: sample(&[("x.has[a]", 0), ("x.has[b]", 1)]),
            energy: -5.0,
            num_occurrences: 1,
        },
        RawSample {
            sample: sample(&[("x.has[a]", 1), ("x.has[b]", 1)]),
            energy: 2.0,
            num_occurrences: 1,
        },
        RawSample {
            sample: sample(&[("x.has[a]", 1), ("x.has[b]", 0)]),
            energy: 1.0,
            num_occurrences: 3,
        },
    ];
    let ranked = collect_ranked_solutions(&samples, &model, 10);
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].energy, 1.0);
    assert_eq!(ranked[0].rank, 1);
    assert_eq!(ranked[1].energy, 2.0);
}

#[test]
fn ranking_dedupes_on_primary_projection() {
    let model = model_with_varmap(&[("x.has[a]", "x.has(a)")]);
    let samples = vec![
        RawSample {
            sample: sample(&[("x.has[a]", 1), ("aux:0", 1)]),
            energy: 3.0,
            num_occurrences: 1,
        },
        RawSample {
            sample: sample(&[("x.has[a]", 1), ("aux:0", 0)]),
            energy: 1.0,
            num_occurrences: 1,
        },
    ];
    let ranked = collect_ranked_solutions(&samples, &model, 10);
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].energy, 1.0);
    assert_eq!(ranked[0].num_occurrences, 2);
}

#[test]
fn decoded_assignments_exclude_internals_and_zeroes() {
    let model = model_with_varmap(&[("x.has[a]", "x.has(a)"), ("x.has[b]", "x.has(b)")]);
    let selected = selected_assignments_for_sample(
        &sample(&[("x.has[b]", 1), ("x.has[a]", 0), ("aux:3", 1), ("slack_0", 1)]),
        &model.varmap,
    );
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].variable, "x.has[b]");
    assert_eq!(selected[0].meaning, "x.has(b)");
}

#[test]
fn thresholds_are_inclusive() {
    let solution = RankedSolution {
        rank: 1,
        energy: 2.0,
        num_occurrences: 1,
        sample: IndexMap::new(),
        selected_assignments: Vec::new(),
    };
    let (passed, violations) =
        evaluate_energy_thresholds(std::slice::from_ref(&solution), Some(2.0), Some(2.0));
    assert!(passed);
    assert!(violations.is_empty());

    let (passed, violations) =
        evaluate_energy_thresholds(std::slice::from_ref(&solution), None, Some(1.5));
    assert!(!passed);
    assert_eq!(violations.len(), 1);
}

#[test]
fn runtime_option_layers_merge_with_precedence() {
    let mut defaults = IndexMap::new();
    defaults.insert("solutions".to_string(), json!(1));
    defaults.insert("energy_max".to_string(), json!(10.0));
    let mut cli = IndexMap::new();
    cli.insert("solutions".to_string(), json!(3));

    let merged = merge_runtime_options(&[&defaults, &cli]);
    assert_eq!(merged.get("solutions"), Some(&json!(3)));
    assert_eq!(merged.get("energy_max"), Some(&json!(10.0)));
}

#[test]
fn backend_catalog_flags_custom_unknowns_unsupported() {
    let backend = CqmBackendPlugin;
    let issues = backend.check_support(
        &crate::ground::GroundIr {
            problems: Vec::new(),
            span: crate::diagnostics::Span::point("t", 0, 1, 1),
        },
        &["unknown.custom.v1".to_string()],
    );
    assert_eq!(issues.len(), 1);
    assert_eq!(issues[0].code, "QSOL4010");
    assert_eq!(issues[0].capability_id.as_deref(), Some("unknown.custom.v1"));
}

#[test]
fn runtime_rejects_incompatible_backend_pair() {
    let runtime = LocalExactRuntimePlugin;
    let model = model_with_varmap(&[]);
    let issues = runtime.check_support(
        &model,
        &TargetSelection {
            runtime_id: "local-exact".to_string(),
            backend_id: "other-backend".to_string(),
        },
    );
    assert!(issues.iter().any(|issue| issue.code == "QSOL4008"));
}
