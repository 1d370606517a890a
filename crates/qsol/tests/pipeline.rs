use indoc::indoc;
use serde_json::json;

use qsol::{
    run_for_target, run_scenarios, CombineMode, CompilationUnit, CompileOptions, FailurePolicy,
    MultiScenarioOptions, PluginRegistry, ScenarioPayload, ScenarioSpec,
};

fn registry() -> PluginRegistry {
    PluginRegistry::from_discovery(Vec::new()).expect("registry")
}

fn options_for(scenario: serde_json::Value) -> CompileOptions {
    let mut options = CompileOptions {
        filename: "model.qsol".to_string(),
        ..CompileOptions::default()
    };
    options.scenario = Some(ScenarioPayload::from_json(&scenario).expect("payload"));
    options.selection.cli_runtime = Some("local-exact".to_string());
    options
}

fn run(src: &str, scenario: serde_json::Value) -> CompilationUnit {
    run_for_target(src, &options_for(scenario), &registry())
}

fn run_ok(src: &str, scenario: serde_json::Value) -> CompilationUnit {
    let unit = run(src, scenario);
    assert!(
        !unit.has_errors(),
        "unexpected diagnostics: {:?}",
        unit.diagnostics
    );
    assert!(unit.run_result.is_some(), "missing run result");
    unit
}

fn selected_meanings(unit: &CompilationUnit) -> Vec<String> {
    unit.run_result
        .as_ref()
        .expect("run result")
        .selected_assignments
        .iter()
        .map(|assignment| assignment.meaning.clone())
        .collect()
}

// --- positive seed scenarios -------------------------------------------

const EXACT_K_SUBSET: &str = indoc! {"
    problem P {
      set Items;
      find Pick : Subset(Items);
      must sum(if Pick.has(i) then 1 else 0 for i in Items) = 2;
      minimize sum(if Pick.has(i) then 1 else 0 for i in Items);
    }
"};

#[test]
fn exact_k_subset_selects_exactly_two_items() {
    let unit = run_ok(
        EXACT_K_SUBSET,
        json!({"sets": {"Items": ["i1", "i2", "i3", "i4"]}, "params": {}}),
    );
    let result = unit.run_result.as_ref().expect("run result");
    assert_eq!(result.status, "ok");
    assert_eq!(result.energy, Some(2.0));
    assert_eq!(selected_meanings(&unit).len(), 2);
    let model = unit.compiled_model.as_ref().expect("model");
    assert!(model.stats.num_variables >= 4);
    assert_eq!(model.cqm.constraints.len(), 1);
}

#[test]
fn triangle_three_coloring_finds_a_proper_coloring() {
    let unit = run_ok(
        indoc! {"
            problem Coloring {
              set V;
              set C;
              set E;
              param U[E] : Elem(V);
              param W[E] : Elem(V);
              find ColorOf : Mapping(V -> C);
              must forall e in E: forall c in C:
                not (ColorOf.is(U[e], c) and ColorOf.is(W[e], c));
            }
        "},
        json!({
            "sets": {
                "V": ["N1", "N2", "N3"],
                "C": ["Red", "Green", "Blue"],
                "E": ["e1", "e2", "e3"],
            },
            "params": {
                "U": {"e1": "N1", "e2": "N2", "e3": "N3"},
                "W": {"e1": "N2", "e2": "N3", "e3": "N1"},
            },
        }),
    );
    let result = unit.run_result.as_ref().expect("run result");
    assert_eq!(result.energy, Some(0.0));

    let model = unit.compiled_model.as_ref().expect("model");
    let one_hot = model
        .cqm
        .constraints
        .iter()
        .filter(|c| c.label.starts_with("implicit_exactly_one:"))
        .count();
    assert_eq!(one_hot, 3);

    // One color per vertex, no same-color edge.
    let meanings = selected_meanings(&unit);
    assert_eq!(meanings.len(), 3);
    for vertex in ["N1", "N2", "N3"] {
        assert_eq!(
            meanings
                .iter()
                .filter(|m| m.starts_with(&format!("ColorOf.is({vertex},")))
                .count(),
            1
        );
    }
}

#[test]
fn max_cut_on_k3_reaches_cut_value_two() {
    let unit = run_ok(
        indoc! {"
            problem MaxCut {
              set V;
              set E;
              param U[E] : Elem(V);
              param W[E] : Elem(V);
              find S : Subset(V);
              maximize sum(
                if S.has(U[e]) != S.has(W[e]) then 1 else 0
                for e in E);
            }
        "},
        json!({
            "sets": {"V": ["v1", "v2", "v3"], "E": ["e1", "e2", "e3"]},
            "params": {
                "U": {"e1": "v1", "e2": "v2", "e3": "v3"},
                "W": {"e1": "v2", "e2": "v3", "e3": "v1"},
            },
        }),
    );
    let result = unit.run_result.as_ref().expect("run result");
    // Internal representation minimizes the negated cut value.
    assert_eq!(result.energy, Some(-2.0));
}

#[test]
fn knapsack_picks_the_best_value_under_capacity() {
    let unit = run_ok(
        indoc! {"
            problem Knapsack {
              set I;
              param Value[I] : Real;
              param Weight[I] : Real;
              param Capacity : Real;
              find Pick : Subset(I);
              must sum(if Pick.has(i) then Weight[i] else 0 for i in I) <= Capacity;
              maximize sum(if Pick.has(i) then Value[i] else 0 for i in I);
            }
        "},
        json!({
            "sets": {"I": ["i1", "i2", "i3"]},
            "params": {
                "Value": {"i1": 3, "i2": 5, "i3": 4},
                "Weight": {"i1": 2, "i2": 3, "i3": 4},
                "Capacity": 5,
            },
        }),
    );
    let unit_result = unit.run_result.as_ref().expect("run result");
    assert_eq!(unit_result.energy, Some(-8.0));
    let meanings = selected_meanings(&unit);
    assert_eq!(meanings, vec!["Pick.has(i1)", "Pick.has(i2)"]);
}

#[test]
fn min_bisection_on_c4_crosses_two_edges() {
    let unit = run_ok(
        indoc! {"
            problem MinBisection {
              set V;
              set E;
              param U[E] : Elem(V);
              param W[E] : Elem(V);
              find Side : Subset(V);
              must count(v in V where Side.has(v)) * 2 = size(V);
              minimize sum(
                if Side.has(U[e]) != Side.has(W[e]) then 1 else 0
                for e in E);
            }
        "},
        json!({
            "sets": {"V": ["v1", "v2", "v3", "v4"], "E": ["e1", "e2", "e3", "e4"]},
            "params": {
                "U": {"e1": "v1", "e2": "v2", "e3": "v3", "e4": "v4"},
                "W": {"e1": "v2", "e2": "v3", "e3": "v4", "e4": "v1"},
            },
        }),
    );
    let result = unit.run_result.as_ref().expect("run result");
    assert_eq!(result.energy, Some(2.0));
    assert_eq!(selected_meanings(&unit).len(), 2);
}

#[test]
fn exactly_macro_from_stdlib_counts_selected_items() {
    let unit = run_ok(
        indoc! {"
            use stdlib.counting;

            problem P {
              set Items;
              find Pick : Subset(Items);
              must exactly(2, Pick.has(i) for i in Items);
              minimize sum(if Pick.has(i) then 1 else 0 for i in Items);
            }
        "},
        json!({"sets": {"Items": ["i1", "i2", "i3"]}, "params": {}}),
    );
    let meanings = selected_meanings(&unit);
    assert_eq!(meanings.len(), 2);
    assert!(meanings.iter().all(|m| m.starts_with("Pick.has(")));
}

#[test]
fn permutation_unknown_from_stdlib_is_bijective() {
    let unit = run_ok(
        indoc! {"
            use stdlib.permutation;

            problem P {
              set A;
              find Order : Permutation(A);
              must true;
            }
        "},
        json!({"sets": {"A": ["a1", "a2", "a3"]}, "params": {}}),
    );
    let meanings = selected_meanings(&unit);
    assert_eq!(meanings.len(), 3);
    // Each source and each target appears exactly once.
    for elem in ["a1", "a2", "a3"] {
        assert_eq!(
            meanings
                .iter()
                .filter(|m| m.contains(&format!("({elem},")))
                .count(),
            1
        );
        assert_eq!(
            meanings
                .iter()
                .filter(|m| m.ends_with(&format!(",{elem})")))
                .count(),
            1
        );
    }
}

// --- determinism and post-processing -----------------------------------

#[test]
fn identical_inputs_produce_identical_ranked_output() {
    let scenario = json!({"sets": {"Items": ["i1", "i2", "i3", "i4"]}, "params": {}});
    let mut first = options_for(scenario.clone());
    first
        .runtime_options
        .insert("solutions".to_string(), json!(3));
    let mut second = options_for(scenario);
    second
        .runtime_options
        .insert("solutions".to_string(), json!(3));

    let registry = registry();
    let a = run_for_target(EXACT_K_SUBSET, &first, &registry);
    let b = run_for_target(EXACT_K_SUBSET, &second, &registry);
    let a = a.run_result.expect("first result");
    let b = b.run_result.expect("second result");
    assert_eq!(
        serde_json::to_value(&a.extensions["solutions"]).expect("json"),
        serde_json::to_value(&b.extensions["solutions"]).expect("json"),
    );
}

#[test]
fn threshold_violations_fail_the_run() {
    let mut options = options_for(json!({"sets": {"Items": ["i1", "i2", "i3"]}, "params": {}}));
    options
        .runtime_options
        .insert("energy_max".to_string(), json!(1.0));
    let unit = run_for_target(EXACT_K_SUBSET, &options, &registry());
    let result = unit.run_result.expect("run result");
    assert_eq!(result.status, "threshold_failed");
}

#[test]
fn artifacts_are_written_to_the_output_directory() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut options = options_for(json!({"sets": {"Items": ["i1", "i2"]}, "params": {}}));
    options.outdir = Some(tmp.path().to_path_buf());
    let unit = run_for_target(EXACT_K_SUBSET, &options, &registry());
    assert!(!unit.has_errors(), "{:?}", unit.diagnostics);

    for name in ["model.cqm", "model.bqm", "qubo.json", "varmap.json", "explain.json"] {
        assert!(tmp.path().join(name).is_file(), "missing artifact {name}");
    }
    let varmap: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(tmp.path().join("varmap.json")).unwrap())
            .unwrap();
    assert_eq!(varmap["Pick.has[i1]"], json!("Pick.has(i1)"));
}

// --- multi-scenario execution ------------------------------------------

#[test]
fn multi_scenario_union_keeps_solutions_from_every_scenario() {
    let scenarios = vec![
        ScenarioSpec {
            name: "small".to_string(),
            payload: ScenarioPayload::from_json(
                &json!({"sets": {"Items": ["i1", "i2", "i3"]}, "params": {}}),
            )
            .expect("payload"),
            runtime_options: Default::default(),
        },
        ScenarioSpec {
            name: "large".to_string(),
            payload: ScenarioPayload::from_json(
                &json!({"sets": {"Items": ["i1", "i2", "i3", "i4"]}, "params": {}}),
            )
            .expect("payload"),
            runtime_options: Default::default(),
        },
    ];
    let mut base = options_for(json!({"sets": {}, "params": {}}));
    base.scenario = None;
    let multi = MultiScenarioOptions {
        combine_mode: CombineMode::Union,
        failure_policy: FailurePolicy::RunAllFail,
        max_workers: 2,
        requested_solutions: 4,
    };
    let result = run_scenarios(EXACT_K_SUBSET, &scenarios, &base, &multi, &registry());
    assert!(result.ok);
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.outcomes[0].scenario, "small");
    assert_eq!(result.merged.status, "ok");
    assert!(!result.merged.extensions["solutions"]
        .as_array()
        .expect("solutions")
        .is_empty());
}

#[test]
fn multi_scenario_failure_policy_controls_overall_status() {
    let scenarios = vec![ScenarioSpec {
        name: "broken".to_string(),
        payload: ScenarioPayload::from_json(&json!({"sets": {}, "params": {}}))
            .expect("payload"),
        runtime_options: Default::default(),
    }];
    let mut base = options_for(json!({"sets": {}, "params": {}}));
    base.scenario = None;
    let multi = MultiScenarioOptions::default();
    let result = run_scenarios(EXACT_K_SUBSET, &scenarios, &base, &multi, &registry());
    assert!(!result.ok);
    assert_eq!(result.merged.status, "scenario_failed");
}

// --- negative seeds -----------------------------------------------------

fn diagnostics_codes(unit: &CompilationUnit) -> Vec<String> {
    unit.diagnostics.iter().map(|d| d.code.clone()).collect()
}

#[test]
fn missing_semicolon_is_a_parse_error() {
    let unit = run(
        "problem P { set A find S : Subset(A); }",
        json!({"sets": {"A": []}, "params": {}}),
    );
    assert!(diagnostics_codes(&unit).contains(&"QSOL1001".to_string()));
}

#[test]
fn paren_read_of_indexed_param_is_rejected() {
    let unit = run(
        indoc! {"
            problem P {
              set A;
              param Cost[A, A] : Real;
              find S : Subset(A);
              must forall i in A: forall j in A: Cost(i, j) >= 0;
            }
        "},
        json!({"sets": {"A": ["a"]}, "params": {"Cost": {"a": {"a": 1}}}}),
    );
    assert!(diagnostics_codes(&unit).contains(&"QSOL2101".to_string()));
}

#[test]
fn has_arity_error_is_rejected() {
    let unit = run(
        indoc! {"
            problem P {
              set A;
              find Pick : Subset(A);
              must forall x in A: Pick.has(x, x);
            }
        "},
        json!({"sets": {"A": ["a"]}, "params": {}}),
    );
    assert!(diagnostics_codes(&unit).contains(&"QSOL2101".to_string()));
}

#[test]
fn scenario_missing_declared_set_is_rejected() {
    let unit = run(
        "problem P { set V; find S : Subset(V); must true; }",
        json!({"sets": {}, "params": {}}),
    );
    assert!(diagnostics_codes(&unit).contains(&"QSOL2201".to_string()));
}

#[test]
fn cyclic_unknown_definitions_are_rejected() {
    let unit = run(
        indoc! {"
            unknown A_(X) {
              rep { b : B_(X); }
              laws { must true; }
              view { predicate on(x in X) = b.on(x); }
            }
            unknown B_(X) {
              rep { a : A_(X); }
              laws { must true; }
              view { predicate on(x in X) = a.on(x); }
            }
            problem P {
              set S;
              find F : A_(S);
              must true;
            }
        "},
        json!({"sets": {"S": ["s1"]}, "params": {}}),
    );
    assert!(diagnostics_codes(&unit).contains(&"QSOL2101".to_string()));
}

#[test]
fn cubic_objective_is_unsupported_in_the_backend() {
    let unit = run(
        indoc! {"
            problem P {
              set A;
              find S : Subset(A);
              find T : Subset(A);
              find U : Subset(A);
              minimize sum(
                (if S.has(x) then 1 else 0)
                  * (if T.has(x) then 1 else 0)
                  * (if U.has(x) then 1 else 0)
                for x in A);
            }
        "},
        json!({"sets": {"A": ["a1"]}, "params": {}}),
    );
    assert!(diagnostics_codes(&unit).contains(&"QSOL3001".to_string()));
}

#[test]
fn unknown_runtime_id_is_reported() {
    let mut options = options_for(json!({"sets": {"Items": ["i1"]}, "params": {}}));
    options.selection.cli_runtime = Some("no-such-runtime".to_string());
    let unit = run_for_target(EXACT_K_SUBSET, &options, &registry());
    assert!(diagnostics_codes(&unit).contains(&"QSOL4007".to_string()));
}

#[test]
fn unresolved_runtime_is_reported() {
    let mut options = options_for(json!({"sets": {"Items": ["i1"]}, "params": {}}));
    options.selection.cli_runtime = None;
    let unit = run_for_target(EXACT_K_SUBSET, &options, &registry());
    assert!(diagnostics_codes(&unit).contains(&"QSOL4006".to_string()));
}
