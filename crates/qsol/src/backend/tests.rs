use indexmap::IndexMap;
use indoc::indoc;
use serde_json::json;

use crate::backend::{compile_ground, is_internal_variable, CodegenResult, Sense};
use crate::ground::{ground_ir, ScenarioPayload};
use crate::kernel::lower_symbolic;
use crate::surface::{desugar_program, parse_program};

fn compile(src: &str, scenario: serde_json::Value) -> CodegenResult {
    let program = parse_program(src, "test.qsol").expect("parse");
    let desugared = desugar_program(program);
    let kernel = lower_symbolic(&desugared).expect("lowering");
    let payload = ScenarioPayload::from_json(&scenario).expect("payload");
    let grounding = ground_ir(&kernel, &payload, None);
    assert!(
        grounding.diagnostics.is_empty(),
        "grounding diagnostics: {:?}",
        grounding.diagnostics
    );
    compile_ground(&grounding.ground.expect("ground ir"))
}

fn all_assignments(labels: &[String]) -> Vec<IndexMap<String, u8>> {
    let mut out = Vec::new();
    for word in 0..(1u64 << labels.len()) {
        out.push(
            labels
                .iter()
                .enumerate()
                .map(|(bit, label)| (label.clone(), ((word >> bit) & 1) as u8))
                .collect(),
        );
    }
    out
}

const EXACT_K_SUBSET: &str = indoc! {"
    problem P {
      set Items;
      find Pick : Subset(Items);
      must sum(if Pick.has(i) then 1 else 0 for i in Items) = 2;
      minimize sum(if Pick.has(i) then 1 else 0 for i in Items);
    }
"};

fn exact_k_scenario() -> serde_json::Value {
    json!({"sets": {"Items": ["i1", "i2", "i3", "i4"]}, "params": {}})
}

#[test]
fn exact_k_subset_emits_one_user_equality_and_no_structural_laws() {
    let result = compile(EXACT_K_SUBSET, exact_k_scenario());
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    assert_eq!(result.cqm.constraints.len(), 1);
    assert_eq!(result.cqm.constraints[0].sense, Sense::Eq);
    assert_eq!(result.cqm.constraints[0].rhs, 2.0);
    assert!(result.stats.num_variables >= 4);
}

#[test]
fn varmap_contains_every_primary_and_no_internals() {
    let result = compile(EXACT_K_SUBSET, exact_k_scenario());
    for label in &result.cqm.variables {
        if is_internal_variable(label) {
            assert!(!result.varmap.contains_key(label));
        } else {
            assert_eq!(
                result.varmap.get(label),
                Some(&label.replace(".has[", ".has(").replace(']', ")"))
            );
        }
    }
}

#[test]
fn mapping_one_hot_laws_are_structural() {
    let result = compile(
        indoc! {"
            problem P {
              set V;
              set C;
              find ColorOf : Mapping(V -> C);
              must true;
            }
        "},
        json!({"sets": {"V": ["N1", "N2", "N3"], "C": ["Red", "Green", "Blue"]}, "params": {}}),
    );
    let one_hot: Vec<_> = result
        .cqm
        .constraints
        .iter()
        .filter(|c| c.label.starts_with("implicit_exactly_one:"))
        .collect();
    assert_eq!(one_hot.len(), 3);
    for constraint in one_hot {
        assert_eq!(constraint.sense, Sense::Eq);
        assert_eq!(constraint.rhs, 1.0);
        assert_eq!(constraint.lhs.linear.len(), 3);
    }
}

#[test]
fn bqm_minimum_with_zero_penalty_is_cqm_feasible() {
    let result = compile(EXACT_K_SUBSET, exact_k_scenario());
    let bqm = result.bqm.as_ref().expect("bqm");
    let labels: Vec<String> = bqm.variables.iter().cloned().collect();

    let mut best_energy = f64::INFINITY;
    let mut best_sample = None;
    for sample in all_assignments(&labels) {
        let energy = bqm.energy(&sample);
        if energy < best_energy {
            best_energy = energy;
            best_sample = Some(sample);
        }
    }
    let best = best_sample.expect("assignments");
    assert!(result.cqm.is_feasible(&best), "bqm minimum is infeasible");
    // Two of four picks selected; objective value 2.
    assert!((result.cqm.objective.evaluate(&best) - 2.0).abs() < 1e-6);
}

#[test]
fn soft_constraints_contribute_weighted_penalties() {
    let result = compile(
        indoc! {"
            problem P {
              set A;
              find S : Subset(A);
              should forall x in A: S.has(x);
              nice exists x in A: S.has(x);
            }
        "},
        json!({"sets": {"A": ["a1", "a2"]}, "params": {}}),
    );
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    // An empty selection violates both instances of the `should` (10
    // each) and the `nice` (1).
    let empty: IndexMap<String, u8> = IndexMap::new();
    let energy = result.cqm.objective.evaluate(&empty);
    assert!((energy - 21.0).abs() < 1e-6, "got {energy}");
    // Full selection satisfies everything.
    let full: IndexMap<String, u8> = result
        .cqm
        .variables
        .iter()
        .map(|label| (label.clone(), 1u8))
        .collect();
    assert!(result.cqm.objective.evaluate(&full).abs() < 1e-6);
}

#[test]
fn negated_conjunction_of_atoms_is_a_linear_constraint() {
    let result = compile(
        indoc! {"
            problem P {
              set A;
              find S : Subset(A);
              find T : Subset(A);
              must forall x in A: not (S.has(x) and T.has(x));
            }
        "},
        json!({"sets": {"A": ["a1"]}, "params": {}}),
    );
    assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    let user: Vec<_> = result
        .cqm
        .constraints
        .iter()
        .filter(|c| c.label.starts_with("c:"))
        .collect();
    assert_eq!(user.len(), 1);
    assert_eq!(user[0].sense, Sense::Le);
    assert_eq!(user[0].rhs, 1.0);
    assert!(user[0].lhs.is_affine());
    // No aux variables were needed.
    assert!(result.cqm.variables.iter().all(|v| !v.starts_with("aux:")));
}

#[test]
fn cubic_objective_reports_unsupported_shape() {
    let result = compile(
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
    assert!(result
        .diagnostics
        .iter()
        .any(|d| d.code == "QSOL3001"));
    assert!(result.bqm.is_none());
}

#[test]
fn inequality_conversion_introduces_slack_binaries() {
    let result = compile(
        indoc! {"
            problem P {
              set A;
              find S : Subset(A);
              must sum(if S.has(x) then 1 else 0 for x in A) <= 2;
            }
        "},
        json!({"sets": {"A": ["a1", "a2", "a3", "a4"]}, "params": {}}),
    );
    let bqm = result.bqm.as_ref().expect("bqm");
    assert!(bqm.variables.iter().any(|v| v.starts_with("slack_")));
    // A sample within the bound reaches zero penalty with the right slack.
    let mut sample: IndexMap<String, u8> = bqm
        .variables
        .iter()
        .map(|label| (label.clone(), 0u8))
        .collect();
    sample.insert("S.has[a1]".to_string(), 1);
    sample.insert("S.has[a2]".to_string(), 1);
    assert!(result.cqm.is_feasible(&sample));
}
