use indoc::indoc;

use crate::kernel::{lower_symbolic, KCompareOp, KExpr, KUnknownKind, KernelIr, WeightKind};
use crate::surface::{desugar_program, parse_program};

fn lower(src: &str) -> KernelIr {
    let program = parse_program(src, "test.qsol").expect("parse");
    let desugared = desugar_program(program);
    lower_symbolic(&desugared).expect("lowering")
}

#[test]
fn lowers_sets_params_finds_and_constraints() {
    let kernel = lower(indoc! {"
        problem P {
          set Items;
          param Value[Items] : Real = 1;
          find Pick : Subset(Items);
          must sum(if Pick.has(i) then Value[i] else 0 for i in Items) <= 5;
        }
    "});
    let problem = &kernel.problems[0];
    assert_eq!(problem.name, "P");
    assert_eq!(problem.sets.len(), 1);
    assert_eq!(problem.params.len(), 1);
    assert!(matches!(
        problem.finds[0].unknown,
        KUnknownKind::Subset { .. }
    ));
    assert_eq!(problem.constraints.len(), 1);
    assert_eq!(problem.constraints[0].weight, WeightKind::Hard);
}

#[test]
fn canonicalizes_maximize_into_negated_minimize() {
    let kernel = lower(indoc! {"
        problem P {
          set A;
          find S : Subset(A);
          maximize sum(if S.has(x) then 1 else 0 for x in A);
        }
    "});
    let objective = kernel.problems[0].objective.as_ref().expect("objective");
    assert!(matches!(objective.expr, KExpr::Neg { .. }));
}

#[test]
fn canonicalizes_reversed_comparisons() {
    let kernel = lower(indoc! {"
        problem P {
          set A;
          param Limit : Real;
          must Limit > 3;
          must Limit >= 4;
        }
    "});
    let constraints = &kernel.problems[0].constraints;
    // `a > b` became `b < a`, `a >= b` became `b <= a`.
    let KExpr::Compare { op, left, .. } = &constraints[0].expr else {
        panic!("expected comparison");
    };
    assert_eq!(*op, KCompareOp::Lt);
    assert!(matches!(left.as_ref(), KExpr::NumLit { value, .. } if *value == 3.0));
    let KExpr::Compare { op, .. } = &constraints[1].expr else {
        panic!("expected comparison");
    };
    assert_eq!(*op, KCompareOp::Le);
}

#[test]
fn weights_follow_constraint_kinds() {
    let kernel = lower(indoc! {"
        problem P {
          set A;
          find S : Subset(A);
          must true;
          should forall x in A: S.has(x);
          nice exists x in A: S.has(x);
        }
    "});
    let weights: Vec<WeightKind> = kernel.problems[0]
        .constraints
        .iter()
        .map(|c| c.weight)
        .collect();
    assert_eq!(
        weights,
        vec![WeightKind::Hard, WeightKind::Should, WeightKind::Nice]
    );
}

#[test]
fn lowering_is_idempotent_on_its_output_shapes() {
    let src = indoc! {"
        problem P {
          set A;
          find S : Subset(A);
          must count(x in A where S.has(x)) * 2 = size(A);
          minimize sum(if S.has(x) then 1 else 0 for x in A);
        }
    "};
    let program = parse_program(src, "test.qsol").expect("parse");
    let once = desugar_program(program);
    let kernel_a = lower_symbolic(&once).expect("lowering");
    let kernel_b = lower_symbolic(&desugar_program(once.clone())).expect("lowering");
    assert_eq!(format!("{kernel_a:?}"), format!("{kernel_b:?}"));
}

#[test]
fn size_call_lowers_to_size_of() {
    let kernel = lower("problem P { set A; must size(A) = 3; }");
    let KExpr::Compare { left, .. } = &kernel.problems[0].constraints[0].expr else {
        panic!("expected comparison");
    };
    assert!(matches!(left.as_ref(), KExpr::SizeOf { set, .. } if set == "A"));
}
