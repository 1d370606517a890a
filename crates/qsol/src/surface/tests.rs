use indoc::indoc;

use crate::surface::*;

fn parse_ok(src: &str) -> Program {
    match parse_program(src, "test.qsol") {
        Ok(program) => program,
        Err(diags) => panic!("unexpected parse failure: {diags:?}"),
    }
}

fn only_problem(program: &Program) -> &ProblemDef {
    program
        .items
        .iter()
        .find_map(|item| match item {
            TopItem::Problem(problem) => Some(problem),
            _ => None,
        })
        .expect("problem item")
}

#[test]
fn parses_minimal_problem() {
    let program = parse_ok(indoc! {"
        problem P {
          set A;
          find S : Subset(A);
          must forall x in A: S.has(x) or not S.has(x);
          minimize sum( if S.has(x) then 1 else 0 for x in A );
        }
    "});
    let problem = only_problem(&program);
    assert_eq!(problem.name.name, "P");
    assert_eq!(problem.stmts.len(), 4);
}

#[test]
fn missing_separator_is_a_parse_error() {
    let err = parse_program("problem P { set A find S : Subset(A); }", "bad.qsol")
        .expect_err("expected parse failure");
    assert_eq!(err[0].code, "QSOL1001");
}

#[test]
fn parses_mapping_find_and_indexed_params() {
    let program = parse_ok(indoc! {"
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
    "});
    let problem = only_problem(&program);
    let find = problem
        .stmts
        .iter()
        .find_map(|stmt| match stmt {
            ProblemStmt::Find(find) => Some(find),
            _ => None,
        })
        .expect("find decl");
    assert_eq!(find.unknown_type.kind, "Mapping");
    assert_eq!(find.unknown_type.args, vec!["V", "C"]);
}

#[test]
fn parses_guarded_constraint_and_objective() {
    let program = parse_ok(indoc! {"
        problem P {
          set A;
          param Limit : Real = 3;
          find S : Subset(A);
          must count(x in A where S.has(x)) <= Limit if Limit > 0;
          maximize sum(1 for x in A where S.has(x));
        }
    "});
    let problem = only_problem(&program);
    let constraint = problem
        .stmts
        .iter()
        .find_map(|stmt| match stmt {
            ProblemStmt::Constraint(constraint) => Some(constraint),
            _ => None,
        })
        .expect("constraint");
    assert!(constraint.guard.is_some());
}

#[test]
fn parses_unknown_def_with_rep_laws_view() {
    let program = parse_ok(indoc! {"
        unknown Partition(A) {
          rep { left : Subset(A); }
          laws { must true; }
          view { predicate on_left(x in A) = left.has(x); }
        }
        problem P {
          set A;
          find Cut : Partition(A);
          must true;
        }
    "});
    let unknown = program
        .items
        .iter()
        .find_map(|item| match item {
            TopItem::Unknown(def) => Some(def),
            _ => None,
        })
        .expect("unknown def");
    assert_eq!(unknown.formals.len(), 1);
    assert_eq!(unknown.rep.len(), 1);
    assert_eq!(unknown.laws.len(), 1);
    assert_eq!(unknown.view.len(), 1);
}

#[test]
fn parses_comprehension_call_argument() {
    let program = parse_ok(indoc! {"
        predicate exactly(k : Real, xs : Comp(Bool)) = sum(xs) = k;
        problem P {
          set Items;
          find Pick : Subset(Items);
          must exactly(2, Pick.has(i) for i in Items);
        }
    "});
    let problem = only_problem(&program);
    let constraint = problem
        .stmts
        .iter()
        .find_map(|stmt| match stmt {
            ProblemStmt::Constraint(constraint) => Some(constraint),
            _ => None,
        })
        .expect("constraint");
    let Expr::Call { name, args, .. } = &constraint.expr else {
        panic!("expected macro call");
    };
    assert_eq!(name.name, "exactly");
    assert!(matches!(
        args[1],
        Expr::Aggregate {
            from_comp_arg: true,
            ..
        }
    ));
}

#[test]
fn operator_precedence_binds_arithmetic_before_comparisons() {
    let program = parse_ok("problem P { set A; must 1 + 2 * 3 = 7; }");
    let problem = only_problem(&program);
    let ProblemStmt::Constraint(constraint) = &problem.stmts[1] else {
        panic!("expected constraint");
    };
    let Expr::Compare { op, left, .. } = &constraint.expr else {
        panic!("expected comparison");
    };
    assert_eq!(*op, CompareOp::Eq);
    assert!(matches!(
        left.as_ref(),
        Expr::Binary {
            op: BinaryOp::Add,
            ..
        }
    ));
}

// --- desugaring --------------------------------------------------------

fn desugared_constraint(src: &str) -> Constraint {
    let program = desugar_program(parse_ok(src));
    let problem = only_problem(&program).clone();
    problem
        .stmts
        .into_iter()
        .find_map(|stmt| match stmt {
            ProblemStmt::Constraint(constraint) => Some(constraint),
            _ => None,
        })
        .expect("constraint")
}

#[test]
fn desugars_guard_into_implication() {
    let constraint = desugared_constraint(
        "problem P { set A; find S : Subset(A); must true if false; }",
    );
    assert!(constraint.guard.is_none());
    assert!(matches!(
        constraint.expr,
        Expr::Binary {
            op: BinaryOp::Implies,
            ..
        }
    ));
}

#[test]
fn desugars_count_into_sum_of_conditionals() {
    let constraint = desugared_constraint(
        "problem P { set A; find S : Subset(A); must count(x in A where S.has(x)) = 2; }",
    );
    let Expr::Compare { left, .. } = constraint.expr else {
        panic!("expected comparison");
    };
    let Expr::Aggregate { kind, comp, .. } = *left else {
        panic!("expected aggregate");
    };
    assert_eq!(kind, AggKind::Sum);
    assert!(comp.where_clause.is_none());
    assert!(matches!(*comp.term, Expr::If { .. }));
}

#[test]
fn desugars_any_into_exists() {
    let constraint = desugared_constraint(
        "problem P { set A; find S : Subset(A); must any(S.has(x) for x in A where true); }",
    );
    let Expr::Quantifier { kind, body, .. } = constraint.expr else {
        panic!("expected quantifier");
    };
    assert_eq!(kind, QuantKind::Exists);
    assert!(matches!(
        *body,
        Expr::Binary {
            op: BinaryOp::And,
            ..
        }
    ));
}

#[test]
fn desugars_all_with_filter_into_forall_implication() {
    let constraint = desugared_constraint(
        "problem P { set A; find S : Subset(A); must all(S.has(x) for x in A where true); }",
    );
    let Expr::Quantifier { kind, body, .. } = constraint.expr else {
        panic!("expected quantifier");
    };
    assert_eq!(kind, QuantKind::Forall);
    assert!(matches!(
        *body,
        Expr::Binary {
            op: BinaryOp::Implies,
            ..
        }
    ));
}

#[test]
fn desugar_is_idempotent() {
    let src = indoc! {"
        problem P {
          set A;
          find S : Subset(A);
          must count(x in A where S.has(x)) = 2 if true;
          should any(S.has(x) for x in A);
          minimize sum(1 for x in A where S.has(x) else 0);
        }
    "};
    let once = desugar_program(parse_ok(src));
    let twice = desugar_program(once.clone());
    assert_eq!(format!("{once:?}"), format!("{twice:?}"));
}
