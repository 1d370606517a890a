use indoc::indoc;

use crate::diagnostics::Diagnostic;
use crate::elaborate::elaborate_unknowns;
use crate::sema::{check_program, resolve_program, validate_program};
use crate::surface::parse_program;

fn sema_diagnostics(src: &str) -> Vec<Diagnostic> {
    let program = parse_program(src, "test.qsol").expect("parse");
    let elaborated = elaborate_unknowns(program);
    let mut diagnostics = elaborated.diagnostics;
    let resolution = resolve_program(&elaborated.program);
    diagnostics.extend(resolution.diagnostics);
    let typecheck = check_program(&elaborated.program, &resolution.symbols);
    diagnostics.extend(typecheck.diagnostics);
    diagnostics.extend(validate_program(&elaborated.program));
    diagnostics
}

fn codes(diagnostics: &[Diagnostic]) -> Vec<&str> {
    diagnostics.iter().map(|d| d.code.as_str()).collect()
}

#[test]
fn accepts_well_typed_problem() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set Items;
          param Value[Items] : Real;
          param Capacity : Real;
          find Pick : Subset(Items);
          must sum(if Pick.has(i) then Value[i] else 0 for i in Items) <= Capacity;
          maximize sum(if Pick.has(i) then Value[i] else 0 for i in Items);
        }
    "});
    assert!(
        !diagnostics.iter().any(Diagnostic::is_error),
        "unexpected: {diagnostics:?}"
    );
}

#[test]
fn reports_unknown_identifier_with_suggestion() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set Items;
          find Pick : Subset(Items);
          must Pick.has(itemz);
        }
    "});
    let diag = diagnostics
        .iter()
        .find(|d| d.code == "QSOL2001")
        .expect("unknown identifier diagnostic");
    assert!(diag.message.contains("itemz"));
}

#[test]
fn reports_duplicate_declaration() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          set A;
          must true;
        }
    "});
    assert!(codes(&diagnostics).contains(&"QSOL2002"));
}

#[test]
fn rejects_paren_call_on_indexed_param() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          param Cost[A, A] : Real;
          find S : Subset(A);
          must forall i in A: forall j in A: Cost(i, j) >= 0;
        }
    "});
    let diag = diagnostics
        .iter()
        .find(|d| d.code == "QSOL2101")
        .expect("indexed param misuse");
    assert!(diag.message.contains("brackets"));
}

#[test]
fn rejects_scalar_param_called_with_brackets() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          param Limit : Real;
          must Limit[3] >= 0;
        }
    "});
    let diag = diagnostics
        .iter()
        .find(|d| d.code == "QSOL2101")
        .expect("scalar param misuse");
    assert!(diag.message.contains("bare name"));
}

#[test]
fn rejects_has_arity_mismatch() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          find Pick : Subset(A);
          must forall x in A: Pick.has(x, x);
        }
    "});
    assert!(diagnostics
        .iter()
        .any(|d| d.code == "QSOL2101" && d.message.contains("one argument")));
}

#[test]
fn rejects_elem_param_default() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          param Root : Elem(A) = \"a1\";
          must true;
        }
    "});
    assert!(diagnostics
        .iter()
        .any(|d| d.code == "QSOL2101" && d.message.contains("defaults")));
}

#[test]
fn rejects_second_objective() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          find S : Subset(A);
          minimize sum(1 for x in A);
          maximize sum(1 for x in A);
        }
    "});
    assert!(diagnostics
        .iter()
        .any(|d| d.code == "QSOL2101" && d.message.contains("objective")));
}

#[test]
fn rejects_size_of_non_set() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          param Limit : Real;
          must size(Limit) >= 0;
        }
    "});
    assert!(diagnostics
        .iter()
        .any(|d| d.code == "QSOL2101" && d.message.contains("size()")));
}

#[test]
fn rejects_count_binder_mismatch() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          find S : Subset(A);
          must count(x for y in A) = 1;
        }
    "});
    assert!(diagnostics
        .iter()
        .any(|d| d.code == "QSOL2101" && d.message.contains("count binder")));
}

#[test]
fn rejects_boolean_operands_in_arithmetic() {
    let diagnostics = sema_diagnostics(indoc! {"
        problem P {
          set A;
          must true + 1 = 2;
        }
    "});
    assert!(diagnostics
        .iter()
        .any(|d| d.code == "QSOL2101" && d.message.contains("arithmetic")));
}

#[test]
fn laws_reject_soft_constraints() {
    let diagnostics = sema_diagnostics(indoc! {"
        unknown Weird(A) {
          rep { s : Subset(A); }
          laws { should true; }
          view { predicate on(x in A) = s.has(x); }
        }
        problem P {
          set A;
          find W : Weird(A);
          must true;
        }
    "});
    assert!(diagnostics
        .iter()
        .any(|d| d.code == "QSOL2101" && d.message.contains("laws block")));
}

#[test]
fn cyclic_unknown_definitions_are_reported() {
    let diagnostics = sema_diagnostics(indoc! {"
        unknown Outer(A) {
          rep { inner : Outer(A); }
          laws { must true; }
          view { predicate on(x in A) = inner.on(x); }
        }
        problem P {
          set A;
          find X : Outer(A);
          must true;
        }
    "});
    assert!(diagnostics
        .iter()
        .any(|d| d.code == "QSOL2101" && d.message.contains("recursive unknown")));
}

#[test]
fn elaboration_expands_custom_unknown_into_primitives() {
    let program = parse_program(
        indoc! {"
            unknown Partition(A) {
              rep { left : Subset(A); }
              laws { must true; }
              view { predicate on_left(x in A) = left.has(x); }
            }
            problem P {
              set A;
              find Cut : Partition(A);
              must forall x in A: Cut.on_left(x) or not Cut.on_left(x);
            }
        "},
        "test.qsol",
    )
    .expect("parse");
    let result = elaborate_unknowns(program);
    assert!(
        !result.diagnostics.iter().any(Diagnostic::is_error),
        "unexpected: {:?}",
        result.diagnostics
    );
    let problem = result
        .program
        .items
        .iter()
        .find_map(|item| match item {
            crate::surface::TopItem::Problem(problem) => Some(problem),
            _ => None,
        })
        .expect("problem");
    let finds: Vec<&str> = problem
        .stmts
        .iter()
        .filter_map(|stmt| match stmt {
            crate::surface::ProblemStmt::Find(find) => Some(find.name.name.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(finds, vec!["__qsol_u__Cut__left"]);
}
