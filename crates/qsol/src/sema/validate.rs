use crate::diagnostics::Diagnostic;
use crate::surface::*;

/// Cross-cutting checks that do not need type information.
pub fn validate_program(program: &Program) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    for item in &program.items {
        match item {
            TopItem::Unknown(def) => {
                if def.rep.is_empty() {
                    diagnostics.push(
                        Diagnostic::warning(
                            "QSOL3001",
                            format!("unknown `{}` has empty rep block", def.name.name),
                            def.span.clone(),
                        )
                        .with_help("Add at least one representative declaration in `rep { ... }`.")
                        .with_help(
                            "Empty representations are accepted but usually indicate incomplete \
                             modeling.",
                        ),
                    );
                }
                for law in &def.laws {
                    if law.kind != ConstraintKind::Must {
                        diagnostics.push(
                            Diagnostic::error(
                                "QSOL2101",
                                "laws block accepts only `must` constraints",
                                law.span.clone(),
                            )
                            .with_help(
                                "Replace `should`/`nice` with `must` inside `laws { ... }` blocks.",
                            ),
                        );
                    }
                }
            }
            TopItem::Problem(problem) => {
                let objectives: Vec<&Objective> = problem
                    .stmts
                    .iter()
                    .filter_map(|stmt| match stmt {
                        ProblemStmt::Objective(objective) => Some(objective),
                        _ => None,
                    })
                    .collect();
                for extra in objectives.iter().skip(1) {
                    diagnostics.push(
                        Diagnostic::error(
                            "QSOL2101",
                            format!(
                                "problem `{}` declares more than one objective",
                                problem.name.name
                            ),
                            extra.span.clone(),
                        )
                        .with_help("Keep at most one `minimize`/`maximize` per problem."),
                    );
                }
            }
            _ => {}
        }
    }
    diagnostics
}
