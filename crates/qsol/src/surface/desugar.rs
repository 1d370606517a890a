use crate::diagnostics::Span;
use crate::surface::ast::*;

/// Rewrite surface sugar into kernel-ready forms. Every rule is applied
/// bottom-up at node construction, so a single pass reaches the fixed
/// point and the whole transform is idempotent:
///
/// * `must phi if c`            -> `must (c => phi)`
/// * `count(x in X where c)`    -> `sum(1 for x in X where c)`
/// * `sum(t for x in X where c [else e])`
///                              -> `sum(if c then t else e|0 for x in X)`
/// * `any(...)` / `all(...)`    -> `exists ...` / `forall ...`
pub fn desugar_program(program: Program) -> Program {
    let items = program
        .items
        .into_iter()
        .map(|item| match item {
            TopItem::Problem(problem) => TopItem::Problem(desugar_problem(problem)),
            TopItem::Unknown(unknown) => TopItem::Unknown(desugar_unknown(unknown)),
            TopItem::Predicate(def) => TopItem::Predicate(desugar_macro(def)),
            TopItem::Function(def) => TopItem::Function(desugar_macro(def)),
            other => other,
        })
        .collect();
    Program {
        items,
        span: program.span,
    }
}

fn desugar_problem(problem: ProblemDef) -> ProblemDef {
    let ProblemDef { name, stmts, span } = problem;
    let stmts = stmts
        .into_iter()
        .map(|stmt| match stmt {
            ProblemStmt::Constraint(constraint) => {
                ProblemStmt::Constraint(desugar_constraint(constraint))
            }
            ProblemStmt::Objective(objective) => ProblemStmt::Objective(Objective {
                kind: objective.kind,
                expr: desugar_expr(objective.expr),
                span: objective.span,
            }),
            other => other,
        })
        .collect();
    ProblemDef { name, stmts, span }
}

fn desugar_unknown(unknown: UnknownDef) -> UnknownDef {
    let UnknownDef {
        name,
        formals,
        rep,
        laws,
        view,
        span,
    } = unknown;
    UnknownDef {
        name,
        formals,
        rep,
        laws: laws.into_iter().map(desugar_constraint).collect(),
        view: view.into_iter().map(desugar_macro).collect(),
        span,
    }
}

fn desugar_macro(def: MacroDef) -> MacroDef {
    let MacroDef {
        name,
        formals,
        body,
        is_predicate,
        span,
    } = def;
    MacroDef {
        name,
        formals,
        body: desugar_expr(body),
        is_predicate,
        span,
    }
}

fn desugar_constraint(constraint: Constraint) -> Constraint {
    let expr = desugar_expr(constraint.expr);
    let expr = match constraint.guard {
        Some(guard) => {
            let guard = desugar_expr(guard);
            let span = guard.span().to(expr.span());
            Expr::Binary {
                op: BinaryOp::Implies,
                left: Box::new(guard),
                right: Box::new(expr),
                span,
            }
        }
        None => expr,
    };
    Constraint {
        kind: constraint.kind,
        expr,
        guard: None,
        span: constraint.span,
    }
}

pub fn desugar_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Name(_)
        | Expr::BoolLit { .. }
        | Expr::NumLit { .. }
        | Expr::StrLit { .. }
        | Expr::AggregateRef { .. } => expr,
        Expr::Not { expr, span } => Expr::Not {
            expr: Box::new(desugar_expr(*expr)),
            span,
        },
        Expr::Neg { expr, span } => Expr::Neg {
            expr: Box::new(desugar_expr(*expr)),
            span,
        },
        Expr::Binary {
            op,
            left,
            right,
            span,
        } => Expr::Binary {
            op,
            left: Box::new(desugar_expr(*left)),
            right: Box::new(desugar_expr(*right)),
            span,
        },
        Expr::Compare {
            op,
            left,
            right,
            span,
        } => Expr::Compare {
            op,
            left: Box::new(desugar_expr(*left)),
            right: Box::new(desugar_expr(*right)),
            span,
        },
        Expr::Call {
            name,
            args,
            style,
            span,
        } => Expr::Call {
            name,
            args: args.into_iter().map(desugar_expr).collect(),
            style,
            span,
        },
        Expr::MethodCall {
            target,
            name,
            args,
            span,
        } => Expr::MethodCall {
            target: Box::new(desugar_expr(*target)),
            name,
            args: args.into_iter().map(desugar_expr).collect(),
            span,
        },
        Expr::If {
            cond,
            then_branch,
            else_branch,
            span,
        } => Expr::If {
            cond: Box::new(desugar_expr(*cond)),
            then_branch: Box::new(desugar_expr(*then_branch)),
            else_branch: Box::new(desugar_expr(*else_branch)),
            span,
        },
        Expr::Quantifier {
            kind,
            var,
            domain,
            body,
            span,
        } => Expr::Quantifier {
            kind,
            var,
            domain,
            body: Box::new(desugar_expr(*body)),
            span,
        },
        Expr::Aggregate {
            kind, comp, span, ..
        } => desugar_aggregate(kind, comp, span),
    }
}

fn desugar_aggregate(kind: AggKind, comp: Comprehension, span: Span) -> Expr {
    let term = desugar_expr(*comp.term);
    let where_clause = comp.where_clause.map(|e| desugar_expr(*e));
    let else_clause = comp.else_clause.map(|e| desugar_expr(*e));

    match kind {
        AggKind::Sum | AggKind::Count => {
            // `count` counts its binder, so the term collapses to 1.
            let term = if kind == AggKind::Count {
                Expr::NumLit {
                    value: 1.0,
                    span: comp.span.clone(),
                }
            } else {
                term
            };
            let term = match where_clause {
                Some(cond) => {
                    let fallback = else_clause.unwrap_or(Expr::NumLit {
                        value: 0.0,
                        span: comp.span.clone(),
                    });
                    Expr::If {
                        cond: Box::new(cond),
                        then_branch: Box::new(term),
                        else_branch: Box::new(fallback),
                        span: comp.span.clone(),
                    }
                }
                None => term,
            };
            Expr::Aggregate {
                kind: AggKind::Sum,
                comp: Comprehension {
                    term: Box::new(term),
                    var: comp.var,
                    domain: comp.domain,
                    where_clause: None,
                    else_clause: None,
                    span: comp.span,
                },
                from_comp_arg: false,
                span,
            }
        }
        AggKind::Any => {
            let body = fold_filtered_body(term, where_clause, else_clause, &span, true);
            Expr::Quantifier {
                kind: QuantKind::Exists,
                var: comp.var,
                domain: comp.domain,
                body: Box::new(body),
                span,
            }
        }
        AggKind::All => {
            let body = fold_filtered_body(term, where_clause, else_clause, &span, false);
            Expr::Quantifier {
                kind: QuantKind::Forall,
                var: comp.var,
                domain: comp.domain,
                body: Box::new(body),
                span,
            }
        }
    }
}

/// Fold `where`/`else` into a quantifier body. For `any` the filter is
/// conjunctive, for `all` it weakens to an implication; an `else` branch
/// covers the filtered-out elements.
fn fold_filtered_body(
    term: Expr,
    where_clause: Option<Expr>,
    else_clause: Option<Expr>,
    span: &Span,
    existential: bool,
) -> Expr {
    let join = if existential {
        BinaryOp::And
    } else {
        BinaryOp::Implies
    };
    match (where_clause, else_clause) {
        (None, None) => term,
        (None, Some(else_term)) => else_term,
        (Some(cond), None) => Expr::Binary {
            op: join,
            left: Box::new(cond),
            right: Box::new(term),
            span: span.clone(),
        },
        (Some(cond), Some(else_term)) => {
            let not_cond = Expr::Not {
                expr: Box::new(cond.clone()),
                span: span.clone(),
            };
            let outer = if existential {
                BinaryOp::Or
            } else {
                BinaryOp::And
            };
            Expr::Binary {
                op: outer,
                left: Box::new(Expr::Binary {
                    op: join,
                    left: Box::new(cond),
                    right: Box::new(term),
                    span: span.clone(),
                }),
                right: Box::new(Expr::Binary {
                    op: join,
                    left: Box::new(not_cond),
                    right: Box::new(else_term),
                    span: span.clone(),
                }),
                span: span.clone(),
            }
        }
    }
}
