use crate::diagnostics::Diagnostic;
use crate::kernel::ir::{self, KExpr, KernelIr};
use crate::surface::{self as ast, AggKind, BinaryOp, CallStyle, CompareOp, Expr};

/// Lower the desugared, elaborated AST into the symbolic Kernel IR.
/// `maximize E` is canonicalized here into `minimize (-E)`; comparison
/// senses are canonicalized to `<`, `<=`, `=`, `!=` by swapping operands.
pub fn lower_symbolic(program: &ast::Program) -> Result<KernelIr, Vec<Diagnostic>> {
    let mut problems = Vec::new();
    let mut diagnostics = Vec::new();

    for item in &program.items {
        let ast::TopItem::Problem(problem) = item else {
            continue;
        };

        let mut sets = Vec::new();
        let mut params = Vec::new();
        let mut finds = Vec::new();
        let mut constraints = Vec::new();
        let mut objective = None;

        for stmt in &problem.stmts {
            match stmt {
                ast::ProblemStmt::Set(decl) => sets.push(ir::KSetDecl {
                    name: decl.name.name.clone(),
                    span: decl.span.clone(),
                }),
                ast::ProblemStmt::Param(decl) => params.push(lower_param(decl)),
                ast::ProblemStmt::Find(decl) => match lower_find(decl) {
                    Ok(find) => finds.push(find),
                    Err(diag) => diagnostics.push(diag),
                },
                ast::ProblemStmt::Constraint(constraint) => {
                    match lower_expr(&constraint.expr) {
                        Ok(expr) => constraints.push(ir::KConstraint {
                            weight: match constraint.kind {
                                ast::ConstraintKind::Must => ir::WeightKind::Hard,
                                ast::ConstraintKind::Should => ir::WeightKind::Should,
                                ast::ConstraintKind::Nice => ir::WeightKind::Nice,
                            },
                            expr,
                            span: constraint.span.clone(),
                        }),
                        Err(diag) => diagnostics.push(diag),
                    }
                }
                ast::ProblemStmt::Objective(decl) => {
                    if objective.is_some() {
                        // The validator already reported the duplicate.
                        continue;
                    }
                    match lower_expr(&decl.expr) {
                        Ok(expr) => {
                            let expr = match decl.kind {
                                ast::ObjectiveKind::Minimize => expr,
                                ast::ObjectiveKind::Maximize => KExpr::Neg {
                                    span: decl.span.clone(),
                                    expr: Box::new(expr),
                                },
                            };
                            objective = Some(ir::KObjective {
                                expr,
                                span: decl.span.clone(),
                            });
                        }
                        Err(diag) => diagnostics.push(diag),
                    }
                }
            }
        }

        problems.push(ir::KProblem {
            name: problem.name.name.clone(),
            sets,
            params,
            finds,
            constraints,
            objective,
            span: problem.span.clone(),
        });
    }

    if diagnostics.is_empty() {
        Ok(KernelIr {
            problems,
            span: program.span.clone(),
        })
    } else {
        Err(diagnostics)
    }
}

fn lower_param(decl: &ast::ParamDecl) -> ir::KParamDecl {
    let value = match &decl.value_type {
        ast::ParamValueType::Bool { .. } => ir::KParamValue::Bool,
        ast::ParamValueType::Real { .. } => ir::KParamValue::Real,
        ast::ParamValueType::Int { lo, hi, .. } => ir::KParamValue::Int { lo: *lo, hi: *hi },
        ast::ParamValueType::Elem { set, .. } => ir::KParamValue::Elem {
            set: set.name.clone(),
        },
    };
    let default = decl.default.as_ref().map(|lit| match &lit.value {
        ast::LitValue::Bool(value) => ir::KConst::Bool(*value),
        ast::LitValue::Number(value) => ir::KConst::Num(*value),
        ast::LitValue::Str(value) => ir::KConst::Str(value.clone()),
    });
    ir::KParamDecl {
        name: decl.name.name.clone(),
        indices: decl.indices.iter().map(|name| name.name.clone()).collect(),
        value,
        default,
        span: decl.span.clone(),
    }
}

fn lower_find(decl: &ast::FindDecl) -> Result<ir::KFindDecl, Diagnostic> {
    let unknown = match decl.unknown_type.kind.as_str() {
        "Subset" => ir::KUnknownKind::Subset {
            set: decl.unknown_type.args.first().cloned().unwrap_or_default(),
        },
        "Mapping" => ir::KUnknownKind::Mapping {
            dom: decl.unknown_type.args.first().cloned().unwrap_or_default(),
            cod: decl.unknown_type.args.get(1).cloned().unwrap_or_default(),
        },
        other => {
            return Err(Diagnostic::error(
                "QSOL2101",
                format!("non-primitive unknown `{other}` survived elaboration"),
                decl.span.clone(),
            ))
        }
    };
    Ok(ir::KFindDecl {
        name: decl.name.name.clone(),
        unknown,
        span: decl.span.clone(),
    })
}

fn lower_expr(expr: &Expr) -> Result<KExpr, Diagnostic> {
    let span = expr.span().clone();
    match expr {
        Expr::Name(name) => Ok(KExpr::Name {
            name: name.name.clone(),
            span,
        }),
        Expr::BoolLit { value, .. } => Ok(KExpr::BoolLit {
            value: *value,
            span,
        }),
        Expr::NumLit { value, .. } => Ok(KExpr::NumLit {
            value: *value,
            span,
        }),
        Expr::StrLit { .. } => Err(Diagnostic::error(
            "QSOL2101",
            "string literals have no kernel form",
            span,
        )),
        Expr::Not { expr, .. } => Ok(KExpr::Not {
            expr: Box::new(lower_expr(expr)?),
            span,
        }),
        Expr::Neg { expr, .. } => Ok(KExpr::Neg {
            expr: Box::new(lower_expr(expr)?),
            span,
        }),
        Expr::Binary {
            op, left, right, ..
        } => {
            let left = Box::new(lower_expr(left)?);
            let right = Box::new(lower_expr(right)?);
            Ok(match op {
                BinaryOp::And => KExpr::And { left, right, span },
                BinaryOp::Or => KExpr::Or { left, right, span },
                BinaryOp::Implies => KExpr::Implies { left, right, span },
                BinaryOp::Add => KExpr::Add { left, right, span },
                BinaryOp::Sub => KExpr::Sub { left, right, span },
                BinaryOp::Mul => KExpr::Mul { left, right, span },
                BinaryOp::Div => KExpr::Div { left, right, span },
            })
        }
        Expr::Compare {
            op, left, right, ..
        } => {
            let left = lower_expr(left)?;
            let right = lower_expr(right)?;
            let (op, left, right) = match op {
                CompareOp::Eq => (ir::KCompareOp::Eq, left, right),
                CompareOp::Ne => (ir::KCompareOp::Ne, left, right),
                CompareOp::Lt => (ir::KCompareOp::Lt, left, right),
                CompareOp::Le => (ir::KCompareOp::Le, left, right),
                // `a > b` is `b < a`; `a >= b` is `b <= a`.
                CompareOp::Gt => (ir::KCompareOp::Lt, right, left),
                CompareOp::Ge => (ir::KCompareOp::Le, right, left),
            };
            Ok(KExpr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
                span,
            })
        }
        Expr::Call {
            name, args, style, ..
        } => {
            if name.name == "size" {
                let set = match args.first() {
                    Some(Expr::Name(set)) => set.name.clone(),
                    _ => {
                        return Err(Diagnostic::error(
                            "QSOL2101",
                            "size() expects a declared set identifier",
                            span,
                        ))
                    }
                };
                return Ok(KExpr::SizeOf { set, span });
            }
            match style {
                CallStyle::Bracket => Ok(KExpr::ParamRead {
                    name: name.name.clone(),
                    args: args.iter().map(lower_expr).collect::<Result<_, _>>()?,
                    span,
                }),
                CallStyle::Paren => Err(Diagnostic::error(
                    "QSOL2101",
                    format!("call `{}` survived macro elaboration", name.name),
                    span,
                )),
            }
        }
        Expr::MethodCall {
            target, name, args, ..
        } => {
            let Expr::Name(target) = target.as_ref() else {
                return Err(Diagnostic::error(
                    "QSOL2101",
                    "method call target must be a find name",
                    span,
                ));
            };
            let method = match name.name.as_str() {
                "has" => ir::KMethod::Has,
                "is" => ir::KMethod::Is,
                other => {
                    return Err(Diagnostic::error(
                        "QSOL2101",
                        format!("unsupported method `{other}` in kernel lowering"),
                        span,
                    ))
                }
            };
            Ok(KExpr::MethodCall {
                target: target.name.clone(),
                method,
                args: args.iter().map(lower_expr).collect::<Result<_, _>>()?,
                span,
            })
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
            ..
        } => Ok(KExpr::If {
            cond: Box::new(lower_expr(cond)?),
            then_expr: Box::new(lower_expr(then_branch)?),
            else_expr: Box::new(lower_expr(else_branch)?),
            span,
        }),
        Expr::Quantifier {
            kind,
            var,
            domain,
            body,
            ..
        } => Ok(KExpr::Quantifier {
            kind: match kind {
                ast::QuantKind::Forall => ir::QuantKind::Forall,
                ast::QuantKind::Exists => ir::QuantKind::Exists,
            },
            var: var.name.clone(),
            domain: domain.name.clone(),
            body: Box::new(lower_expr(body)?),
            span,
        }),
        Expr::Aggregate { kind, comp, .. } => {
            if *kind != AggKind::Sum {
                return Err(Diagnostic::error(
                    "QSOL2101",
                    "aggregate should be desugared before lowering",
                    span,
                ));
            }
            Ok(KExpr::Sum {
                term: Box::new(lower_expr(&comp.term)?),
                var: comp.var.name.clone(),
                domain: comp.domain.name.clone(),
                span,
            })
        }
        Expr::AggregateRef { arg, .. } => Err(Diagnostic::error(
            "QSOL2101",
            format!(
                "aggregate over `{}` requires a comprehension or a `Comp(_)` macro formal",
                arg.name
            ),
            span,
        )),
    }
}
