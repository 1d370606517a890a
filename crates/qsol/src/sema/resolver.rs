use crate::diagnostics::{Diagnostic, Span};
use crate::sema::symbols::{Symbol, SymbolKind, SymbolTable};
use crate::sema::types::{Type, INT_MAX, INT_MIN};
use crate::surface::*;

#[derive(Debug)]
pub struct ResolutionResult {
    pub symbols: SymbolTable,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn resolve_program(program: &Program) -> ResolutionResult {
    let mut table = SymbolTable::new();
    let mut diagnostics = Vec::new();
    let global = table.global;

    for item in &program.items {
        match item {
            TopItem::Unknown(def) => {
                let symbol = Symbol {
                    name: def.name.name.clone(),
                    kind: SymbolKind::UnknownDef,
                    ty: Type::UnknownInstance {
                        kind: def.name.name.clone(),
                        args: def.formals.iter().map(|f| f.name.clone()).collect(),
                    },
                    span: def.span.clone(),
                };
                if !table.define(global, symbol) {
                    diagnostics.push(duplicate(&def.span, &def.name.name));
                }
            }
            TopItem::Problem(def) => {
                let symbol = Symbol {
                    name: def.name.name.clone(),
                    kind: SymbolKind::Problem,
                    ty: Type::Real,
                    span: def.span.clone(),
                };
                if !table.define(global, symbol) {
                    diagnostics.push(duplicate(&def.span, &def.name.name));
                }
            }
            _ => {}
        }
    }

    for item in &program.items {
        if let TopItem::Problem(problem) = item {
            let scope = table.push_scope(global);
            table.problem_scopes.insert(problem.name.name.clone(), scope);
            collect_problem(&mut table, scope, problem, &mut diagnostics);
        }
    }

    ResolutionResult {
        symbols: table,
        diagnostics,
    }
}

fn collect_problem(
    table: &mut SymbolTable,
    scope: usize,
    problem: &ProblemDef,
    diagnostics: &mut Vec<Diagnostic>,
) {
    for stmt in &problem.stmts {
        if let ProblemStmt::Set(decl) = stmt {
            let symbol = Symbol {
                name: decl.name.name.clone(),
                kind: SymbolKind::Set,
                ty: Type::Set(decl.name.name.clone()),
                span: decl.span.clone(),
            };
            if !table.define(scope, symbol) {
                diagnostics.push(duplicate(&decl.span, &decl.name.name));
            }
        }
    }

    for stmt in &problem.stmts {
        match stmt {
            ProblemStmt::Param(decl) => {
                let mut indices = Vec::new();
                for index in &decl.indices {
                    match table.lookup(scope, &index.name) {
                        Some(symbol) if symbol.kind == SymbolKind::Set => {
                            indices.push(index.name.clone());
                        }
                        _ => diagnostics.push(Diagnostic::error(
                            "QSOL2201",
                            format!("unknown set `{}` in param indexing", index.name),
                            decl.span.clone(),
                        )),
                    }
                }
                let elem = param_value_to_type(table, scope, &decl.value_type, diagnostics);
                let symbol = Symbol {
                    name: decl.name.name.clone(),
                    kind: SymbolKind::Param,
                    ty: Type::Param {
                        indices,
                        elem: Box::new(elem),
                    },
                    span: decl.span.clone(),
                };
                if !table.define(scope, symbol) {
                    diagnostics.push(duplicate(&decl.span, &decl.name.name));
                }
            }
            ProblemStmt::Find(decl) => {
                let unknown = &decl.unknown_type;
                match unknown.kind.as_str() {
                    "Subset" => {
                        check_set_arg(table, scope, unknown, 0, "Subset", diagnostics, &decl.span);
                    }
                    "Mapping" => {
                        check_set_arg(table, scope, unknown, 0, "Mapping", diagnostics, &decl.span);
                        check_set_arg(table, scope, unknown, 1, "Mapping", diagnostics, &decl.span);
                    }
                    other => {
                        if table.lookup(table.global, other).is_none() {
                            diagnostics.push(Diagnostic::error(
                                "QSOL2001",
                                format!("unknown unknown-type `{other}`"),
                                decl.span.clone(),
                            ));
                        }
                    }
                }
                let symbol = Symbol {
                    name: decl.name.name.clone(),
                    kind: SymbolKind::Find,
                    ty: Type::UnknownInstance {
                        kind: unknown.kind.clone(),
                        args: unknown.args.clone(),
                    },
                    span: decl.span.clone(),
                };
                if !table.define(scope, symbol) {
                    diagnostics.push(duplicate(&decl.span, &decl.name.name));
                }
            }
            _ => {}
        }
    }
}

fn check_set_arg(
    table: &SymbolTable,
    scope: usize,
    unknown: &UnknownTypeRef,
    index: usize,
    context: &str,
    diagnostics: &mut Vec<Diagnostic>,
    span: &Span,
) {
    let Some(target) = unknown.args.get(index) else {
        diagnostics.push(Diagnostic::error(
            "QSOL2101",
            format!("`{context}` expects set arguments"),
            span.clone(),
        ));
        return;
    };
    match table.lookup(scope, target) {
        Some(symbol) if symbol.kind == SymbolKind::Set => {}
        _ => diagnostics.push(Diagnostic::error(
            "QSOL2001",
            format!("unknown set `{target}` for {context}"),
            span.clone(),
        )),
    }
}

fn param_value_to_type(
    table: &SymbolTable,
    scope: usize,
    value_type: &ParamValueType,
    diagnostics: &mut Vec<Diagnostic>,
) -> Type {
    match value_type {
        ParamValueType::Bool { .. } => Type::Bool,
        ParamValueType::Real { .. } => Type::Real,
        ParamValueType::Int { lo, hi, .. } => Type::Int {
            lo: (*lo).clamp(INT_MIN, INT_MAX),
            hi: (*hi).clamp(INT_MIN, INT_MAX),
        },
        ParamValueType::Elem { set, span } => {
            match table.lookup(scope, &set.name) {
                Some(symbol) if symbol.kind == SymbolKind::Set => {}
                _ => diagnostics.push(Diagnostic::error(
                    "QSOL2201",
                    format!("unknown set `{}` in param value type", set.name),
                    span.clone(),
                )),
            }
            Type::Elem(set.name.clone())
        }
    }
}

fn duplicate(span: &Span, name: &str) -> Diagnostic {
    Diagnostic::error(
        "QSOL2002",
        format!("redefinition of `{name}` in same scope"),
        span.clone(),
    )
}
