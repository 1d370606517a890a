use std::collections::HashMap;

use crate::diagnostics::{Diagnostic, Span};
use crate::sema::symbols::{SymbolKind, SymbolTable};
use crate::sema::types::{is_numeric, promote_numeric, render_type, Type, INT_MAX};
use crate::surface::*;

#[derive(Debug)]
pub struct TypeCheckResult {
    /// Type tag per expression, keyed by the expression's start offset.
    pub types: HashMap<usize, String>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn check_program(program: &Program, symbols: &SymbolTable) -> TypeCheckResult {
    let mut checker = Checker {
        symbols,
        scope: symbols.global,
        diagnostics: Vec::new(),
        types: HashMap::new(),
    };

    for item in &program.items {
        let TopItem::Problem(problem) = item else {
            continue;
        };
        let Some(&scope) = symbols.problem_scopes.get(&problem.name.name) else {
            continue;
        };
        checker.scope = scope;
        for stmt in &problem.stmts {
            match stmt {
                ProblemStmt::Constraint(constraint) => {
                    let ty = checker.expr_type(&constraint.expr, &HashMap::new());
                    if ty != Type::Bool {
                        checker.type_err(
                            constraint.expr.span(),
                            "constraint expression must be Bool",
                        );
                    }
                    if let Some(guard) = &constraint.guard {
                        let guard_ty = checker.expr_type(guard, &HashMap::new());
                        if guard_ty != Type::Bool {
                            checker.type_err(guard.span(), "guard expression must be Bool");
                        }
                    }
                }
                ProblemStmt::Objective(objective) => {
                    let ty = checker.expr_type(&objective.expr, &HashMap::new());
                    if !is_numeric(&ty) {
                        checker.type_err(
                            objective.expr.span(),
                            "objective expression must be numeric",
                        );
                    }
                }
                ProblemStmt::Param(param) => {
                    let Some(default) = &param.default else {
                        continue;
                    };
                    if matches!(param.value_type, ParamValueType::Elem { .. }) {
                        checker.type_err(&default.span, "set-valued params do not support defaults");
                        continue;
                    }
                    let default_ty = literal_type(default);
                    let decl_ty = param_decl_type(param);
                    if !compatible(&decl_ty, &default_ty) {
                        checker.type_err(&default.span, "param default type mismatch");
                    }
                }
                _ => {}
            }
        }
    }

    TypeCheckResult {
        types: checker.types,
        diagnostics: checker.diagnostics,
    }
}

struct Checker<'s> {
    symbols: &'s SymbolTable,
    scope: usize,
    diagnostics: Vec<Diagnostic>,
    types: HashMap<usize, String>,
}

impl Checker<'_> {
    fn expr_type(&mut self, expr: &Expr, binders: &HashMap<String, Type>) -> Type {
        let out = match expr {
            Expr::BoolLit { .. } => Type::Bool,
            Expr::NumLit { .. } => Type::Real,
            Expr::StrLit { .. } => Type::Unknown,
            Expr::Name(name) => self.name_type(name, binders),
            Expr::Not { expr: inner, span } => {
                let sub = self.expr_type(inner, binders);
                if sub != Type::Bool {
                    self.type_err(span, "`not` requires Bool");
                }
                Type::Bool
            }
            Expr::Neg { expr: inner, span } => {
                let sub = self.expr_type(inner, binders);
                if !is_numeric(&sub) {
                    self.type_err(span, "unary minus requires numeric operand");
                }
                sub
            }
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => {
                let left_ty = self.expr_type(left, binders);
                let right_ty = self.expr_type(right, binders);
                match op {
                    BinaryOp::And | BinaryOp::Or | BinaryOp::Implies => {
                        if left_ty != Type::Bool || right_ty != Type::Bool {
                            self.type_err(span, "boolean operator requires Bool operands");
                        }
                        Type::Bool
                    }
                    BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                        match promote_numeric(&left_ty, &right_ty) {
                            Some(promoted) => promoted,
                            None => {
                                self.type_err(span, "arithmetic requires numeric operands");
                                Type::Unknown
                            }
                        }
                    }
                }
            }
            Expr::Compare {
                op,
                left,
                right,
                span,
            } => {
                let left_ty = self.expr_type(left, binders);
                let right_ty = self.expr_type(right, binders);
                match op {
                    CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
                        if !is_numeric(&left_ty) || !is_numeric(&right_ty) {
                            self.type_err(span, "comparison requires numeric operands");
                        }
                    }
                    CompareOp::Eq | CompareOp::Ne => {
                        let ok = (is_numeric(&left_ty) && is_numeric(&right_ty))
                            || (left_ty == Type::Bool && right_ty == Type::Bool);
                        let same_elem = matches!(
                            (&left_ty, &right_ty),
                            (Type::Elem(a), Type::Elem(b)) if a == b
                        );
                        if !ok && !same_elem {
                            self.type_err(
                                span,
                                "equality requires matching Bool, numeric, or same-set element \
                                 operands",
                            );
                        }
                    }
                }
                Type::Bool
            }
            Expr::Call {
                name,
                args,
                style,
                span,
            } => self.call_type(name, args, style, span, binders),
            Expr::MethodCall {
                target,
                name,
                args,
                span,
            } => {
                let target_ty = self.expr_type(target, binders);
                self.method_type(name, args, span, &target_ty, binders)
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
                span,
            } => {
                let cond_ty = self.expr_type(cond, binders);
                if cond_ty != Type::Bool {
                    self.type_err(cond.span(), "if condition must be Bool");
                }
                let then_ty = self.expr_type(then_branch, binders);
                let else_ty = self.expr_type(else_branch, binders);
                if then_ty == Type::Bool && else_ty == Type::Bool {
                    Type::Bool
                } else {
                    match promote_numeric(&then_ty, &else_ty) {
                        Some(promoted) => promoted,
                        None => {
                            self.type_err(span, "if branches must be numeric");
                            Type::Unknown
                        }
                    }
                }
            }
            Expr::Quantifier {
                var,
                domain,
                body,
                span,
                ..
            } => {
                let mut inner = binders.clone();
                inner.insert(var.name.clone(), Type::Elem(domain.name.clone()));
                let body_ty = self.expr_type(body, &inner);
                if body_ty != Type::Bool {
                    self.type_err(body.span(), "quantifier body must be Bool");
                }
                if !self.is_declared_set(&domain.name) {
                    let mut diag = Diagnostic::error(
                        "QSOL2001",
                        format!("unknown set `{}` in quantifier", domain.name),
                        span.clone(),
                    )
                    .with_help(format!(
                        "Declare set `{}` before using it in quantifiers.",
                        domain.name
                    ));
                    if let Some(suggestion) =
                        did_you_mean(&domain.name, &self.symbols.set_names(self.scope))
                    {
                        diag = diag.with_help(format!("Did you mean `{suggestion}`?"));
                    }
                    self.diagnostics.push(diag);
                }
                Type::Bool
            }
            Expr::Aggregate {
                kind,
                comp,
                from_comp_arg,
                span,
            } => {
                if *from_comp_arg {
                    self.type_err(
                        span,
                        "comprehension-shaped argument is only allowed for `Comp(_)` macro \
                         formals",
                    );
                }
                self.aggregate_type(*kind, comp, binders)
            }
            Expr::AggregateRef { arg, span, .. } => {
                self.type_err(
                    span,
                    &format!(
                        "aggregate over `{}` requires a comprehension or a `Comp(_)` macro formal",
                        arg.name
                    ),
                );
                Type::Unknown
            }
        };

        self.types
            .insert(expr.span().start_offset, render_type(&out));
        out
    }

    fn name_type(&mut self, name: &SpannedName, binders: &HashMap<String, Type>) -> Type {
        if let Some(ty) = binders.get(&name.name) {
            return ty.clone();
        }
        match self.symbols.lookup(self.scope, &name.name) {
            Some(symbol) => {
                if symbol.kind == SymbolKind::Param {
                    if let Type::Param { indices, elem } = &symbol.ty {
                        if indices.is_empty() {
                            return (**elem).clone();
                        }
                    }
                }
                symbol.ty.clone()
            }
            None => {
                let mut candidates: Vec<String> = binders.keys().cloned().collect();
                candidates.extend(self.symbols.names(self.scope));
                candidates.sort();
                candidates.dedup();
                let mut diag = Diagnostic::error(
                    "QSOL2001",
                    format!("unknown identifier `{}`", name.name),
                    name.span.clone(),
                )
                .with_help(
                    "Declare the identifier in the problem scope or bind it in a \
                     quantifier/comprehension.",
                );
                if let Some(suggestion) = did_you_mean(&name.name, &candidates) {
                    diag = diag.with_help(format!("Did you mean `{suggestion}`?"));
                }
                self.diagnostics.push(diag);
                Type::Unknown
            }
        }
    }

    fn call_type(
        &mut self,
        name: &SpannedName,
        args: &[Expr],
        style: &CallStyle,
        span: &Span,
        binders: &HashMap<String, Type>,
    ) -> Type {
        if name.name == "size" {
            return self.size_call_type(args, span, binders);
        }

        let symbol = self.symbols.lookup(self.scope, &name.name).cloned();
        match symbol {
            Some(symbol) if symbol.kind == SymbolKind::Param => {
                let Type::Param { indices, elem } = symbol.ty else {
                    return Type::Unknown;
                };
                if indices.is_empty() {
                    self.type_err(
                        span,
                        &format!(
                            "scalar param `{}` must be referenced as `{}` (bare name)",
                            name.name, name.name
                        ),
                    );
                    for arg in args {
                        self.expr_type(arg, binders);
                    }
                    return *elem;
                }
                if matches!(style, CallStyle::Paren) {
                    self.type_err(
                        span,
                        &format!(
                            "indexed param `{}` must be read with brackets: `{}[...]`",
                            name.name, name.name
                        ),
                    );
                }
                if args.len() != indices.len() {
                    self.type_err(
                        span,
                        &format!(
                            "param call `{}` expects {} argument(s)",
                            name.name,
                            indices.len()
                        ),
                    );
                }
                for (position, arg) in args.iter().enumerate() {
                    let arg_ty = self.expr_type(arg, binders);
                    let Some(expected_set) = indices.get(position) else {
                        continue;
                    };
                    let matches_set =
                        matches!(&arg_ty, Type::Elem(set) if set == expected_set);
                    if !matches_set {
                        self.type_err(
                            arg.span(),
                            &format!("expected element of `{expected_set}`"),
                        );
                    }
                }
                *elem
            }
            _ => {
                for arg in args {
                    self.expr_type(arg, binders);
                }
                let mut diag = Diagnostic::error(
                    "QSOL2001",
                    format!("unknown identifier `{}`", name.name),
                    name.span.clone(),
                )
                .with_help(
                    "Only params, `size`, and macro names may be called; macros are inlined \
                     before this stage.",
                );
                if let Some(suggestion) =
                    did_you_mean(&name.name, &self.symbols.names(self.scope))
                {
                    diag = diag.with_help(format!("Did you mean `{suggestion}`?"));
                }
                self.diagnostics.push(diag);
                Type::Unknown
            }
        }
    }

    fn size_call_type(
        &mut self,
        args: &[Expr],
        span: &Span,
        binders: &HashMap<String, Type>,
    ) -> Type {
        if args.len() != 1 {
            for arg in args {
                self.expr_type(arg, binders);
            }
            self.type_err(span, "size() expects exactly one argument");
            return Type::Unknown;
        }
        let Expr::Name(name) = &args[0] else {
            self.expr_type(&args[0], binders);
            self.type_err(args[0].span(), "size() expects a declared set identifier");
            return Type::Unknown;
        };
        if !self.is_declared_set(&name.name) {
            self.type_err(
                &name.span,
                &format!("size() expects a declared set identifier, got `{}`", name.name),
            );
            return Type::Unknown;
        }
        Type::Int { lo: 0, hi: INT_MAX }
    }

    fn method_type(
        &mut self,
        method: &SpannedName,
        args: &[Expr],
        span: &Span,
        target_ty: &Type,
        binders: &HashMap<String, Type>,
    ) -> Type {
        let Type::UnknownInstance { kind, args: type_args } = target_ty else {
            self.type_err(span, "method call target is not an unknown instance");
            for arg in args {
                self.expr_type(arg, binders);
            }
            return Type::Unknown;
        };

        match (kind.as_str(), method.name.as_str()) {
            ("Subset", "has") => {
                if args.len() != 1 {
                    self.type_err(span, "Subset.has expects one argument");
                } else {
                    let arg_ty = self.expr_type(&args[0], binders);
                    let expected = type_args.first().map(String::as_str).unwrap_or("");
                    if !matches!(&arg_ty, Type::Elem(set) if set == expected) {
                        self.type_err(
                            args[0].span(),
                            &format!("expected element of set `{expected}`"),
                        );
                    }
                }
                Type::Bool
            }
            ("Mapping", "is") => {
                if args.len() != 2 {
                    self.type_err(span, "Mapping.is expects two arguments");
                } else {
                    let dom = type_args.first().map(String::as_str).unwrap_or("");
                    let cod = type_args.get(1).map(String::as_str).unwrap_or("");
                    let lhs = self.expr_type(&args[0], binders);
                    let rhs = self.expr_type(&args[1], binders);
                    if !matches!(&lhs, Type::Elem(set) if set == dom) {
                        self.type_err(args[0].span(), &format!("expected element of `{dom}`"));
                    }
                    if !matches!(&rhs, Type::Elem(set) if set == cod) {
                        self.type_err(args[1].span(), &format!("expected element of `{cod}`"));
                    }
                }
                Type::Bool
            }
            _ => {
                for arg in args {
                    self.expr_type(arg, binders);
                }
                self.type_err(
                    span,
                    &format!("unknown method `{}` for `{kind}` unknown", method.name),
                );
                Type::Bool
            }
        }
    }

    fn aggregate_type(
        &mut self,
        kind: AggKind,
        comp: &Comprehension,
        binders: &HashMap<String, Type>,
    ) -> Type {
        let mut inner = binders.clone();
        inner.insert(comp.var.name.clone(), Type::Elem(comp.domain.name.clone()));

        match kind {
            AggKind::Sum => {
                let term_ty = self.expr_type(&comp.term, &inner);
                if !is_numeric(&term_ty) {
                    self.type_err(comp.term.span(), "sum term must be numeric");
                }
                if let Some(where_clause) = &comp.where_clause {
                    if self.expr_type(where_clause, &inner) != Type::Bool {
                        self.type_err(where_clause.span(), "where clause must be Bool");
                    }
                }
                if let Some(else_clause) = &comp.else_clause {
                    let else_ty = self.expr_type(else_clause, &inner);
                    if !is_numeric(&else_ty) {
                        self.type_err(else_clause.span(), "else term must be numeric");
                    }
                }
                Type::Real
            }
            AggKind::Count => {
                match comp.term.as_ref() {
                    Expr::Name(counted) if counted.name == comp.var.name => {}
                    _ => self.diagnostics.push(Diagnostic::error(
                        "QSOL2101",
                        "count binder and counted variable must match",
                        comp.span.clone(),
                    )),
                }
                if let Some(where_clause) = &comp.where_clause {
                    if self.expr_type(where_clause, &inner) != Type::Bool {
                        self.type_err(where_clause.span(), "count where clause must be Bool");
                    }
                }
                Type::Int { lo: 0, hi: INT_MAX }
            }
            AggKind::Any | AggKind::All => {
                let term_ty = self.expr_type(&comp.term, &inner);
                if term_ty != Type::Bool {
                    self.type_err(comp.term.span(), "boolean aggregate term must be Bool");
                }
                if let Some(where_clause) = &comp.where_clause {
                    if self.expr_type(where_clause, &inner) != Type::Bool {
                        self.type_err(where_clause.span(), "where clause must be Bool");
                    }
                }
                if let Some(else_clause) = &comp.else_clause {
                    if self.expr_type(else_clause, &inner) != Type::Bool {
                        self.type_err(else_clause.span(), "else term must be Bool");
                    }
                }
                Type::Bool
            }
        }
    }

    fn is_declared_set(&self, name: &str) -> bool {
        matches!(
            self.symbols.lookup(self.scope, name),
            Some(symbol) if symbol.kind == SymbolKind::Set
        )
    }

    fn type_err(&mut self, span: &Span, message: &str) {
        let mut diag = Diagnostic::error("QSOL2101", message, span.clone());
        for help in help_for_type_message(message) {
            diag = diag.with_help(help);
        }
        self.diagnostics.push(diag);
    }
}

fn literal_type(lit: &Literal) -> Type {
    match lit.value {
        LitValue::Bool(_) => Type::Bool,
        LitValue::Number(_) => Type::Real,
        LitValue::Str(_) => Type::Unknown,
    }
}

fn param_decl_type(param: &ParamDecl) -> Type {
    match &param.value_type {
        ParamValueType::Bool { .. } => Type::Bool,
        ParamValueType::Real { .. } => Type::Real,
        ParamValueType::Int { lo, hi, .. } => Type::Int { lo: *lo, hi: *hi },
        ParamValueType::Elem { set, .. } => Type::Elem(set.name.clone()),
    }
}

fn compatible(left: &Type, right: &Type) -> bool {
    if left == &Type::Bool && right == &Type::Bool {
        return true;
    }
    is_numeric(left) && is_numeric(right)
}

fn help_for_type_message(message: &str) -> Vec<String> {
    let help: &[&str] = if message == "size() expects exactly one argument" {
        &["Use `size(SetName)` with one declared set identifier."]
    } else if message.starts_with("size() expects a declared set identifier") {
        &["Pass a declared set name, for example `size(V)`."]
    } else if message == "boolean operator requires Bool operands" {
        &["Convert both operands to Bool expressions before using boolean operators."]
    } else if message == "comparison requires numeric operands" {
        &["Use numeric operands on both sides of `<`, `<=`, `>`, and `>=`."]
    } else if message.starts_with("param call `") && message.contains("expects") {
        &["Pass one argument per declared index dimension of the parameter."]
    } else if message.starts_with("scalar param `") {
        &["Reference scalar params as bare names, not as calls."]
    } else if message.starts_with("indexed param `") {
        &["Read indexed params with bracket syntax, for example `Cost[i, j]`."]
    } else if message == "constraint expression must be Bool" {
        &["`must`, `should`, and `nice` constraints require Bool expressions."]
    } else if message == "objective expression must be numeric" {
        &["`minimize` and `maximize` require numeric expressions."]
    } else if message == "arithmetic requires numeric operands" {
        &["Ensure all operands are numeric (`Real`/`Int`) before arithmetic."]
    } else if message.starts_with("expected element of") {
        &["Use a value that belongs to the expected set domain."]
    } else {
        &[]
    };
    help.iter().map(|h| h.to_string()).collect()
}

/// Closest candidate by normalized edit distance, mirroring the 0.75
/// cutoff of the original suggestion helper.
pub fn did_you_mean(name: &str, candidates: &[String]) -> Option<String> {
    let mut best: Option<(f64, &String)> = None;
    for candidate in candidates {
        if candidate == name {
            continue;
        }
        let distance = edit_distance(name, candidate);
        let longest = name.chars().count().max(candidate.chars().count()).max(1);
        let similarity = 1.0 - distance as f64 / longest as f64;
        if similarity >= 0.75 {
            match best {
                Some((score, _)) if score >= similarity => {}
                _ => best = Some((similarity, candidate)),
            }
        }
    }
    best.map(|(_, candidate)| candidate.clone())
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
