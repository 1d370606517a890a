use std::collections::{HashMap, HashSet};

use crate::diagnostics::{Diagnostic, Span};
use crate::surface::*;

#[derive(Debug)]
pub struct ElaborationResult {
    pub program: Program,
    pub diagnostics: Vec<Diagnostic>,
}

/// One expanded custom-unknown instance: its alias in the problem, the
/// defining unknown, the formal-to-actual set map, and the aliases of its
/// representation members.
#[derive(Debug, Clone)]
struct InstanceContext {
    def_name: String,
    type_args: HashMap<String, String>,
    member_aliases: HashMap<String, String>,
}

#[derive(Debug, Clone)]
enum SubstValue {
    Expr(Expr),
    Comp { comp: Comprehension, is_bool: bool },
}

struct Expansion {
    finds: Vec<FindDecl>,
    laws: Vec<Constraint>,
}

type ValueSubst = HashMap<String, SubstValue>;
type SetSubst = HashMap<String, String>;
type CallStack = Vec<(String, String)>;

/// Expands user-defined unknowns into primitive finds plus generated laws,
/// and inlines every `predicate`/`function` macro call. After elaboration
/// the program contains only `Subset`/`Mapping` finds and no macro
/// references.
pub struct Elaborator {
    diagnostics: Vec<Diagnostic>,
    unknown_defs: HashMap<String, UnknownDef>,
    predicates: HashMap<String, MacroDef>,
    functions: HashMap<String, MacroDef>,
    instances: HashMap<String, InstanceContext>,
    used_find_names: HashSet<String>,
}

pub fn elaborate_unknowns(program: Program) -> ElaborationResult {
    Elaborator::new().elaborate(program)
}

impl Elaborator {
    fn new() -> Self {
        Elaborator {
            diagnostics: Vec::new(),
            unknown_defs: HashMap::new(),
            predicates: HashMap::new(),
            functions: HashMap::new(),
            instances: HashMap::new(),
            used_find_names: HashSet::new(),
        }
    }

    fn elaborate(mut self, program: Program) -> ElaborationResult {
        for item in &program.items {
            match item {
                TopItem::Unknown(def) => {
                    self.unknown_defs
                        .entry(def.name.name.clone())
                        .or_insert_with(|| def.clone());
                }
                TopItem::Predicate(def) | TopItem::Function(def) => {
                    if self.predicates.contains_key(&def.name.name)
                        || self.functions.contains_key(&def.name.name)
                    {
                        self.diagnostics.push(
                            Diagnostic::error(
                                "QSOL2101",
                                format!("redefinition of macro `{}`", def.name.name),
                                def.span.clone(),
                            )
                            .with_help(
                                "Use unique names across top-level `predicate` and `function` \
                                 declarations.",
                            ),
                        );
                        continue;
                    }
                    if def.is_predicate {
                        self.predicates.insert(def.name.name.clone(), def.clone());
                    } else {
                        self.functions.insert(def.name.name.clone(), def.clone());
                    }
                }
                _ => {}
            }
        }

        let items = program
            .items
            .into_iter()
            .map(|item| match item {
                TopItem::Problem(problem) => TopItem::Problem(self.elaborate_problem(problem)),
                other => other,
            })
            .collect();

        ElaborationResult {
            program: Program {
                items,
                span: program.span,
            },
            diagnostics: self.diagnostics,
        }
    }

    fn elaborate_problem(&mut self, problem: ProblemDef) -> ProblemDef {
        let ProblemDef { name, stmts, span } = problem;
        self.instances.clear();
        self.used_find_names = stmts
            .iter()
            .filter_map(|stmt| match stmt {
                ProblemStmt::Find(find) => Some(find.name.name.clone()),
                _ => None,
            })
            .collect();

        let mut assembled: Vec<ProblemStmt> = Vec::new();
        for stmt in stmts {
            match stmt {
                ProblemStmt::Find(find) => {
                    if matches!(find.unknown_type.kind.as_str(), "Subset" | "Mapping") {
                        assembled.push(ProblemStmt::Find(find));
                        continue;
                    }
                    let Some(def) = self.unknown_defs.get(&find.unknown_type.kind).cloned()
                    else {
                        // Unresolved custom find; the resolver reports it.
                        assembled.push(ProblemStmt::Find(find));
                        continue;
                    };
                    match self.expand_custom_find(
                        &find.name.name,
                        &def,
                        &find.unknown_type,
                        &[find.name.name.clone()],
                        &find.span,
                        &[],
                    ) {
                        Some(expansion) => {
                            assembled.extend(expansion.finds.into_iter().map(ProblemStmt::Find));
                            assembled
                                .extend(expansion.laws.into_iter().map(ProblemStmt::Constraint));
                        }
                        None => assembled.push(ProblemStmt::Find(find)),
                    }
                }
                other => assembled.push(other),
            }
        }

        let stmts = assembled
            .into_iter()
            .map(|stmt| match stmt {
                ProblemStmt::Constraint(constraint) => {
                    ProblemStmt::Constraint(self.rewrite_constraint(
                        constraint,
                        None,
                        &HashMap::new(),
                        &HashMap::new(),
                    ))
                }
                ProblemStmt::Objective(objective) => {
                    let expr = self.rewrite_expr(
                        objective.expr,
                        None,
                        &HashMap::new(),
                        &HashMap::new(),
                        &[],
                    );
                    ProblemStmt::Objective(Objective {
                        kind: objective.kind,
                        expr,
                        span: objective.span,
                    })
                }
                other => other,
            })
            .collect();

        ProblemDef { name, stmts, span }
    }

    fn rewrite_constraint(
        &mut self,
        constraint: Constraint,
        instance: Option<&str>,
        value_subst: &ValueSubst,
        set_subst: &SetSubst,
    ) -> Constraint {
        let Constraint {
            kind,
            expr,
            guard,
            span,
        } = constraint;
        let expr = self.rewrite_expr(expr, instance, value_subst, set_subst, &[]);
        let guard = guard.map(|g| self.rewrite_expr(g, instance, value_subst, set_subst, &[]));
        Constraint {
            kind,
            expr,
            guard,
            span,
        }
    }

    fn expand_custom_find(
        &mut self,
        alias: &str,
        def: &UnknownDef,
        unknown_type: &UnknownTypeRef,
        path: &[String],
        decl_span: &Span,
        def_stack: &[String],
    ) -> Option<Expansion> {
        if def_stack.iter().any(|name| name == &def.name.name) {
            self.diagnostics.push(
                Diagnostic::error(
                    "QSOL2101",
                    format!(
                        "recursive unknown definition detected for `{}`",
                        def.name.name
                    ),
                    decl_span.clone(),
                )
                .with_help("Unknown representations may not depend on themselves."),
            );
            return None;
        }
        let mut def_stack: Vec<String> = def_stack.to_vec();
        def_stack.push(def.name.name.clone());
        if unknown_type.args.len() != def.formals.len() {
            self.diagnostics.push(
                Diagnostic::error(
                    "QSOL2101",
                    format!(
                        "unknown `{}` expects {} argument(s), got {}",
                        def.name.name,
                        def.formals.len(),
                        unknown_type.args.len()
                    ),
                    decl_span.clone(),
                )
                .with_help("Match `find` type arguments with unknown formal parameter count."),
            );
            return None;
        }

        let type_args: HashMap<String, String> = def
            .formals
            .iter()
            .zip(unknown_type.args.iter())
            .map(|(formal, actual)| (formal.name.clone(), actual.clone()))
            .collect();
        let mut context = InstanceContext {
            def_name: def.name.name.clone(),
            type_args: type_args.clone(),
            member_aliases: HashMap::new(),
        };
        self.instances.insert(alias.to_string(), context.clone());

        let mut out = Expansion {
            finds: Vec::new(),
            laws: Vec::new(),
        };
        for rep_decl in &def.rep {
            let instantiated = UnknownTypeRef {
                kind: rep_decl.unknown_type.kind.clone(),
                args: rep_decl
                    .unknown_type
                    .args
                    .iter()
                    .map(|arg| type_args.get(arg).cloned().unwrap_or_else(|| arg.clone()))
                    .collect(),
                span: rep_decl.unknown_type.span.clone(),
            };
            let mut member_path: Vec<String> = path.to_vec();
            member_path.push(rep_decl.name.name.clone());
            let member_alias = self.allocate_alias(&member_path);
            context
                .member_aliases
                .insert(rep_decl.name.name.clone(), member_alias.clone());
            self.instances.insert(alias.to_string(), context.clone());

            let as_primitive_find = |instantiated: UnknownTypeRef| FindDecl {
                name: SpannedName {
                    name: member_alias.clone(),
                    span: rep_decl.name.span.clone(),
                },
                unknown_type: instantiated,
                span: rep_decl.span.clone(),
            };

            if matches!(instantiated.kind.as_str(), "Subset" | "Mapping") {
                out.finds.push(as_primitive_find(instantiated));
                continue;
            }
            let Some(child_def) = self.unknown_defs.get(&instantiated.kind).cloned() else {
                out.finds.push(as_primitive_find(instantiated));
                continue;
            };
            match self.expand_custom_find(
                &member_alias,
                &child_def,
                &instantiated,
                &member_path,
                &rep_decl.span,
                &def_stack,
            ) {
                Some(child) => {
                    out.finds.extend(child.finds);
                    out.laws.extend(child.laws);
                }
                None => out.finds.push(as_primitive_find(instantiated)),
            }
        }

        for law in &def.laws {
            let rewritten = self.rewrite_constraint(
                law.clone(),
                Some(alias),
                &HashMap::new(),
                &type_args,
            );
            out.laws.push(rewritten);
        }

        Some(out)
    }

    fn allocate_alias(&mut self, path: &[String]) -> String {
        let base = format!("__qsol_u__{}", path.join("__"));
        let mut candidate = base.clone();
        let mut idx = 1;
        while self.used_find_names.contains(&candidate) {
            idx += 1;
            candidate = format!("{base}__{idx}");
        }
        self.used_find_names.insert(candidate.clone());
        candidate
    }

    fn rewrite_expr(
        &mut self,
        expr: Expr,
        instance: Option<&str>,
        value_subst: &ValueSubst,
        set_subst: &SetSubst,
        call_stack: &[(String, String)],
    ) -> Expr {
        match expr {
            Expr::Name(name) => {
                if let Some(value) = value_subst.get(&name.name) {
                    return match value {
                        SubstValue::Expr(expr) => expr.clone(),
                        SubstValue::Comp { .. } => {
                            self.diagnostics.push(
                                Diagnostic::error(
                                    "QSOL2101",
                                    format!(
                                        "comprehension argument `{}` used outside an aggregate",
                                        name.name
                                    ),
                                    name.span.clone(),
                                )
                                .with_help(
                                    "Apply `sum`, `count`, `any`, or `all` to comprehension \
                                     formals.",
                                ),
                            );
                            Expr::BoolLit {
                                value: false,
                                span: name.span,
                            }
                        }
                    };
                }
                if let Some(alias) = instance
                    .and_then(|alias| self.instances.get(alias))
                    .and_then(|ctx| ctx.member_aliases.get(&name.name))
                {
                    return Expr::Name(SpannedName {
                        name: alias.clone(),
                        span: name.span,
                    });
                }
                if let Some(set) = set_subst.get(&name.name) {
                    return Expr::Name(SpannedName {
                        name: set.clone(),
                        span: name.span,
                    });
                }
                Expr::Name(name)
            }
            Expr::BoolLit { .. } | Expr::NumLit { .. } | Expr::StrLit { .. } => expr,
            Expr::Not { expr, span } => Expr::Not {
                expr: Box::new(self.rewrite_expr(*expr, instance, value_subst, set_subst, call_stack)),
                span,
            },
            Expr::Neg { expr, span } => Expr::Neg {
                expr: Box::new(self.rewrite_expr(*expr, instance, value_subst, set_subst, call_stack)),
                span,
            },
            Expr::Binary {
                op,
                left,
                right,
                span,
            } => Expr::Binary {
                op,
                left: Box::new(self.rewrite_expr(*left, instance, value_subst, set_subst, call_stack)),
                right: Box::new(
                    self.rewrite_expr(*right, instance, value_subst, set_subst, call_stack),
                ),
                span,
            },
            Expr::Compare {
                op,
                left,
                right,
                span,
            } => Expr::Compare {
                op,
                left: Box::new(self.rewrite_expr(*left, instance, value_subst, set_subst, call_stack)),
                right: Box::new(
                    self.rewrite_expr(*right, instance, value_subst, set_subst, call_stack),
                ),
                span,
            },
            Expr::If {
                cond,
                then_branch,
                else_branch,
                span,
            } => Expr::If {
                cond: Box::new(self.rewrite_expr(*cond, instance, value_subst, set_subst, call_stack)),
                then_branch: Box::new(
                    self.rewrite_expr(*then_branch, instance, value_subst, set_subst, call_stack),
                ),
                else_branch: Box::new(
                    self.rewrite_expr(*else_branch, instance, value_subst, set_subst, call_stack),
                ),
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
                domain: self.substitute_set(domain, set_subst),
                body: Box::new(self.rewrite_expr(*body, instance, value_subst, set_subst, call_stack)),
                span,
            },
            Expr::Aggregate {
                kind,
                comp,
                from_comp_arg,
                span,
            } => Expr::Aggregate {
                kind,
                comp: self.rewrite_comprehension(comp, instance, value_subst, set_subst, call_stack),
                from_comp_arg,
                span,
            },
            Expr::AggregateRef { kind, arg, span } => {
                match value_subst.get(&arg.name).cloned() {
                    Some(SubstValue::Comp { comp, is_bool }) => {
                        self.fold_comp_into_aggregate(kind, comp, is_bool, span)
                    }
                    Some(SubstValue::Expr(_)) | None => Expr::AggregateRef { kind, arg, span },
                }
            }
            Expr::MethodCall {
                target,
                name,
                args,
                span,
            } => {
                let target =
                    self.rewrite_expr(*target, instance, value_subst, set_subst, call_stack);
                let args: Vec<Expr> = args
                    .into_iter()
                    .map(|arg| self.rewrite_expr(arg, instance, value_subst, set_subst, call_stack))
                    .collect();
                if let Expr::Name(target_name) = &target {
                    if let Some(ctx) = self.instances.get(&target_name.name).cloned() {
                        let def = self.unknown_defs.get(&ctx.def_name).cloned();
                        let member = def
                            .as_ref()
                            .and_then(|def| view_member(def, &name.name).cloned());
                        let Some(member) = member else {
                            self.diagnostics.push(
                                Diagnostic::error(
                                    "QSOL2101",
                                    format!(
                                        "unknown method `{}` for unknown `{}`",
                                        name.name, ctx.def_name
                                    ),
                                    span.clone(),
                                )
                                .with_help(
                                    "Declare a matching predicate/function in the unknown \
                                     `view` block.",
                                ),
                            );
                            return Expr::BoolLit { value: false, span };
                        };
                        let alias = target_name.name.clone();
                        return self.inline_macro_call(
                            &member,
                            &alias,
                            &format!("{alias}.{}", name.name),
                            "Break recursive predicate/function dependencies in unknown `view` \
                             blocks.",
                            &format!("method `{}`", name.name),
                            args,
                            &span,
                            Some(alias.as_str()),
                            &ctx.type_args.clone(),
                            call_stack,
                        );
                    }
                }
                Expr::MethodCall {
                    target: Box::new(target),
                    name,
                    args,
                    span,
                }
            }
            Expr::Call {
                name,
                args,
                style,
                span,
            } => {
                let args: Vec<Expr> = args
                    .into_iter()
                    .map(|arg| self.rewrite_expr(arg, instance, value_subst, set_subst, call_stack))
                    .collect();
                let call = Expr::Call {
                    name: name.clone(),
                    args: args.clone(),
                    style: style.clone(),
                    span: span.clone(),
                };
                if matches!(style, CallStyle::Bracket) || name.name == "size" {
                    return call;
                }

                if let Some(alias) = instance {
                    let member = self
                        .instances
                        .get(alias)
                        .and_then(|ctx| self.unknown_defs.get(&ctx.def_name))
                        .and_then(|def| view_member(def, &name.name).cloned());
                    if let Some(member) = member {
                        let type_args = self
                            .instances
                            .get(alias)
                            .map(|ctx| ctx.type_args.clone())
                            .unwrap_or_default();
                        let alias = alias.to_string();
                        return self.inline_macro_call(
                            &member,
                            &alias,
                            &format!("{alias}.{}", name.name),
                            "Break recursive predicate/function dependencies in unknown `view` \
                             blocks.",
                            &format!("method `{}`", name.name),
                            args,
                            &span,
                            Some(alias.as_str()),
                            &type_args,
                            call_stack,
                        );
                    }
                }

                let global = self
                    .predicates
                    .get(&name.name)
                    .or_else(|| self.functions.get(&name.name))
                    .cloned();
                if let Some(member) = global {
                    return self.inline_macro_call(
                        &member,
                        "__global__",
                        &name.name,
                        "Break recursive dependencies among top-level predicates/functions.",
                        &format!("`{}`", name.name),
                        args,
                        &span,
                        instance,
                        set_subst,
                        call_stack,
                    );
                }
                call
            }
        }
    }

    fn rewrite_comprehension(
        &mut self,
        comp: Comprehension,
        instance: Option<&str>,
        value_subst: &ValueSubst,
        set_subst: &SetSubst,
        call_stack: &[(String, String)],
    ) -> Comprehension {
        Comprehension {
            term: Box::new(self.rewrite_expr(*comp.term, instance, value_subst, set_subst, call_stack)),
            var: comp.var,
            domain: self.substitute_set(comp.domain, set_subst),
            where_clause: comp.where_clause.map(|e| {
                Box::new(self.rewrite_expr(*e, instance, value_subst, set_subst, call_stack))
            }),
            else_clause: comp.else_clause.map(|e| {
                Box::new(self.rewrite_expr(*e, instance, value_subst, set_subst, call_stack))
            }),
            span: comp.span,
        }
    }

    fn substitute_set(&self, name: SpannedName, set_subst: &SetSubst) -> SpannedName {
        match set_subst.get(&name.name) {
            Some(actual) => SpannedName {
                name: actual.clone(),
                span: name.span,
            },
            None => name,
        }
    }

    /// Turn a substituted comprehension tree into a concrete aggregate.
    /// Boolean terms under `sum`/`count` become `if t then 1 else 0`.
    fn fold_comp_into_aggregate(
        &mut self,
        kind: AggKind,
        comp: Comprehension,
        is_bool: bool,
        span: Span,
    ) -> Expr {
        match kind {
            AggKind::Sum | AggKind::Count => {
                let indicator = |expr: Box<Expr>, span: &Span| Expr::If {
                    cond: expr,
                    then_branch: Box::new(Expr::NumLit {
                        value: 1.0,
                        span: span.clone(),
                    }),
                    else_branch: Box::new(Expr::NumLit {
                        value: 0.0,
                        span: span.clone(),
                    }),
                    span: span.clone(),
                };
                let term = if is_bool {
                    indicator(comp.term, &span)
                } else {
                    *comp.term
                };
                let else_clause = match (is_bool, comp.else_clause) {
                    (true, Some(else_term)) => Some(Box::new(indicator(else_term, &span))),
                    (_, other) => other,
                };
                Expr::Aggregate {
                    kind: AggKind::Sum,
                    comp: Comprehension {
                        term: Box::new(term),
                        var: comp.var,
                        domain: comp.domain,
                        where_clause: comp.where_clause,
                        else_clause,
                        span: comp.span,
                    },
                    from_comp_arg: false,
                    span,
                }
            }
            AggKind::Any | AggKind::All => {
                if !is_bool {
                    self.diagnostics.push(
                        Diagnostic::error(
                            "QSOL2101",
                            "boolean aggregate applied to a `Comp(Real)` argument",
                            span.clone(),
                        )
                        .with_help("Use `sum` for numeric comprehension arguments."),
                    );
                }
                Expr::Aggregate {
                    kind,
                    comp,
                    from_comp_arg: false,
                    span,
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn inline_macro_call(
        &mut self,
        member: &MacroDef,
        scope_key: &str,
        scope_label: &str,
        recursive_help: &str,
        call_descriptor: &str,
        call_args: Vec<Expr>,
        call_span: &Span,
        instance: Option<&str>,
        set_subst: &SetSubst,
        call_stack: &[(String, String)],
    ) -> Expr {
        let fallback = |span: &Span| {
            if member.is_predicate {
                Expr::BoolLit {
                    value: false,
                    span: span.clone(),
                }
            } else {
                Expr::NumLit {
                    value: 0.0,
                    span: span.clone(),
                }
            }
        };

        if call_args.len() != member.formals.len() {
            self.diagnostics.push(Diagnostic::error(
                "QSOL2101",
                format!(
                    "{call_descriptor} expects {} argument(s), got {}",
                    member.formals.len(),
                    call_args.len()
                ),
                call_span.clone(),
            ));
            return fallback(call_span);
        }

        let kind_key = if member.is_predicate {
            "predicate"
        } else {
            "function"
        };
        let call_key = (
            scope_key.to_string(),
            format!("{kind_key}:{}", member.name.name),
        );
        if call_stack.contains(&call_key) {
            let message = if scope_key != "__global__" && member.is_predicate {
                format!("recursive view predicate expansion detected for `{scope_label}`")
            } else {
                format!("recursive macro expansion detected for `{scope_label}`")
            };
            self.diagnostics.push(
                Diagnostic::error("QSOL2101", message, call_span.clone())
                    .with_help(recursive_help),
            );
            return fallback(call_span);
        }

        let mut value_subst = ValueSubst::new();
        for (formal, arg) in member.formals.iter().zip(call_args.into_iter()) {
            let is_comp_formal =
                matches!(formal.kind, FormalKind::CompBool | FormalKind::CompReal);
            match (is_comp_formal, arg) {
                (
                    true,
                    Expr::Aggregate {
                        comp,
                        from_comp_arg: true,
                        ..
                    },
                ) => {
                    value_subst.insert(
                        formal.name.name.clone(),
                        SubstValue::Comp {
                            comp,
                            is_bool: formal.kind == FormalKind::CompBool,
                        },
                    );
                }
                (true, other) => {
                    self.diagnostics.push(
                        Diagnostic::error(
                            "QSOL2101",
                            format!(
                                "{call_descriptor} expects a comprehension argument for `{}`",
                                formal.name.name
                            ),
                            other.span().clone(),
                        )
                        .with_help("Pass `expr for x in Set [where cond]` in this position."),
                    );
                    return fallback(call_span);
                }
                (false, arg) => {
                    value_subst.insert(formal.name.name.clone(), SubstValue::Expr(arg));
                }
            }
        }

        let mut next_stack: CallStack = call_stack.to_vec();
        next_stack.push(call_key);
        self.rewrite_expr(
            member.body.clone(),
            instance,
            &value_subst,
            set_subst,
            &next_stack,
        )
    }
}

fn view_member<'d>(def: &'d UnknownDef, name: &str) -> Option<&'d MacroDef> {
    def.view.iter().find(|member| member.name.name == name)
}
