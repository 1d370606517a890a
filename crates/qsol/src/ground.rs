use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::diagnostics::{Diagnostic, Span};
use crate::kernel::{
    KCompareOp, KConst, KExpr, KFindDecl, KMethod, KParamValue, KProblem, KUnknownKind, KernelIr,
    QuantKind, WeightKind,
};

pub const COMPARE_EPSILON: f64 = 1e-6;

/// Concrete scenario data fed into grounding. Set element order is
/// significant: it drives label order, quantifier expansion, and the
/// structural one-hot laws.
#[derive(Debug, Clone, Default)]
pub struct ScenarioPayload {
    pub problem: Option<String>,
    pub sets: IndexMap<String, Vec<String>>,
    pub params: HashMap<String, ParamValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Num(f64),
    Str(String),
    Map(IndexMap<String, ParamValue>),
}

impl ScenarioPayload {
    pub fn from_json(value: &serde_json::Value) -> Result<ScenarioPayload, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "scenario payload must be a JSON object".to_string())?;
        let mut payload = ScenarioPayload::default();
        if let Some(problem) = obj.get("problem") {
            payload.problem = problem.as_str().map(str::to_string);
        }
        if let Some(sets) = obj.get("sets") {
            let sets = sets
                .as_object()
                .ok_or_else(|| "`sets` must be a JSON object".to_string())?;
            for (name, elems) in sets {
                let elems = elems
                    .as_array()
                    .ok_or_else(|| format!("set `{name}` must be a JSON array"))?;
                payload.sets.insert(
                    name.clone(),
                    elems
                        .iter()
                        .map(|elem| match elem {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                );
            }
        }
        if let Some(params) = obj.get("params") {
            let params = params
                .as_object()
                .ok_or_else(|| "`params` must be a JSON object".to_string())?;
            for (name, value) in params {
                payload
                    .params
                    .insert(name.clone(), json_to_param_value(value)?);
            }
        }
        Ok(payload)
    }
}

fn json_to_param_value(value: &serde_json::Value) -> Result<ParamValue, String> {
    match value {
        serde_json::Value::Bool(b) => Ok(ParamValue::Bool(*b)),
        serde_json::Value::Number(n) => Ok(ParamValue::Num(n.as_f64().unwrap_or(0.0))),
        serde_json::Value::String(s) => Ok(ParamValue::Str(s.clone())),
        serde_json::Value::Object(map) => {
            let mut out = IndexMap::new();
            for (key, inner) in map {
                out.insert(key.clone(), json_to_param_value(inner)?);
            }
            Ok(ParamValue::Map(out))
        }
        other => Err(format!("unsupported param payload value: {other}")),
    }
}

// --- Ground IR ----------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct GroundIr {
    pub problems: Vec<GroundProblem>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundProblem {
    pub name: String,
    pub sets: IndexMap<String, Vec<String>>,
    pub variables: Vec<GroundVariable>,
    pub one_hot_groups: Vec<OneHotGroup>,
    pub constraints: Vec<GroundConstraint>,
    pub objective: Option<GNum>,
    pub required_capabilities: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundVariable {
    pub label: String,
    pub meaning: String,
}

/// One structural `sum_b F.is[a,b] = 1` law for a mapping find.
#[derive(Debug, Clone, Serialize)]
pub struct OneHotGroup {
    pub find: String,
    pub elem: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroundConstraint {
    pub weight: WeightKind,
    pub expr: GBool,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum GBool {
    Lit { value: bool, span: Span },
    Var { label: String, span: Span },
    Not { expr: Box<GBool>, span: Span },
    And { items: Vec<GBool>, span: Span },
    Or { items: Vec<GBool>, span: Span },
    Implies { left: Box<GBool>, right: Box<GBool>, span: Span },
    Compare { op: KCompareOp, left: Box<GNum>, right: Box<GNum>, span: Span },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum GNum {
    Const { value: f64, span: Span },
    Var { label: String, span: Span },
    FromBool { expr: Box<GBool>, span: Span },
    Add { items: Vec<GNum>, span: Span },
    Sub { left: Box<GNum>, right: Box<GNum>, span: Span },
    Mul { left: Box<GNum>, right: Box<GNum>, span: Span },
    Div { left: Box<GNum>, right: Box<GNum>, span: Span },
    Neg { expr: Box<GNum>, span: Span },
    If { cond: Box<GBool>, then_expr: Box<GNum>, else_expr: Box<GNum>, span: Span },
}

impl GBool {
    pub fn span(&self) -> &Span {
        match self {
            GBool::Lit { span, .. }
            | GBool::Var { span, .. }
            | GBool::Not { span, .. }
            | GBool::And { span, .. }
            | GBool::Or { span, .. }
            | GBool::Implies { span, .. }
            | GBool::Compare { span, .. } => span,
        }
    }
}

impl GNum {
    pub fn span(&self) -> &Span {
        match self {
            GNum::Const { span, .. }
            | GNum::Var { span, .. }
            | GNum::FromBool { span, .. }
            | GNum::Add { span, .. }
            | GNum::Sub { span, .. }
            | GNum::Mul { span, .. }
            | GNum::Div { span, .. }
            | GNum::Neg { span, .. }
            | GNum::If { span, .. } => span,
        }
    }

    pub fn as_const(&self) -> Option<f64> {
        match self {
            GNum::Const { value, .. } => Some(*value),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct GroundingResult {
    pub ground: Option<GroundIr>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn subset_label(find: &str, elem: &str) -> String {
    format!("{find}.has[{elem}]")
}

pub fn mapping_label(find: &str, a: &str, b: &str) -> String {
    format!("{find}.is[{a},{b}]")
}

/// Expand the Kernel IR against scenario data. Every quantifier and sum
/// unrolls over the payload's ordered set elements; the result contains
/// only binary-variable references and constants.
pub fn ground_ir(
    kernel: &KernelIr,
    scenario: &ScenarioPayload,
    cancel: Option<&CancelToken>,
) -> GroundingResult {
    let mut problems: Vec<&KProblem> = kernel.problems.iter().collect();
    if let Some(requested) = &scenario.problem {
        problems.retain(|problem| &problem.name == requested);
    }
    if problems.is_empty() {
        return GroundingResult {
            ground: None,
            diagnostics: vec![Diagnostic::error(
                "QSOL2201",
                "scenario problem does not match any compiled problem",
                kernel.span.clone(),
            )],
        };
    }

    let mut diagnostics = Vec::new();
    let mut out = Vec::new();
    let mut complete = true;
    for problem in problems {
        match Grounder::new(problem, scenario, cancel).run(&mut diagnostics) {
            Some(ground) => out.push(ground),
            None => complete = false,
        }
    }

    if !complete || diagnostics.iter().any(Diagnostic::is_error) {
        return GroundingResult {
            ground: None,
            diagnostics,
        };
    }
    GroundingResult {
        ground: Some(GroundIr {
            problems: out,
            span: kernel.span.clone(),
        }),
        diagnostics,
    }
}

struct Grounder<'p> {
    problem: &'p KProblem,
    scenario: &'p ScenarioPayload,
    cancel: Option<&'p CancelToken>,
    sets: IndexMap<String, Vec<String>>,
    params: HashMap<String, ParamValue>,
    cancelled: bool,
}

type Env = HashMap<String, String>;

impl<'p> Grounder<'p> {
    fn new(
        problem: &'p KProblem,
        scenario: &'p ScenarioPayload,
        cancel: Option<&'p CancelToken>,
    ) -> Self {
        Grounder {
            problem,
            scenario,
            cancel,
            sets: IndexMap::new(),
            params: HashMap::new(),
            cancelled: false,
        }
    }

    fn run(mut self, diagnostics: &mut Vec<Diagnostic>) -> Option<GroundProblem> {
        self.bind_sets(diagnostics);
        self.bind_params(diagnostics);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return None;
        }

        let problem = self.problem;
        let mut variables = Vec::new();
        let mut one_hot_groups = Vec::new();
        for find in &problem.finds {
            self.declare_find(find, &mut variables, &mut one_hot_groups, diagnostics);
        }

        let mut constraints = Vec::new();
        for constraint in &problem.constraints {
            match self.ground_bool(&constraint.expr, &Env::new(), diagnostics) {
                Some(expr) => constraints.push(GroundConstraint {
                    weight: constraint.weight,
                    expr,
                    span: constraint.span.clone(),
                }),
                None => {
                    if self.cancelled {
                        return None;
                    }
                }
            }
        }

        let objective = match &problem.objective {
            Some(objective) => {
                match self.ground_num(&objective.expr, &Env::new(), diagnostics) {
                    Some(expr) => Some(expr),
                    None => {
                        if self.cancelled {
                            return None;
                        }
                        None
                    }
                }
            }
            None => None,
        };

        if diagnostics.iter().any(Diagnostic::is_error) {
            return None;
        }

        Some(GroundProblem {
            name: self.problem.name.clone(),
            sets: self.sets,
            variables,
            one_hot_groups,
            constraints,
            objective,
            required_capabilities: required_capabilities(self.problem),
            span: self.problem.span.clone(),
        })
    }

    fn bind_sets(&mut self, diagnostics: &mut Vec<Diagnostic>) {
        for decl in &self.problem.sets {
            match self.scenario.sets.get(&decl.name) {
                Some(elems) => {
                    self.sets.insert(decl.name.clone(), elems.clone());
                }
                None => diagnostics.push(Diagnostic::error(
                    "QSOL2201",
                    format!("missing set values for `{}`", decl.name),
                    decl.span.clone(),
                )),
            }
        }
    }

    fn bind_params(&mut self, diagnostics: &mut Vec<Diagnostic>) {
        for decl in &self.problem.params {
            let provided = self.scenario.params.get(&decl.name).cloned();
            let value = match (provided, &decl.default) {
                (Some(value), _) => value,
                (None, Some(default)) => {
                    let scalar = const_to_param_value(default);
                    if decl.indices.is_empty() {
                        scalar
                    } else {
                        expand_indexed_default(&scalar, &decl.indices, &self.sets)
                    }
                }
                (None, None) => {
                    diagnostics.push(Diagnostic::error(
                        "QSOL2201",
                        format!("missing value for param `{}`", decl.name),
                        decl.span.clone(),
                    ));
                    continue;
                }
            };

            if !check_shape(&value, &decl.indices, &self.sets) {
                diagnostics.push(Diagnostic::error(
                    "QSOL2201",
                    format!("param `{}` shape does not match index sets", decl.name),
                    decl.span.clone(),
                ));
                continue;
            }

            if let KParamValue::Elem { set } = &decl.value {
                if !self.elem_values_in_set(&value, set) {
                    diagnostics.push(Diagnostic::error(
                        "QSOL2201",
                        format!(
                            "param `{}` has values outside of set `{set}`",
                            decl.name
                        ),
                        decl.span.clone(),
                    ));
                    continue;
                }
            }

            self.params.insert(decl.name.clone(), value);
        }
    }

    fn elem_values_in_set(&self, value: &ParamValue, set: &str) -> bool {
        match value {
            ParamValue::Str(id) => self
                .sets
                .get(set)
                .map(|elems| elems.iter().any(|elem| elem == id))
                .unwrap_or(false),
            ParamValue::Map(map) => map.values().all(|inner| self.elem_values_in_set(inner, set)),
            _ => false,
        }
    }

    fn declare_find(
        &self,
        find: &KFindDecl,
        variables: &mut Vec<GroundVariable>,
        one_hot_groups: &mut Vec<OneHotGroup>,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        match &find.unknown {
            KUnknownKind::Subset { set } => {
                let Some(elems) = self.sets.get(set) else {
                    diagnostics.push(Diagnostic::error(
                        "QSOL2201",
                        format!("missing set `{set}` for subset `{}`", find.name),
                        find.span.clone(),
                    ));
                    return;
                };
                for elem in elems {
                    variables.push(GroundVariable {
                        label: subset_label(&find.name, elem),
                        meaning: format!("{}.has({elem})", find.name),
                    });
                }
            }
            KUnknownKind::Mapping { dom, cod } => {
                let (Some(dom_elems), Some(cod_elems)) =
                    (self.sets.get(dom), self.sets.get(cod))
                else {
                    diagnostics.push(Diagnostic::error(
                        "QSOL2201",
                        format!("missing set for mapping `{}`", find.name),
                        find.span.clone(),
                    ));
                    return;
                };
                for a in dom_elems {
                    let mut row = Vec::new();
                    for b in cod_elems {
                        let label = mapping_label(&find.name, a, b);
                        variables.push(GroundVariable {
                            label: label.clone(),
                            meaning: format!("{}.is({a},{b})", find.name),
                        });
                        row.push(label);
                    }
                    one_hot_groups.push(OneHotGroup {
                        find: find.name.clone(),
                        elem: a.clone(),
                        labels: row,
                    });
                }
            }
        }
    }

    fn check_cancelled(&mut self) -> bool {
        if self.cancelled {
            return true;
        }
        if self.cancel.map(CancelToken::is_cancelled).unwrap_or(false) {
            self.cancelled = true;
            return true;
        }
        false
    }

    fn domain(
        &mut self,
        set: &str,
        span: &Span,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<Vec<String>> {
        match self.sets.get(set) {
            Some(elems) => Some(elems.clone()),
            None => {
                diagnostics.push(Diagnostic::error(
                    "QSOL2201",
                    format!("unknown set `{set}` in quantifier or aggregate"),
                    span.clone(),
                ));
                None
            }
        }
    }

    fn ground_bool(
        &mut self,
        expr: &KExpr,
        env: &Env,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<GBool> {
        let span = expr.span().clone();
        match expr {
            KExpr::BoolLit { value, .. } => Some(GBool::Lit { value: *value, span }),
            KExpr::Not { expr, .. } => {
                let inner = self.ground_bool(expr, env, diagnostics)?;
                Some(match inner {
                    GBool::Lit { value, .. } => GBool::Lit { value: !value, span },
                    other => GBool::Not {
                        expr: Box::new(other),
                        span,
                    },
                })
            }
            KExpr::And { left, right, .. } => {
                let left = self.ground_bool(left, env, diagnostics)?;
                let right = self.ground_bool(right, env, diagnostics)?;
                Some(fold_and(vec![left, right], span))
            }
            KExpr::Or { left, right, .. } => {
                let left = self.ground_bool(left, env, diagnostics)?;
                let right = self.ground_bool(right, env, diagnostics)?;
                Some(fold_or(vec![left, right], span))
            }
            KExpr::Implies { left, right, .. } => {
                let left = self.ground_bool(left, env, diagnostics)?;
                let right = self.ground_bool(right, env, diagnostics)?;
                match left {
                    GBool::Lit { value: true, .. } => Some(right),
                    GBool::Lit { value: false, .. } => Some(GBool::Lit { value: true, span }),
                    left => Some(GBool::Implies {
                        left: Box::new(left),
                        right: Box::new(right),
                        span,
                    }),
                }
            }
            KExpr::Compare { op, left, right, .. } => {
                let left = self.ground_num(left, env, diagnostics)?;
                let right = self.ground_num(right, env, diagnostics)?;
                if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
                    let value = match op {
                        KCompareOp::Eq => (l - r).abs() <= COMPARE_EPSILON,
                        KCompareOp::Ne => (l - r).abs() > COMPARE_EPSILON,
                        KCompareOp::Lt => l - r <= -COMPARE_EPSILON,
                        KCompareOp::Le => l - r <= COMPARE_EPSILON,
                    };
                    return Some(GBool::Lit { value, span });
                }
                Some(GBool::Compare {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                })
            }
            KExpr::Quantifier {
                kind,
                var,
                domain,
                body,
                ..
            } => {
                let elems = self.domain(domain, &span, diagnostics)?;
                let mut items = Vec::with_capacity(elems.len());
                for elem in elems {
                    if self.check_cancelled() {
                        return None;
                    }
                    let mut next = env.clone();
                    next.insert(var.clone(), elem);
                    items.push(self.ground_bool(body, &next, diagnostics)?);
                }
                Some(match kind {
                    QuantKind::Forall => fold_and(items, span),
                    QuantKind::Exists => fold_or(items, span),
                })
            }
            KExpr::MethodCall { .. } => {
                let label = self.method_label(expr, env, diagnostics)?;
                Some(GBool::Var { label, span })
            }
            KExpr::ParamRead { .. } | KExpr::Name { .. } => {
                match self.resolve_value(expr, env, diagnostics)? {
                    ParamValue::Bool(value) => Some(GBool::Lit { value, span }),
                    _ => {
                        diagnostics.push(Diagnostic::error(
                            "QSOL2101",
                            "expected a Bool-valued expression",
                            span,
                        ));
                        None
                    }
                }
            }
            KExpr::If {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let cond = self.ground_bool(cond, env, diagnostics)?;
                let then_expr = self.ground_bool(then_expr, env, diagnostics)?;
                let else_expr = self.ground_bool(else_expr, env, diagnostics)?;
                match cond {
                    GBool::Lit { value: true, .. } => Some(then_expr),
                    GBool::Lit { value: false, .. } => Some(else_expr),
                    cond => {
                        let not_cond = GBool::Not {
                            expr: Box::new(cond.clone()),
                            span: span.clone(),
                        };
                        Some(fold_or(
                            vec![
                                fold_and(vec![cond, then_expr], span.clone()),
                                fold_and(vec![not_cond, else_expr], span.clone()),
                            ],
                            span,
                        ))
                    }
                }
            }
            _ => {
                diagnostics.push(Diagnostic::error(
                    "QSOL2101",
                    "expected a Bool-valued expression",
                    span,
                ));
                None
            }
        }
    }

    fn ground_num(
        &mut self,
        expr: &KExpr,
        env: &Env,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<GNum> {
        let span = expr.span().clone();
        match expr {
            KExpr::NumLit { value, .. } => Some(GNum::Const { value: *value, span }),
            KExpr::Name { name, .. } => {
                if let Some(bound) = env.get(name) {
                    return match bound.parse::<f64>() {
                        Ok(value) => Some(GNum::Const { value, span }),
                        Err(_) => {
                            diagnostics.push(Diagnostic::error(
                                "QSOL3001",
                                format!("non-numeric binder `{name}` in numeric context"),
                                span,
                            ));
                            None
                        }
                    };
                }
                match self.params.get(name).cloned() {
                    Some(ParamValue::Num(value)) => Some(GNum::Const { value, span }),
                    Some(ParamValue::Bool(value)) => Some(GNum::Const {
                        value: f64::from(value),
                        span,
                    }),
                    _ => {
                        diagnostics.push(Diagnostic::error(
                            "QSOL3001",
                            format!("unsupported numeric name `{name}`"),
                            span,
                        ));
                        None
                    }
                }
            }
            KExpr::SizeOf { set, .. } => {
                let elems = self.domain(set, &span, diagnostics)?;
                Some(GNum::Const {
                    value: elems.len() as f64,
                    span,
                })
            }
            KExpr::ParamRead { .. } => match self.resolve_value(expr, env, diagnostics)? {
                ParamValue::Num(value) => Some(GNum::Const { value, span }),
                ParamValue::Bool(value) => Some(GNum::Const {
                    value: f64::from(value),
                    span,
                }),
                _ => {
                    diagnostics.push(Diagnostic::error(
                        "QSOL2101",
                        "set-element param used in numeric context",
                        span,
                    ));
                    None
                }
            },
            KExpr::Add { left, right, .. } => {
                let left = self.ground_num(left, env, diagnostics)?;
                let right = self.ground_num(right, env, diagnostics)?;
                Some(fold_add(vec![left, right], span))
            }
            KExpr::Sub { left, right, .. } => {
                let left = self.ground_num(left, env, diagnostics)?;
                let right = self.ground_num(right, env, diagnostics)?;
                if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
                    return Some(GNum::Const { value: l - r, span });
                }
                Some(GNum::Sub {
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                })
            }
            KExpr::Mul { left, right, .. } => {
                let left = self.ground_num(left, env, diagnostics)?;
                let right = self.ground_num(right, env, diagnostics)?;
                if let (Some(l), Some(r)) = (left.as_const(), right.as_const()) {
                    return Some(GNum::Const { value: l * r, span });
                }
                Some(GNum::Mul {
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                })
            }
            KExpr::Div { left, right, .. } => {
                let left = self.ground_num(left, env, diagnostics)?;
                let right = self.ground_num(right, env, diagnostics)?;
                if let Some(r) = right.as_const() {
                    if r == 0.0 {
                        diagnostics.push(Diagnostic::error(
                            "QSOL3001",
                            "division by zero in grounded expression",
                            span,
                        ));
                        return None;
                    }
                    if let Some(l) = left.as_const() {
                        return Some(GNum::Const { value: l / r, span });
                    }
                }
                Some(GNum::Div {
                    left: Box::new(left),
                    right: Box::new(right),
                    span,
                })
            }
            KExpr::Neg { expr, .. } => {
                let inner = self.ground_num(expr, env, diagnostics)?;
                if let Some(value) = inner.as_const() {
                    return Some(GNum::Const { value: -value, span });
                }
                Some(GNum::Neg {
                    expr: Box::new(inner),
                    span,
                })
            }
            KExpr::If {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let cond = self.ground_bool(cond, env, diagnostics)?;
                let then_expr = self.ground_num(then_expr, env, diagnostics)?;
                let else_expr = self.ground_num(else_expr, env, diagnostics)?;
                match cond {
                    GBool::Lit { value: true, .. } => Some(then_expr),
                    GBool::Lit { value: false, .. } => Some(else_expr),
                    cond => Some(GNum::If {
                        cond: Box::new(cond),
                        then_expr: Box::new(then_expr),
                        else_expr: Box::new(else_expr),
                        span,
                    }),
                }
            }
            KExpr::Sum {
                term, var, domain, ..
            } => {
                let elems = self.domain(domain, &span, diagnostics)?;
                let mut items = Vec::with_capacity(elems.len());
                for elem in elems {
                    if self.check_cancelled() {
                        return None;
                    }
                    let mut next = env.clone();
                    next.insert(var.clone(), elem);
                    items.push(self.ground_num(term, &next, diagnostics)?);
                }
                Some(fold_add(items, span))
            }
            KExpr::MethodCall { .. } => {
                let label = self.method_label(expr, env, diagnostics)?;
                Some(GNum::Var { label, span })
            }
            // Boolean shapes used numerically keep their 0/1 reading.
            KExpr::BoolLit { value, .. } => Some(GNum::Const {
                value: f64::from(*value),
                span,
            }),
            KExpr::Compare { .. }
            | KExpr::And { .. }
            | KExpr::Or { .. }
            | KExpr::Implies { .. }
            | KExpr::Not { .. }
            | KExpr::Quantifier { .. } => {
                let inner = self.ground_bool(expr, env, diagnostics)?;
                Some(match inner {
                    GBool::Lit { value, .. } => GNum::Const {
                        value: f64::from(value),
                        span,
                    },
                    other => GNum::FromBool {
                        expr: Box::new(other),
                        span,
                    },
                })
            }
        }
    }

    fn method_label(
        &mut self,
        expr: &KExpr,
        env: &Env,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<String> {
        let KExpr::MethodCall {
            target,
            method,
            args,
            span,
        } = expr
        else {
            return None;
        };
        let find = self
            .problem
            .finds
            .iter()
            .find(|find| &find.name == target);
        let Some(find) = find else {
            diagnostics.push(Diagnostic::error(
                "QSOL2101",
                format!("method call on unknown find `{target}`"),
                span.clone(),
            ));
            return None;
        };

        match (&find.unknown, method) {
            (KUnknownKind::Subset { set }, KMethod::Has) => {
                let elem = self.resolve_elem(args.first()?, env, set, diagnostics)?;
                Some(subset_label(target, &elem))
            }
            (KUnknownKind::Mapping { dom, cod }, KMethod::Is) => {
                let a = self.resolve_elem(args.first()?, env, dom, diagnostics)?;
                let b = self.resolve_elem(args.get(1)?, env, cod, diagnostics)?;
                Some(mapping_label(target, &a, &b))
            }
            _ => {
                diagnostics.push(Diagnostic::error(
                    "QSOL2101",
                    format!("method does not match the kind of find `{target}`"),
                    span.clone(),
                ));
                None
            }
        }
    }

    /// Resolve a method-call argument to a concrete set-element id: a
    /// quantifier binder, a bare element id, or an `Elem`-typed param read.
    fn resolve_elem(
        &mut self,
        expr: &KExpr,
        env: &Env,
        expected_set: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<String> {
        let span = expr.span().clone();
        let id = match expr {
            KExpr::Name { name, .. } => match env.get(name) {
                Some(bound) => bound.clone(),
                None => match self.params.get(name).cloned() {
                    Some(ParamValue::Str(id)) => id,
                    Some(_) => {
                        diagnostics.push(Diagnostic::error(
                            "QSOL2201",
                            format!("param `{name}` is not a set-element value"),
                            span.clone(),
                        ));
                        return None;
                    }
                    None => name.clone(),
                },
            },
            KExpr::NumLit { value, .. } => value.to_string(),
            KExpr::ParamRead { .. } => match self.resolve_value(expr, env, diagnostics)? {
                ParamValue::Str(id) => id,
                _ => {
                    diagnostics.push(Diagnostic::error(
                        "QSOL2201",
                        "indexed param in element position must be set-element valued",
                        span.clone(),
                    ));
                    return None;
                }
            },
            _ => {
                diagnostics.push(Diagnostic::error(
                    "QSOL2101",
                    "unsupported method argument shape",
                    span.clone(),
                ));
                return None;
            }
        };

        let member = self
            .sets
            .get(expected_set)
            .map(|elems| elems.iter().any(|elem| elem == &id))
            .unwrap_or(false);
        if !member {
            diagnostics.push(Diagnostic::error(
                "QSOL2201",
                format!("`{id}` is not a member of set `{expected_set}`"),
                span,
            ));
            return None;
        }
        Some(id)
    }

    /// Resolve a scalar name or an indexed param read to its payload value.
    fn resolve_value(
        &mut self,
        expr: &KExpr,
        env: &Env,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<ParamValue> {
        match expr {
            KExpr::Name { name, span } => match self.params.get(name).cloned() {
                Some(value) => Some(value),
                None => {
                    diagnostics.push(Diagnostic::error(
                        "QSOL2201",
                        format!("no scenario value for `{name}`"),
                        span.clone(),
                    ));
                    None
                }
            },
            KExpr::ParamRead { name, args, span } => {
                let mut value = match self.params.get(name).cloned() {
                    Some(value) => value,
                    None => {
                        diagnostics.push(Diagnostic::error(
                            "QSOL2201",
                            format!("no scenario value for param `{name}`"),
                            span.clone(),
                        ));
                        return None;
                    }
                };
                let decl = self.problem.params.iter().find(|decl| &decl.name == name);
                let index_sets: Vec<String> = decl
                    .map(|decl| decl.indices.clone())
                    .unwrap_or_default();
                for (position, arg) in args.iter().enumerate() {
                    let key = match index_sets.get(position) {
                        Some(set) => {
                            let set = set.clone();
                            self.resolve_elem(arg, env, &set, diagnostics)?
                        }
                        None => self.resolve_key(arg, env, diagnostics)?,
                    };
                    value = match value {
                        ParamValue::Map(mut map) => match map.swap_remove(&key) {
                            Some(inner) => inner,
                            None => {
                                diagnostics.push(Diagnostic::error(
                                    "QSOL2201",
                                    format!("unknown index `{key}` for param `{name}`"),
                                    span.clone(),
                                ));
                                return None;
                            }
                        },
                        _ => {
                            diagnostics.push(Diagnostic::error(
                                "QSOL2201",
                                format!("param `{name}` is indexed deeper than its payload"),
                                span.clone(),
                            ));
                            return None;
                        }
                    };
                }
                Some(value)
            }
            _ => None,
        }
    }

    fn resolve_key(
        &mut self,
        expr: &KExpr,
        env: &Env,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Option<String> {
        match expr {
            KExpr::Name { name, .. } => Some(
                env.get(name)
                    .cloned()
                    .unwrap_or_else(|| name.clone()),
            ),
            KExpr::NumLit { value, .. } => Some(value.to_string()),
            other => {
                diagnostics.push(Diagnostic::error(
                    "QSOL2101",
                    "unsupported param index shape",
                    other.span().clone(),
                ));
                None
            }
        }
    }
}

fn fold_and(items: Vec<GBool>, span: Span) -> GBool {
    let mut out = Vec::new();
    for item in items {
        match item {
            GBool::Lit { value: true, .. } => {}
            GBool::Lit { value: false, .. } => return GBool::Lit { value: false, span },
            GBool::And { items: inner, .. } => out.extend(inner),
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return GBool::Lit { value: true, span };
    }
    if out.len() == 1 {
        if let Some(single) = out.pop() {
            return single;
        }
    }
    GBool::And { items: out, span }
}

fn fold_or(items: Vec<GBool>, span: Span) -> GBool {
    let mut out = Vec::new();
    for item in items {
        match item {
            GBool::Lit { value: false, .. } => {}
            GBool::Lit { value: true, .. } => return GBool::Lit { value: true, span },
            GBool::Or { items: inner, .. } => out.extend(inner),
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return GBool::Lit { value: false, span };
    }
    if out.len() == 1 {
        if let Some(single) = out.pop() {
            return single;
        }
    }
    GBool::Or { items: out, span }
}

fn fold_add(items: Vec<GNum>, span: Span) -> GNum {
    let mut constant = 0.0;
    let mut out = Vec::new();
    for item in items {
        match item {
            GNum::Const { value, .. } => constant += value,
            GNum::Add { items: inner, .. } => {
                for sub in inner {
                    match sub {
                        GNum::Const { value, .. } => constant += value,
                        other => out.push(other),
                    }
                }
            }
            other => out.push(other),
        }
    }
    if out.is_empty() {
        return GNum::Const {
            value: constant,
            span,
        };
    }
    if constant != 0.0 {
        out.push(GNum::Const {
            value: constant,
            span: span.clone(),
        });
    }
    if out.len() == 1 {
        if let Some(single) = out.pop() {
            return single;
        }
    }
    GNum::Add { items: out, span }
}

fn const_to_param_value(value: &KConst) -> ParamValue {
    match value {
        KConst::Bool(b) => ParamValue::Bool(*b),
        KConst::Num(n) => ParamValue::Num(*n),
        KConst::Str(s) => ParamValue::Str(s.clone()),
    }
}

fn expand_indexed_default(
    default: &ParamValue,
    dims: &[String],
    sets: &IndexMap<String, Vec<String>>,
) -> ParamValue {
    let Some(dim) = dims.first() else {
        return default.clone();
    };
    let elems = sets.get(dim).cloned().unwrap_or_default();
    let mut out = IndexMap::new();
    for elem in elems {
        out.insert(elem, expand_indexed_default(default, &dims[1..], sets));
    }
    ParamValue::Map(out)
}

fn check_shape(
    value: &ParamValue,
    dims: &[String],
    sets: &IndexMap<String, Vec<String>>,
) -> bool {
    let Some(dim) = dims.first() else {
        return !matches!(value, ParamValue::Map(_));
    };
    let ParamValue::Map(map) = value else {
        return false;
    };
    let mut expected: Vec<&String> = sets
        .get(dim)
        .map(|elems| elems.iter().collect())
        .unwrap_or_default();
    expected.sort();
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    if !expected.is_empty() && keys != expected {
        return false;
    }
    map.values().all(|inner| check_shape(inner, &dims[1..], sets))
}

/// Capability identifiers required by this problem, derived from the
/// Kernel IR shapes that survive to grounding. Idempotent and
/// deterministic.
pub fn required_capabilities(problem: &KProblem) -> Vec<String> {
    let mut capabilities = Vec::new();
    for find in &problem.finds {
        match find.unknown {
            KUnknownKind::Subset { .. } => push_unique(&mut capabilities, "unknown.subset.v1"),
            KUnknownKind::Mapping { .. } => push_unique(&mut capabilities, "unknown.mapping.v1"),
        }
    }
    for constraint in &problem.constraints {
        collect_expr_capabilities(&constraint.expr, &mut capabilities);
    }
    if let Some(objective) = &problem.objective {
        collect_expr_capabilities(&objective.expr, &mut capabilities);
    }
    capabilities.sort();
    capabilities
}

fn collect_expr_capabilities(expr: &KExpr, capabilities: &mut Vec<String>) {
    match expr {
        KExpr::Compare { op, left, right, .. } => {
            let capability = match op {
                KCompareOp::Eq => "constraint.compare.eq.v1",
                KCompareOp::Ne => "constraint.compare.ne.v1",
                KCompareOp::Lt => "constraint.compare.lt.v1",
                KCompareOp::Le => "constraint.compare.le.v1",
            };
            push_unique(capabilities, capability);
            collect_expr_capabilities(left, capabilities);
            collect_expr_capabilities(right, capabilities);
        }
        KExpr::Quantifier { kind, body, .. } => {
            push_unique(
                capabilities,
                match kind {
                    QuantKind::Forall => "constraint.quantifier.forall.v1",
                    QuantKind::Exists => "constraint.quantifier.exists.v1",
                },
            );
            collect_expr_capabilities(body, capabilities);
        }
        KExpr::If {
            cond,
            then_expr,
            else_expr,
            ..
        } => {
            push_unique(capabilities, "objective.if_then_else.v1");
            collect_expr_capabilities(cond, capabilities);
            collect_expr_capabilities(then_expr, capabilities);
            collect_expr_capabilities(else_expr, capabilities);
        }
        KExpr::Sum { term, .. } => {
            push_unique(capabilities, "objective.sum.v1");
            collect_expr_capabilities(term, capabilities);
        }
        KExpr::And { left, right, .. } => {
            push_unique(capabilities, "expression.bool.and.v1");
            collect_expr_capabilities(left, capabilities);
            collect_expr_capabilities(right, capabilities);
        }
        KExpr::Or { left, right, .. } => {
            push_unique(capabilities, "expression.bool.or.v1");
            collect_expr_capabilities(left, capabilities);
            collect_expr_capabilities(right, capabilities);
        }
        KExpr::Implies { left, right, .. } => {
            push_unique(capabilities, "expression.bool.implies.v1");
            collect_expr_capabilities(left, capabilities);
            collect_expr_capabilities(right, capabilities);
        }
        KExpr::Not { expr, .. } => {
            push_unique(capabilities, "expression.bool.not.v1");
            collect_expr_capabilities(expr, capabilities);
        }
        KExpr::Add { left, right, .. }
        | KExpr::Sub { left, right, .. }
        | KExpr::Mul { left, right, .. }
        | KExpr::Div { left, right, .. } => {
            collect_expr_capabilities(left, capabilities);
            collect_expr_capabilities(right, capabilities);
        }
        KExpr::Neg { expr, .. } => collect_expr_capabilities(expr, capabilities),
        KExpr::ParamRead { args, .. } | KExpr::MethodCall { args, .. } => {
            for arg in args {
                collect_expr_capabilities(arg, capabilities);
            }
        }
        KExpr::Name { .. }
        | KExpr::BoolLit { .. }
        | KExpr::NumLit { .. }
        | KExpr::SizeOf { .. } => {}
    }
}

fn push_unique(capabilities: &mut Vec<String>, capability: &str) {
    if !capabilities.iter().any(|existing| existing == capability) {
        capabilities.push(capability.to_string());
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use super::*;
    use crate::kernel::lower_symbolic;
    use crate::surface::{desugar_program, parse_program};

    fn ground(src: &str, scenario: serde_json::Value) -> GroundingResult {
        let program = parse_program(src, "test.qsol").expect("parse");
        let desugared = desugar_program(program);
        let kernel = lower_symbolic(&desugared).expect("lowering");
        let payload = ScenarioPayload::from_json(&scenario).expect("payload");
        ground_ir(&kernel, &payload, None)
    }

    const SUBSET_SUM: &str = indoc! {"
        problem P {
          set Items;
          find Pick : Subset(Items);
          must sum(if Pick.has(i) then 1 else 0 for i in Items) = 2;
        }
    "};

    #[test]
    fn expands_quantifiers_in_payload_order() {
        let result = ground(
            SUBSET_SUM,
            json!({"sets": {"Items": ["i2", "i1"]}, "params": {}}),
        );
        let ground = result.ground.expect("ground ir");
        let labels: Vec<&str> = ground.problems[0]
            .variables
            .iter()
            .map(|v| v.label.as_str())
            .collect();
        assert_eq!(labels, vec!["Pick.has[i2]", "Pick.has[i1]"]);
    }

    #[test]
    fn missing_set_is_a_scenario_error() {
        let result = ground(SUBSET_SUM, json!({"sets": {}, "params": {}}));
        assert!(result.ground.is_none());
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == "QSOL2201" && d.message.contains("missing set values")));
    }

    #[test]
    fn missing_required_param_is_reported() {
        let result = ground(
            indoc! {"
                problem P {
                  set A;
                  param Bound : Real;
                  find S : Subset(A);
                  must sum(if S.has(x) then 1 else 0 for x in A) <= Bound;
                }
            "},
            json!({"sets": {"A": ["a1"]}, "params": {}}),
        );
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == "QSOL2201" && d.message.contains("missing value for param")));
    }

    #[test]
    fn indexed_defaults_expand_over_sets() {
        let result = ground(
            indoc! {"
                problem P {
                  set A;
                  param Weight[A] : Real = 2;
                  find S : Subset(A);
                  must sum(if S.has(x) then Weight[x] else 0 for x in A) <= 4;
                }
            "},
            json!({"sets": {"A": ["a1", "a2"]}, "params": {}}),
        );
        assert!(
            result.diagnostics.is_empty(),
            "unexpected: {:?}",
            result.diagnostics
        );
    }

    #[test]
    fn elem_params_must_be_members_of_their_set() {
        let result = ground(
            indoc! {"
                problem P {
                  set V;
                  set E;
                  param U[E] : Elem(V);
                  find S : Subset(V);
                  must forall e in E: S.has(U[e]);
                }
            "},
            json!({
                "sets": {"V": ["v1"], "E": ["e1"]},
                "params": {"U": {"e1": "bogus"}},
            }),
        );
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == "QSOL2201" && d.message.contains("outside of set")));
    }

    #[test]
    fn empty_domains_fold_to_identities() {
        let result = ground(
            indoc! {"
                problem P {
                  set A;
                  find S : Subset(A);
                  must forall x in A: S.has(x);
                  must not (exists x in A: S.has(x));
                  must sum(if S.has(x) then 1 else 0 for x in A) = 0;
                }
            "},
            json!({"sets": {"A": []}, "params": {}}),
        );
        let ground = result.ground.expect("ground ir");
        let constraints = &ground.problems[0].constraints;
        // forall over empty is true, exists over empty is false.
        assert!(matches!(constraints[0].expr, GBool::Lit { value: true, .. }));
        assert!(matches!(constraints[1].expr, GBool::Lit { value: true, .. }));
        assert!(matches!(constraints[2].expr, GBool::Lit { value: true, .. }));
    }

    #[test]
    fn size_folds_to_a_constant() {
        let result = ground(
            "problem P { set A; must size(A) = 2; }",
            json!({"sets": {"A": ["a1", "a2"]}, "params": {}}),
        );
        let ground = result.ground.expect("ground ir");
        assert!(matches!(
            ground.problems[0].constraints[0].expr,
            GBool::Lit { value: true, .. }
        ));
    }

    #[test]
    fn capabilities_are_sorted_and_idempotent() {
        let run = || {
            let result = ground(
                SUBSET_SUM,
                json!({"sets": {"Items": ["i1", "i2"]}, "params": {}}),
            );
            result.ground.expect("ground ir").problems[0]
                .required_capabilities
                .clone()
        };
        let first = run();
        let second = run();
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort();
        assert_eq!(first, sorted);
        assert!(first.contains(&"unknown.subset.v1".to_string()));
        assert!(first.contains(&"constraint.compare.eq.v1".to_string()));
        assert!(first.contains(&"objective.sum.v1".to_string()));
    }

    #[test]
    fn cancellation_stops_expansion() {
        let token = CancelToken::new();
        token.cancel();
        let program = parse_program(SUBSET_SUM, "test.qsol").expect("parse");
        let desugared = desugar_program(program);
        let kernel = lower_symbolic(&desugared).expect("lowering");
        let payload = ScenarioPayload::from_json(
            &json!({"sets": {"Items": ["i1", "i2"]}, "params": {}}),
        )
        .expect("payload");
        let result = ground_ir(&kernel, &payload, Some(&token));
        assert!(result.ground.is_none());
    }
}
