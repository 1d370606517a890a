use serde::Serialize;

use crate::diagnostics::Span;

/// Constraint weight after lowering; `should` and `nice` become objective
/// penalties in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightKind {
    Hard,
    Should,
    Nice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KCompareOp {
    Eq,
    Ne,
    Lt,
    Le,
}

impl KCompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            KCompareOp::Eq => "=",
            KCompareOp::Ne => "!=",
            KCompareOp::Lt => "<",
            KCompareOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QuantKind {
    Forall,
    Exists,
}

#[derive(Debug, Clone, Serialize)]
pub struct KernelIr {
    pub problems: Vec<KProblem>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct KProblem {
    pub name: String,
    pub sets: Vec<KSetDecl>,
    pub params: Vec<KParamDecl>,
    pub finds: Vec<KFindDecl>,
    pub constraints: Vec<KConstraint>,
    pub objective: Option<KObjective>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct KSetDecl {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum KParamValue {
    Bool,
    Real,
    Int { lo: i64, hi: i64 },
    Elem { set: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KConst {
    Bool(bool),
    Num(f64),
    Str(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct KParamDecl {
    pub name: String,
    pub indices: Vec<String>,
    pub value: KParamValue,
    pub default: Option<KConst>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum KUnknownKind {
    Subset { set: String },
    Mapping { dom: String, cod: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct KFindDecl {
    pub name: String,
    pub unknown: KUnknownKind,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize)]
pub struct KConstraint {
    pub weight: WeightKind,
    pub expr: KExpr,
    pub span: Span,
}

/// Objective expression; always a minimization after lowering.
#[derive(Debug, Clone, Serialize)]
pub struct KObjective {
    pub expr: KExpr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KMethod {
    Has,
    Is,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum KExpr {
    Name {
        name: String,
        span: Span,
    },
    BoolLit {
        value: bool,
        span: Span,
    },
    NumLit {
        value: f64,
        span: Span,
    },
    Not {
        expr: Box<KExpr>,
        span: Span,
    },
    And {
        left: Box<KExpr>,
        right: Box<KExpr>,
        span: Span,
    },
    Or {
        left: Box<KExpr>,
        right: Box<KExpr>,
        span: Span,
    },
    Implies {
        left: Box<KExpr>,
        right: Box<KExpr>,
        span: Span,
    },
    Compare {
        op: KCompareOp,
        left: Box<KExpr>,
        right: Box<KExpr>,
        span: Span,
    },
    Add {
        left: Box<KExpr>,
        right: Box<KExpr>,
        span: Span,
    },
    Sub {
        left: Box<KExpr>,
        right: Box<KExpr>,
        span: Span,
    },
    Mul {
        left: Box<KExpr>,
        right: Box<KExpr>,
        span: Span,
    },
    Div {
        left: Box<KExpr>,
        right: Box<KExpr>,
        span: Span,
    },
    Neg {
        expr: Box<KExpr>,
        span: Span,
    },
    If {
        cond: Box<KExpr>,
        then_expr: Box<KExpr>,
        else_expr: Box<KExpr>,
        span: Span,
    },
    Quantifier {
        #[serde(rename = "quant_kind")]
        kind: QuantKind,
        var: String,
        domain: String,
        body: Box<KExpr>,
        span: Span,
    },
    Sum {
        term: Box<KExpr>,
        var: String,
        domain: String,
        span: Span,
    },
    /// `F.has(x)` / `F.is(a, b)` on a find named `target`.
    MethodCall {
        target: String,
        method: KMethod,
        args: Vec<KExpr>,
        span: Span,
    },
    /// Indexed parameter read `P[i, ...]`.
    ParamRead {
        name: String,
        args: Vec<KExpr>,
        span: Span,
    },
    /// `size(S)`; a constant after grounding.
    SizeOf {
        set: String,
        span: Span,
    },
}

impl KExpr {
    pub fn span(&self) -> &Span {
        match self {
            KExpr::Name { span, .. }
            | KExpr::BoolLit { span, .. }
            | KExpr::NumLit { span, .. }
            | KExpr::Not { span, .. }
            | KExpr::And { span, .. }
            | KExpr::Or { span, .. }
            | KExpr::Implies { span, .. }
            | KExpr::Compare { span, .. }
            | KExpr::Add { span, .. }
            | KExpr::Sub { span, .. }
            | KExpr::Mul { span, .. }
            | KExpr::Div { span, .. }
            | KExpr::Neg { span, .. }
            | KExpr::If { span, .. }
            | KExpr::Quantifier { span, .. }
            | KExpr::Sum { span, .. }
            | KExpr::MethodCall { span, .. }
            | KExpr::ParamRead { span, .. }
            | KExpr::SizeOf { span, .. } => span,
        }
    }
}
