use indexmap::IndexMap;
use serde::Serialize;

use crate::backend::model::{Bqm, Cqm, Poly, Sense};
use crate::diagnostics::{Diagnostic, Span};
use crate::ground::{GBool, GNum, GroundIr, GroundProblem, COMPARE_EPSILON};
use crate::kernel::{KCompareOp, WeightKind};

pub const SHOULD_WEIGHT: f64 = 10.0;
pub const NICE_WEIGHT: f64 = 1.0;

/// Slack words are capped so a single inequality cannot blow up the
/// variable universe.
const MAX_SLACK_BITS: u32 = 24;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ModelStats {
    pub num_variables: usize,
    pub num_constraints: usize,
    pub num_interactions: usize,
}

#[derive(Debug)]
pub struct CodegenResult {
    pub cqm: Cqm,
    pub bqm: Option<Bqm>,
    pub varmap: IndexMap<String, String>,
    pub diagnostics: Vec<Diagnostic>,
    pub stats: ModelStats,
}

pub fn is_internal_variable(label: &str) -> bool {
    label.starts_with("aux:") || label.starts_with("slack_")
}

/// Emit the CQM for a ground program and derive the penalty-form BQM.
pub fn compile_ground(ground: &GroundIr) -> CodegenResult {
    let mut emitter = Emitter {
        cqm: Cqm::default(),
        varmap: IndexMap::new(),
        diagnostics: Vec::new(),
        aux_counter: 0,
        constraint_counter: 0,
    };

    let mut objective = Poly::default();
    for problem in &ground.problems {
        emitter.declare_variables(problem);
        emitter.emit_structural_laws(problem);
        for constraint in &problem.constraints {
            if constraint.weight == WeightKind::Hard {
                emitter.assert_bool(&constraint.expr, true);
            }
        }
        if let Some(expr) = &problem.objective {
            if let Some(poly) = emitter.num_poly(expr) {
                objective.add(&poly);
            }
        }
        for constraint in &problem.constraints {
            let weight = match constraint.weight {
                WeightKind::Hard => continue,
                WeightKind::Should => SHOULD_WEIGHT,
                WeightKind::Nice => NICE_WEIGHT,
            };
            match emitter.soft_penalty(&constraint.expr) {
                Some(mut penalty) => {
                    penalty.scale(weight);
                    objective.add(&penalty);
                }
                None => emitter.diagnostics.push(Diagnostic::error(
                    "QSOL3001",
                    "unsupported soft constraint",
                    constraint.span.clone(),
                )),
            }
        }
    }
    emitter.cqm.objective = objective;

    let has_errors = emitter.diagnostics.iter().any(Diagnostic::is_error);
    let fallback_span = ground.span.clone();
    let bqm = if has_errors {
        None
    } else {
        convert_to_bqm(&emitter.cqm, &fallback_span, &mut emitter.diagnostics)
    };

    let stats = ModelStats {
        num_variables: bqm
            .as_ref()
            .map(|bqm| bqm.variables.len())
            .unwrap_or_else(|| emitter.cqm.variables.len()),
        num_constraints: emitter.cqm.constraints.len(),
        num_interactions: bqm.as_ref().map(Bqm::num_interactions).unwrap_or(0),
    };

    CodegenResult {
        cqm: emitter.cqm,
        bqm,
        varmap: emitter.varmap,
        diagnostics: emitter.diagnostics,
        stats,
    }
}

struct Emitter {
    cqm: Cqm,
    varmap: IndexMap<String, String>,
    diagnostics: Vec<Diagnostic>,
    aux_counter: usize,
    constraint_counter: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EffectiveOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Emitter {
    fn declare_variables(&mut self, problem: &GroundProblem) {
        for variable in &problem.variables {
            self.cqm.add_variable(&variable.label);
            self.varmap
                .insert(variable.label.clone(), variable.meaning.clone());
        }
    }

    fn emit_structural_laws(&mut self, problem: &GroundProblem) {
        for group in &problem.one_hot_groups {
            let mut row = Poly::default();
            for label in &group.labels {
                row.add_linear(label, 1.0);
            }
            self.cqm.add_constraint(
                row,
                Sense::Eq,
                1.0,
                format!("implicit_exactly_one:{}:{}", group.find, group.elem),
            );
        }
    }

    fn constraint_label(&mut self, span: &Span) -> String {
        self.constraint_counter += 1;
        format!(
            "c:{}:{}:{}:{}:{}",
            span.line, span.col, span.end_line, span.end_col, self.constraint_counter
        )
    }

    fn fresh_aux(&mut self) -> String {
        let label = format!("aux:{}", self.aux_counter);
        self.aux_counter += 1;
        self.cqm.add_variable(&label);
        label
    }

    fn unsupported(&mut self, span: &Span, message: &str) {
        self.diagnostics
            .push(Diagnostic::error("QSOL3001", message, span.clone()));
    }

    /// Assert a grounded boolean expression as a hard constraint.
    /// Negations flip the polarity instead of allocating variables, so
    /// the common shapes (atoms, `not (a and b)`, implications between
    /// atoms) emit plain linear constraints without auxiliaries.
    fn assert_bool(&mut self, expr: &GBool, polarity: bool) {
        match expr {
            GBool::Lit { value, span } => {
                if *value != polarity {
                    let label = self.constraint_label(span);
                    self.cqm
                        .add_constraint(Poly::default(), Sense::Eq, 1.0, label);
                }
            }
            GBool::Var { label, span } => {
                let constraint_label = self.constraint_label(span);
                self.cqm.add_constraint(
                    Poly::var(label),
                    Sense::Eq,
                    if polarity { 1.0 } else { 0.0 },
                    constraint_label,
                );
            }
            GBool::Not { expr, .. } => self.assert_bool(expr, !polarity),
            GBool::And { items, span } => {
                if polarity {
                    for item in items {
                        self.assert_bool(item, true);
                    }
                    return;
                }
                // At least one conjunct is false.
                let mut sum = Poly::default();
                for item in items {
                    let Some(truth) = self.truth_affine(item) else {
                        return;
                    };
                    sum.add(&truth);
                }
                let label = self.constraint_label(span);
                self.cqm
                    .add_constraint(sum, Sense::Le, items.len() as f64 - 1.0, label);
            }
            GBool::Or { items, span } => {
                if !polarity {
                    for item in items {
                        self.assert_bool(item, false);
                    }
                    return;
                }
                let mut sum = Poly::default();
                for item in items {
                    let Some(truth) = self.truth_affine(item) else {
                        return;
                    };
                    sum.add(&truth);
                }
                let label = self.constraint_label(span);
                self.cqm.add_constraint(sum, Sense::Ge, 1.0, label);
            }
            GBool::Implies { left, right, span } => {
                if polarity {
                    let Some(lhs) = self.truth_affine(left) else {
                        return;
                    };
                    let Some(rhs) = self.truth_affine(right) else {
                        return;
                    };
                    let mut diff = lhs;
                    diff.sub(&rhs);
                    let label = self.constraint_label(span);
                    self.cqm.add_constraint(diff, Sense::Le, 0.0, label);
                } else {
                    self.assert_bool(left, true);
                    self.assert_bool(right, false);
                }
            }
            GBool::Compare {
                op,
                left,
                right,
                span,
            } => self.emit_compare(*op, left, right, span, polarity),
        }
    }

    fn emit_compare(
        &mut self,
        op: KCompareOp,
        left: &GNum,
        right: &GNum,
        span: &Span,
        polarity: bool,
    ) {
        let effective = match (op, polarity) {
            (KCompareOp::Eq, true) | (KCompareOp::Ne, false) => EffectiveOp::Eq,
            (KCompareOp::Eq, false) | (KCompareOp::Ne, true) => EffectiveOp::Ne,
            (KCompareOp::Lt, true) => EffectiveOp::Lt,
            (KCompareOp::Lt, false) => EffectiveOp::Ge,
            (KCompareOp::Le, true) => EffectiveOp::Le,
            (KCompareOp::Le, false) => EffectiveOp::Gt,
        };
        let Some(lhs) = self.num_poly(left) else {
            return;
        };
        let Some(rhs) = self.num_poly(right) else {
            return;
        };
        let mut diff = lhs;
        diff.sub(&rhs);
        let label = self.constraint_label(span);
        match effective {
            EffectiveOp::Eq => self.cqm.add_constraint(diff, Sense::Eq, 0.0, label),
            EffectiveOp::Le => self.cqm.add_constraint(diff, Sense::Le, 0.0, label),
            EffectiveOp::Lt => {
                self.cqm
                    .add_constraint(diff, Sense::Le, -COMPARE_EPSILON, label)
            }
            EffectiveOp::Gt => {
                self.cqm
                    .add_constraint(diff, Sense::Ge, COMPARE_EPSILON, label)
            }
            EffectiveOp::Ge => {
                self.cqm
                    .add_constraint(diff, Sense::Ge, -COMPARE_EPSILON, label)
            }
            EffectiveOp::Ne => {
                let Ok(squared) = diff.square_affine() else {
                    self.unsupported(
                        span,
                        "`!=` requires an affine difference; this shape exceeds quadratic degree",
                    );
                    return;
                };
                self.cqm
                    .add_constraint(squared, Sense::Ge, COMPARE_EPSILON, label);
            }
        }
    }

    /// An affine 0/1-valued polynomial equal to the truth value of the
    /// expression, allocating `aux:` binaries (with their defining
    /// constraints) for composite shapes.
    fn truth_affine(&mut self, expr: &GBool) -> Option<Poly> {
        match expr {
            GBool::Lit { value, .. } => Some(Poly::constant(f64::from(*value))),
            GBool::Var { label, .. } => Some(Poly::var(label)),
            GBool::Not { expr, .. } => {
                let inner = self.truth_affine(expr)?;
                let mut out = Poly::constant(1.0);
                out.sub(&inner);
                Some(out)
            }
            GBool::And { items, span } => {
                let truths: Vec<Poly> = items
                    .iter()
                    .map(|item| self.truth_affine(item))
                    .collect::<Option<_>>()?;
                if truths.len() == 1 {
                    return truths.into_iter().next();
                }
                Some(self.and_gadget(&truths, span))
            }
            GBool::Or { items, span } => {
                let truths: Vec<Poly> = items
                    .iter()
                    .map(|item| self.truth_affine(item))
                    .collect::<Option<_>>()?;
                if truths.len() == 1 {
                    return truths.into_iter().next();
                }
                Some(self.or_gadget(&truths, span))
            }
            GBool::Implies { left, right, span } => {
                // a => b is (not a) or b.
                let not_left = {
                    let inner = self.truth_affine(left)?;
                    let mut out = Poly::constant(1.0);
                    out.sub(&inner);
                    out
                };
                let right = self.truth_affine(right)?;
                Some(self.or_gadget(&[not_left, right], span))
            }
            GBool::Compare {
                op,
                left,
                right,
                span,
            } => self.compare_indicator(*op, left, right, span),
        }
    }

    /// z = AND(t_i): z <= t_i and z >= sum(t_i) - (n - 1).
    fn and_gadget(&mut self, truths: &[Poly], span: &Span) -> Poly {
        let aux = self.fresh_aux();
        let z = Poly::var(&aux);
        for truth in truths {
            let mut diff = z.clone();
            diff.sub(truth);
            let label = self.constraint_label(span);
            self.cqm.add_constraint(diff, Sense::Le, 0.0, label);
        }
        let mut sum = Poly::default();
        for truth in truths {
            sum.add(truth);
        }
        sum.sub(&z);
        let label = self.constraint_label(span);
        self.cqm
            .add_constraint(sum, Sense::Le, truths.len() as f64 - 1.0, label);
        z
    }

    /// z = OR(t_i): z >= t_i and z <= sum(t_i).
    fn or_gadget(&mut self, truths: &[Poly], span: &Span) -> Poly {
        let aux = self.fresh_aux();
        let z = Poly::var(&aux);
        for truth in truths {
            let mut diff = truth.clone();
            diff.sub(&z);
            let label = self.constraint_label(span);
            self.cqm.add_constraint(diff, Sense::Le, 0.0, label);
        }
        let mut sum = z.clone();
        for truth in truths {
            sum.sub(truth);
        }
        let label = self.constraint_label(span);
        self.cqm.add_constraint(sum, Sense::Le, 0.0, label);
        z
    }

    /// Indicator binary z with z = 1 iff `left op right`, big-M linked.
    /// Values exactly on the epsilon boundary are left indeterminate.
    fn compare_indicator(
        &mut self,
        op: KCompareOp,
        left: &GNum,
        right: &GNum,
        span: &Span,
    ) -> Option<Poly> {
        let lhs = self.num_poly(left)?;
        let rhs = self.num_poly(right)?;
        let mut diff = lhs;
        diff.sub(&rhs);
        if !diff.is_affine() {
            self.unsupported(
                span,
                "comparison inside a boolean expression must have an affine difference",
            );
            return None;
        }
        if diff.is_constant() {
            let value = match op {
                KCompareOp::Eq => diff.offset.abs() <= COMPARE_EPSILON,
                KCompareOp::Ne => diff.offset.abs() > COMPARE_EPSILON,
                KCompareOp::Lt => diff.offset <= -COMPARE_EPSILON,
                KCompareOp::Le => diff.offset <= COMPARE_EPSILON,
            };
            return Some(Poly::constant(f64::from(value)));
        }

        match op {
            KCompareOp::Le => Some(self.le_indicator(diff, COMPARE_EPSILON, span)),
            KCompareOp::Lt => Some(self.le_indicator(diff, -COMPARE_EPSILON, span)),
            KCompareOp::Eq => {
                // |d| <= eps is (d <= eps) and (-d <= eps).
                let le_hi = self.le_indicator(diff.clone(), COMPARE_EPSILON, span);
                let mut negated = diff;
                negated.scale(-1.0);
                let le_lo = self.le_indicator(negated, COMPARE_EPSILON, span);
                Some(self.and_gadget(&[le_hi, le_lo], span))
            }
            KCompareOp::Ne => {
                let le_hi = self.le_indicator(diff.clone(), COMPARE_EPSILON, span);
                let mut negated = diff;
                negated.scale(-1.0);
                let le_lo = self.le_indicator(negated, COMPARE_EPSILON, span);
                let eq = self.and_gadget(&[le_hi, le_lo], span);
                let mut out = Poly::constant(1.0);
                out.sub(&eq);
                Some(out)
            }
        }
    }

    /// z = 1 iff d <= threshold: d + (hi - t) z <= hi and -d + (lo - t) z <= -t.
    fn le_indicator(&mut self, d: Poly, threshold: f64, span: &Span) -> Poly {
        let (lo, hi) = d.bounds();
        let aux = self.fresh_aux();
        let z = Poly::var(&aux);

        let mut upper = d.clone();
        let mut scaled = z.clone();
        scaled.scale(hi - threshold);
        upper.add(&scaled);
        let label = self.constraint_label(span);
        self.cqm.add_constraint(upper, Sense::Le, hi, label);

        let mut lower = d;
        lower.scale(-1.0);
        let mut scaled = z.clone();
        scaled.scale(lo - threshold);
        lower.add(&scaled);
        let label = self.constraint_label(span);
        self.cqm.add_constraint(lower, Sense::Le, -threshold, label);
        z
    }

    /// Product-form 0/1 truth polynomial used for soft penalties and
    /// numeric conditionals; no auxiliary variables, so degree can run
    /// out on deeply nested shapes.
    fn truth_poly(&mut self, expr: &GBool) -> Option<Poly> {
        match expr {
            GBool::Lit { value, .. } => Some(Poly::constant(f64::from(*value))),
            GBool::Var { label, .. } => Some(Poly::var(label)),
            GBool::Not { expr, .. } => {
                let inner = self.truth_poly(expr)?;
                let mut out = Poly::constant(1.0);
                out.sub(&inner);
                Some(out)
            }
            GBool::And { items, span } => {
                let mut out = Poly::constant(1.0);
                for item in items {
                    let truth = self.truth_poly(item)?;
                    out = match out.mul(&truth) {
                        Ok(product) => product,
                        Err(_) => {
                            self.unsupported(span, "conjunction exceeds quadratic degree");
                            return None;
                        }
                    };
                }
                Some(out)
            }
            GBool::Or { items, span } => {
                // a or b = a + b - ab, folded pairwise.
                let mut out = Poly::constant(0.0);
                for item in items {
                    let truth = self.truth_poly(item)?;
                    let product = match out.mul(&truth) {
                        Ok(product) => product,
                        Err(_) => {
                            self.unsupported(span, "disjunction exceeds quadratic degree");
                            return None;
                        }
                    };
                    out.add(&truth);
                    out.sub(&product);
                }
                Some(out)
            }
            GBool::Implies { left, right, span } => {
                let lhs = self.truth_poly(left)?;
                let rhs = self.truth_poly(right)?;
                let product = match lhs.mul(&rhs) {
                    Ok(product) => product,
                    Err(_) => {
                        self.unsupported(span, "implication exceeds quadratic degree");
                        return None;
                    }
                };
                let mut out = Poly::constant(1.0);
                out.sub(&lhs);
                out.add(&product);
                Some(out)
            }
            GBool::Compare {
                op,
                left,
                right,
                span,
            } => {
                let lhs = self.num_poly(left)?;
                let rhs = self.num_poly(right)?;
                let mut diff = lhs;
                diff.sub(&rhs);
                let Ok(squared) = diff.square_affine() else {
                    self.unsupported(span, "comparison exceeds quadratic degree");
                    return None;
                };
                match op {
                    KCompareOp::Eq => {
                        let mut out = Poly::constant(1.0);
                        out.sub(&squared);
                        Some(out)
                    }
                    KCompareOp::Ne => Some(squared),
                    KCompareOp::Lt | KCompareOp::Le => {
                        self.unsupported(
                            span,
                            "ordered comparison has no penalty form; use a hard constraint",
                        );
                        None
                    }
                }
            }
        }
    }

    /// Squared-violation penalty for a soft constraint. Conjunctions sum
    /// their member penalties, which is what makes quantified `should`
    /// constraints accumulate one unit per violated instance.
    fn soft_penalty(&mut self, expr: &GBool) -> Option<Poly> {
        match expr {
            GBool::And { items, .. } => {
                let mut out = Poly::default();
                for item in items {
                    out.add(&self.soft_penalty(item)?);
                }
                Some(out)
            }
            other => {
                let truth = self.truth_poly(other)?;
                let mut out = Poly::constant(1.0);
                out.sub(&truth);
                Some(out)
            }
        }
    }

    fn num_poly(&mut self, expr: &GNum) -> Option<Poly> {
        match expr {
            GNum::Const { value, .. } => Some(Poly::constant(*value)),
            GNum::Var { label, .. } => Some(Poly::var(label)),
            GNum::FromBool { expr, .. } => self.truth_poly(expr),
            GNum::Add { items, .. } => {
                let mut out = Poly::default();
                for item in items {
                    out.add(&self.num_poly(item)?);
                }
                Some(out)
            }
            GNum::Sub { left, right, .. } => {
                let mut out = self.num_poly(left)?;
                out.sub(&self.num_poly(right)?);
                Some(out)
            }
            GNum::Mul { left, right, span } => {
                let lhs = self.num_poly(left)?;
                let rhs = self.num_poly(right)?;
                match lhs.mul(&rhs) {
                    Ok(product) => Some(product),
                    Err(_) => {
                        self.unsupported(span, "product exceeds quadratic degree");
                        None
                    }
                }
            }
            GNum::Div { left, right, span } => {
                let rhs = self.num_poly(right)?;
                if !rhs.is_constant() {
                    self.unsupported(span, "division by a non-constant expression");
                    return None;
                }
                if rhs.offset == 0.0 {
                    self.unsupported(span, "division by zero");
                    return None;
                }
                let mut out = self.num_poly(left)?;
                out.scale(1.0 / rhs.offset);
                Some(out)
            }
            GNum::Neg { expr, .. } => {
                let mut out = self.num_poly(expr)?;
                out.scale(-1.0);
                Some(out)
            }
            GNum::If {
                cond,
                then_expr,
                else_expr,
                span,
            } => {
                // c*a + (1-c)*b with the degree-2 cap.
                let truth = self.truth_poly(cond)?;
                let then_poly = self.num_poly(then_expr)?;
                let else_poly = self.num_poly(else_expr)?;
                let mut complement = Poly::constant(1.0);
                complement.sub(&truth);
                let (Ok(then_part), Ok(else_part)) =
                    (truth.mul(&then_poly), complement.mul(&else_poly))
                else {
                    self.unsupported(span, "conditional branches exceed quadratic degree");
                    return None;
                };
                let mut out = then_part;
                out.add(&else_part);
                Some(out)
            }
        }
    }
}

/// Convert every CQM constraint into a quadratic penalty on top of the
/// objective. `M` dominates any objective swing: ten times the absolute
/// coefficient mass of the objective, at least 10.
fn convert_to_bqm(
    cqm: &Cqm,
    fallback_span: &Span,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Bqm> {
    let m = 10.0 * cqm.objective.abs_coefficient_sum().max(1.0);
    let mut bqm = Bqm::default();
    bqm.add_poly(&cqm.objective);
    let mut slack_counter = 0usize;
    let mut failed = false;

    for constraint in &cqm.constraints {
        // Residual is lhs - rhs; feasible assignments satisfy
        // `residual (sense) 0`.
        let mut residual = constraint.lhs.clone();
        residual.offset -= constraint.rhs;
        match constraint.sense {
            Sense::Eq => {
                if let Ok(mut squared) = residual.square_affine() {
                    squared.scale(m);
                    bqm.add_poly(&squared);
                    continue;
                }
                // Quadratic equality to zero with nonnegative terms: the
                // lhs itself is the violation count.
                let nonneg = constraint.lhs.linear.values().all(|c| *c >= 0.0)
                    && constraint.lhs.quadratic.values().all(|c| *c >= 0.0);
                if constraint.rhs == 0.0 && nonneg {
                    let mut penalty = constraint.lhs.clone();
                    penalty.scale(m);
                    bqm.add_poly(&penalty);
                    continue;
                }
                diagnostics.push(
                    Diagnostic::error(
                        "QSOL3001",
                        "equality constraint cannot be converted to a quadratic penalty",
                        fallback_span.clone(),
                    )
                    .with_note(format!("constraint `{}`", constraint.label)),
                );
                failed = true;
            }
            Sense::Le | Sense::Ge => {
                let mut residual = residual;
                if constraint.sense == Sense::Ge {
                    residual.scale(-1.0);
                }
                if !residual.is_affine() {
                    // The one quadratic inequality codegen emits is the
                    // `!=` indicator `(L-R)^2 >= eps` whose lhs is 0/1
                    // valued; penalize its complement.
                    let (lo, hi) = constraint.lhs.bounds();
                    if constraint.sense == Sense::Ge
                        && constraint.rhs > 0.0
                        && lo >= -1e-9
                        && hi <= 1.0 + 1e-9
                    {
                        let mut penalty = Poly::constant(1.0);
                        penalty.sub(&constraint.lhs);
                        penalty.scale(m);
                        bqm.add_poly(&penalty);
                        continue;
                    }
                    diagnostics.push(
                        Diagnostic::error(
                            "QSOL3001",
                            "inequality constraint cannot be converted to a quadratic penalty",
                            fallback_span.clone(),
                        )
                        .with_note(format!("constraint `{}`", constraint.label)),
                    );
                    failed = true;
                    continue;
                }
                let (lo, hi) = residual.bounds();
                if hi <= 0.0 {
                    continue;
                }
                // residual + slack = 0 for some slack in [0, -lo].
                let capacity = (-lo).max(0.0).ceil() as u64;
                let bits = 64 - capacity.leading_zeros();
                if bits > MAX_SLACK_BITS {
                    diagnostics.push(
                        Diagnostic::error(
                            "QSOL3001",
                            "inequality slack range is too large for penalty conversion",
                            fallback_span.clone(),
                        )
                        .with_note(format!("constraint `{}`", constraint.label)),
                    );
                    failed = true;
                    continue;
                }
                let mut with_slack = residual;
                for bit in 0..bits {
                    let label = format!("slack_{slack_counter}");
                    slack_counter += 1;
                    bqm.ensure_variable(&label);
                    with_slack.add_linear(&label, (1u64 << bit) as f64);
                }
                match with_slack.square_affine() {
                    Ok(mut squared) => {
                        squared.scale(m);
                        bqm.add_poly(&squared);
                    }
                    Err(_) => {
                        diagnostics.push(
                            Diagnostic::error(
                                "QSOL3001",
                                "inequality constraint cannot be converted to a quadratic penalty",
                                fallback_span.clone(),
                            )
                            .with_note(format!("constraint `{}`", constraint.label)),
                        );
                        failed = true;
                    }
                }
            }
        }
    }

    for label in &cqm.variables {
        bqm.ensure_variable(label);
    }

    if failed {
        None
    } else {
        Some(bqm)
    }
}
