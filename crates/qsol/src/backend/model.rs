use indexmap::{IndexMap, IndexSet};

/// A polynomial of degree <= 2 over binary variables plus a constant
/// offset. Quadratic keys are stored with the pair in label order;
/// squares fold into the linear part because x^2 = x for binaries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Poly {
    pub offset: f64,
    pub linear: IndexMap<String, f64>,
    pub quadratic: IndexMap<(String, String), f64>,
}

/// Raised when a product would exceed quadratic degree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DegreeOverflow;

impl Poly {
    pub fn constant(value: f64) -> Poly {
        Poly {
            offset: value,
            ..Poly::default()
        }
    }

    pub fn var(label: &str) -> Poly {
        let mut poly = Poly::default();
        poly.add_linear(label, 1.0);
        poly
    }

    pub fn add_linear(&mut self, label: &str, coeff: f64) {
        let entry = self.linear.entry(label.to_string()).or_insert(0.0);
        *entry += coeff;
    }

    pub fn add_quadratic(&mut self, u: &str, v: &str, coeff: f64) {
        if u == v {
            self.add_linear(u, coeff);
            return;
        }
        let key = if u <= v {
            (u.to_string(), v.to_string())
        } else {
            (v.to_string(), u.to_string())
        };
        let entry = self.quadratic.entry(key).or_insert(0.0);
        *entry += coeff;
    }

    pub fn add(&mut self, other: &Poly) {
        self.offset += other.offset;
        for (label, coeff) in &other.linear {
            self.add_linear(label, *coeff);
        }
        for ((u, v), coeff) in &other.quadratic {
            self.add_quadratic(u, v, *coeff);
        }
    }

    pub fn sub(&mut self, other: &Poly) {
        let mut negated = other.clone();
        negated.scale(-1.0);
        self.add(&negated);
    }

    pub fn scale(&mut self, factor: f64) {
        self.offset *= factor;
        for coeff in self.linear.values_mut() {
            *coeff *= factor;
        }
        for coeff in self.quadratic.values_mut() {
            *coeff *= factor;
        }
    }

    pub fn is_affine(&self) -> bool {
        self.quadratic.values().all(|coeff| *coeff == 0.0)
    }

    pub fn is_constant(&self) -> bool {
        self.is_affine() && self.linear.values().all(|coeff| *coeff == 0.0)
    }

    pub fn degree(&self) -> u8 {
        if !self.is_affine() {
            2
        } else if !self.is_constant() {
            1
        } else {
            0
        }
    }

    pub fn mul(&self, other: &Poly) -> Result<Poly, DegreeOverflow> {
        if self.degree() + other.degree() > 2 {
            return Err(DegreeOverflow);
        }
        let mut out = Poly::constant(self.offset * other.offset);
        for (label, coeff) in &other.linear {
            out.add_linear(label, self.offset * coeff);
        }
        for ((u, v), coeff) in &other.quadratic {
            out.add_quadratic(u, v, self.offset * coeff);
        }
        for (label, coeff) in &self.linear {
            out.add_linear(label, other.offset * coeff);
            for (other_label, other_coeff) in &other.linear {
                out.add_quadratic(label, other_label, coeff * other_coeff);
            }
        }
        for ((u, v), coeff) in &self.quadratic {
            out.add_quadratic(u, v, other.offset * coeff);
        }
        Ok(out)
    }

    /// Square an affine polynomial; x^2 = x keeps the result quadratic.
    pub fn square_affine(&self) -> Result<Poly, DegreeOverflow> {
        if !self.is_affine() {
            return Err(DegreeOverflow);
        }
        self.mul(self)
    }

    /// Min and max of the polynomial over all binary assignments,
    /// treating every term independently (a safe outer bound).
    pub fn bounds(&self) -> (f64, f64) {
        let mut lo = self.offset;
        let mut hi = self.offset;
        for coeff in self.linear.values() {
            lo += coeff.min(0.0);
            hi += coeff.max(0.0);
        }
        for coeff in self.quadratic.values() {
            lo += coeff.min(0.0);
            hi += coeff.max(0.0);
        }
        (lo, hi)
    }

    pub fn abs_coefficient_sum(&self) -> f64 {
        self.linear.values().map(|c| c.abs()).sum::<f64>()
            + self.quadratic.values().map(|c| c.abs()).sum::<f64>()
    }

    pub fn evaluate(&self, sample: &IndexMap<String, u8>) -> f64 {
        let value_of = |label: &str| -> f64 {
            sample.get(label).copied().unwrap_or(0) as f64
        };
        let mut out = self.offset;
        for (label, coeff) in &self.linear {
            out += coeff * value_of(label);
        }
        for ((u, v), coeff) in &self.quadratic {
            out += coeff * value_of(u) * value_of(v);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Eq,
    Le,
    Ge,
}

impl Sense {
    pub fn symbol(self) -> &'static str {
        match self {
            Sense::Eq => "==",
            Sense::Le => "<=",
            Sense::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CqmConstraint {
    pub label: String,
    pub lhs: Poly,
    pub sense: Sense,
    pub rhs: f64,
}

/// Tolerance for checking a sample against CQM constraints; strict senses
/// already carry their epsilon in the constraint itself.
pub const FEASIBILITY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Default)]
pub struct Cqm {
    pub variables: IndexSet<String>,
    pub constraints: Vec<CqmConstraint>,
    pub objective: Poly,
}

impl Cqm {
    pub fn add_variable(&mut self, label: &str) {
        self.variables.insert(label.to_string());
    }

    /// Normalizes the constraint so the lhs carries no offset.
    pub fn add_constraint(&mut self, mut lhs: Poly, sense: Sense, mut rhs: f64, label: String) {
        rhs -= lhs.offset;
        lhs.offset = 0.0;
        for var in lhs.linear.keys() {
            self.variables.insert(var.clone());
        }
        for (u, v) in lhs.quadratic.keys() {
            self.variables.insert(u.clone());
            self.variables.insert(v.clone());
        }
        self.constraints.push(CqmConstraint {
            label,
            lhs,
            sense,
            rhs,
        });
    }

    pub fn is_feasible(&self, sample: &IndexMap<String, u8>) -> bool {
        self.constraints.iter().all(|constraint| {
            let value = constraint.lhs.evaluate(sample);
            match constraint.sense {
                Sense::Eq => (value - constraint.rhs).abs() <= FEASIBILITY_TOLERANCE,
                Sense::Le => value <= constraint.rhs + FEASIBILITY_TOLERANCE,
                Sense::Ge => value >= constraint.rhs - FEASIBILITY_TOLERANCE,
            }
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bqm {
    pub variables: IndexSet<String>,
    pub linear: IndexMap<String, f64>,
    pub quadratic: IndexMap<(String, String), f64>,
    pub offset: f64,
}

impl Bqm {
    pub fn add_poly(&mut self, poly: &Poly) {
        self.offset += poly.offset;
        for (label, coeff) in &poly.linear {
            self.variables.insert(label.clone());
            *self.linear.entry(label.clone()).or_insert(0.0) += coeff;
        }
        for ((u, v), coeff) in &poly.quadratic {
            self.variables.insert(u.clone());
            self.variables.insert(v.clone());
            *self.quadratic.entry((u.clone(), v.clone())).or_insert(0.0) += coeff;
        }
    }

    pub fn ensure_variable(&mut self, label: &str) {
        self.variables.insert(label.to_string());
        self.linear.entry(label.to_string()).or_insert(0.0);
    }

    pub fn energy(&self, sample: &IndexMap<String, u8>) -> f64 {
        let value_of = |label: &str| -> f64 {
            sample.get(label).copied().unwrap_or(0) as f64
        };
        let mut out = self.offset;
        for (label, coeff) in &self.linear {
            out += coeff * value_of(label);
        }
        for ((u, v), coeff) in &self.quadratic {
            out += coeff * value_of(u) * value_of(v);
        }
        out
    }

    pub fn num_interactions(&self) -> usize {
        self.quadratic.values().filter(|coeff| **coeff != 0.0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pairs: &[(&str, u8)]) -> IndexMap<String, u8> {
        pairs
            .iter()
            .map(|(label, value)| (label.to_string(), *value))
            .collect()
    }

    #[test]
    fn square_of_affine_uses_binary_idempotence() {
        let mut poly = Poly::constant(-2.0);
        poly.add_linear("a", 1.0);
        poly.add_linear("b", 1.0);
        let squared = poly.square_affine().expect("affine square");
        // (a + b - 2)^2 = a + b + 2ab - 4a - 4b + 4 = 4 - 3a - 3b + 2ab
        assert_eq!(squared.offset, 4.0);
        assert_eq!(squared.linear.get("a"), Some(&-3.0));
        assert_eq!(squared.linear.get("b"), Some(&-3.0));
        assert_eq!(
            squared.quadratic.get(&("a".to_string(), "b".to_string())),
            Some(&2.0)
        );
        assert_eq!(squared.evaluate(&sample(&[("a", 1), ("b", 1)])), 0.0);
        assert_eq!(squared.evaluate(&sample(&[("a", 0), ("b", 0)])), 4.0);
    }

    #[test]
    fn mul_rejects_cubic_products() {
        let mut quad = Poly::default();
        quad.add_quadratic("a", "b", 1.0);
        let lin = Poly::var("c");
        assert_eq!(quad.mul(&lin), Err(DegreeOverflow));
    }

    #[test]
    fn constraint_normalizes_offset_into_rhs() {
        let mut cqm = Cqm::default();
        let mut lhs = Poly::var("x");
        lhs.offset = 3.0;
        cqm.add_constraint(lhs, Sense::Eq, 4.0, "c".to_string());
        let constraint = &cqm.constraints[0];
        assert_eq!(constraint.rhs, 1.0);
        assert_eq!(constraint.lhs.offset, 0.0);
    }

    #[test]
    fn feasibility_respects_sense() {
        let mut cqm = Cqm::default();
        cqm.add_constraint(Poly::var("x"), Sense::Ge, 1.0, "c".to_string());
        assert!(cqm.is_feasible(&sample(&[("x", 1)])));
        assert!(!cqm.is_feasible(&sample(&[("x", 0)])));
    }
}
