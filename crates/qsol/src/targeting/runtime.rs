use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;

use crate::backend::is_internal_variable;
use crate::targeting::types::{CompiledModel, RawSample, RuntimeError, SelectedAssignment};

pub type SampleSignature = Vec<(String, u8)>;

pub fn sample_signature(sample: &IndexMap<String, u8>) -> SampleSignature {
    let mut out: SampleSignature = sample
        .iter()
        .map(|(label, value)| (label.clone(), *value))
        .collect();
    out.sort();
    out
}

/// The varmap-decodable projection of a sample: primary binaries only.
fn primary_signature(sample: &IndexMap<String, u8>) -> SampleSignature {
    let mut out: SampleSignature = sample
        .iter()
        .filter(|(label, _)| !is_internal_variable(label))
        .map(|(label, value)| (label.clone(), *value))
        .collect();
    out.sort();
    out
}

pub fn selected_assignments_for_sample(
    sample: &IndexMap<String, u8>,
    varmap: &IndexMap<String, String>,
) -> Vec<SelectedAssignment> {
    let mut out = Vec::new();
    let mut labels: Vec<&String> = sample.keys().collect();
    labels.sort();
    for label in labels {
        let value = sample[label];
        if value != 1 || is_internal_variable(label) {
            continue;
        }
        let Some(meaning) = varmap.get(label) else {
            continue;
        };
        out.push(SelectedAssignment {
            variable: label.clone(),
            meaning: meaning.clone(),
            value,
        });
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct RankedSolution {
    pub rank: usize,
    pub energy: f64,
    pub num_occurrences: u32,
    pub sample: IndexMap<String, u8>,
    pub selected_assignments: Vec<SelectedAssignment>,
}

/// Rank raw runtime samples: keep CQM-feasible ones, deduplicate on the
/// primary-variable projection (keeping the lowest-energy witness), sort
/// by energy then canonical signature, and take the best `requested`.
pub fn collect_ranked_solutions(
    samples: &[RawSample],
    model: &CompiledModel,
    requested: usize,
) -> Vec<RankedSolution> {
    let mut best: IndexMap<SampleSignature, (f64, SampleSignature, u32, IndexMap<String, u8>)> =
        IndexMap::new();

    for raw in samples {
        if !model.cqm.is_feasible(&raw.sample) {
            continue;
        }
        let key = primary_signature(&raw.sample);
        let full = sample_signature(&raw.sample);
        match best.entry(key) {
            indexmap::map::Entry::Occupied(mut entry) => {
                let existing = entry.get_mut();
                existing.2 += raw.num_occurrences;
                if (raw.energy, &full) < (existing.0, &existing.1) {
                    existing.0 = raw.energy;
                    existing.1 = full;
                    existing.3 = raw.sample.clone();
                }
            }
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert((raw.energy, full, raw.num_occurrences, raw.sample.clone()));
            }
        }
    }

    let mut rows: Vec<(f64, SampleSignature, u32, IndexMap<String, u8>)> =
        best.into_values().collect();
    rows.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut ranked = Vec::new();
    for (rank, (energy, _signature, occurrences, sample)) in rows.into_iter().enumerate() {
        if ranked.len() >= requested {
            break;
        }
        let selected = selected_assignments_for_sample(&sample, &model.varmap);
        ranked.push(RankedSolution {
            rank: rank + 1,
            energy,
            num_occurrences: occurrences,
            sample,
            selected_assignments: selected,
        });
    }
    ranked
}

/// Inclusive `[energy_min, energy_max]` check over every returned
/// solution; violations are reported per rank.
pub fn evaluate_energy_thresholds(
    solutions: &[RankedSolution],
    energy_min: Option<f64>,
    energy_max: Option<f64>,
) -> (bool, Vec<serde_json::Value>) {
    let mut violations = Vec::new();
    for solution in solutions {
        let mut reasons = Vec::new();
        if let Some(min) = energy_min {
            if solution.energy < min {
                reasons.push(format!(
                    "energy {} is lower than minimum {min}",
                    solution.energy
                ));
            }
        }
        if let Some(max) = energy_max {
            if solution.energy > max {
                reasons.push(format!(
                    "energy {} is higher than maximum {max}",
                    solution.energy
                ));
            }
        }
        if !reasons.is_empty() {
            violations.push(json!({
                "rank": solution.rank,
                "energy": solution.energy,
                "reasons": reasons,
            }));
        }
    }
    (violations.is_empty(), violations)
}

// --- runtime option parsing --------------------------------------------

pub fn int_option(
    params: &IndexMap<String, serde_json::Value>,
    key: &str,
    default: u64,
) -> Result<u64, RuntimeError> {
    let Some(raw) = params.get(key) else {
        return Ok(default);
    };
    match raw.as_u64() {
        Some(value) if value >= 1 => Ok(value),
        _ => Err(RuntimeError::execution(format!(
            "runtime option `{key}` must be an integer >= 1"
        ))),
    }
}

pub fn optional_float_option(
    params: &IndexMap<String, serde_json::Value>,
    key: &str,
) -> Result<Option<f64>, RuntimeError> {
    let Some(raw) = params.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    match raw.as_f64() {
        Some(value) => Ok(Some(value)),
        None => Err(RuntimeError::execution(format!(
            "runtime option `{key}` must be a number when provided"
        ))),
    }
}

pub fn optional_int_option(
    params: &IndexMap<String, serde_json::Value>,
    key: &str,
) -> Result<Option<u64>, RuntimeError> {
    let Some(raw) = params.get(key) else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(None);
    }
    match raw.as_u64() {
        Some(value) => Ok(Some(value)),
        None => Err(RuntimeError::execution(format!(
            "runtime option `{key}` must be an integer when provided"
        ))),
    }
}

/// Merge runtime option layers, weakest first; later layers win key by
/// key. The caller supplies them in the documented precedence order.
pub fn merge_runtime_options(
    layers: &[&IndexMap<String, serde_json::Value>],
) -> IndexMap<String, serde_json::Value> {
    let mut out = IndexMap::new();
    for layer in layers {
        for (key, value) in layer.iter() {
            out.insert(key.clone(), value.clone());
        }
    }
    out
}
