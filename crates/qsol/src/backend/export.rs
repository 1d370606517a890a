use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::backend::codegen::{CodegenResult, ModelStats};
use crate::backend::model::{Bqm, Cqm};
use crate::diagnostics::Diagnostic;

#[derive(Debug, Clone, Default)]
pub struct BackendArtifacts {
    pub cqm_path: Option<PathBuf>,
    pub bqm_path: Option<PathBuf>,
    pub format_path: Option<PathBuf>,
    pub varmap_path: Option<PathBuf>,
    pub explain_path: Option<PathBuf>,
    pub stats: ModelStats,
}

/// Write the model artifacts into `outdir`: serialized CQM/BQM, the
/// requested flat format (`qubo.json` or `ising.json`), the varmap, and
/// the diagnostics explanation.
pub fn export_artifacts(
    outdir: &Path,
    output_format: &str,
    result: &CodegenResult,
) -> io::Result<BackendArtifacts> {
    fs::create_dir_all(outdir)?;
    let mut artifacts = BackendArtifacts {
        stats: result.stats,
        ..BackendArtifacts::default()
    };

    let cqm_path = outdir.join("model.cqm");
    write_json(&cqm_path, &cqm_to_json(&result.cqm))?;
    artifacts.cqm_path = Some(cqm_path);

    if let Some(bqm) = &result.bqm {
        let bqm_path = outdir.join("model.bqm");
        write_json(&bqm_path, &bqm_to_json(bqm))?;
        artifacts.bqm_path = Some(bqm_path);

        let (name, payload) = if output_format == "ising" {
            ("ising.json", ising_json(bqm))
        } else {
            ("qubo.json", qubo_json(bqm))
        };
        let format_path = outdir.join(name);
        write_json(&format_path, &payload)?;
        artifacts.format_path = Some(format_path);
    }

    let varmap_path = outdir.join("varmap.json");
    let mut varmap: Vec<(&String, &String)> = result.varmap.iter().collect();
    varmap.sort_by(|a, b| a.0.cmp(b.0));
    let varmap_payload: serde_json::Map<String, serde_json::Value> = varmap
        .into_iter()
        .map(|(label, meaning)| (label.clone(), json!(meaning)))
        .collect();
    write_json(&varmap_path, &serde_json::Value::Object(varmap_payload))?;
    artifacts.varmap_path = Some(varmap_path);

    let explain_path = outdir.join("explain.json");
    write_json(&explain_path, &explain_json(&result.diagnostics))?;
    artifacts.explain_path = Some(explain_path);

    Ok(artifacts)
}

pub fn explain_json(diagnostics: &[Diagnostic]) -> serde_json::Value {
    json!({
        "diagnostics": diagnostics
            .iter()
            .map(|diag| {
                json!({
                    "code": diag.code,
                    "message": diag.message,
                    "line": diag.span.line,
                    "col": diag.span.col,
                })
            })
            .collect::<Vec<_>>(),
    })
}

fn write_json(path: &Path, payload: &serde_json::Value) -> io::Result<()> {
    let text = serde_json::to_string_pretty(payload).map_err(io::Error::other)?;
    fs::write(path, text + "\n")
}

pub fn cqm_to_json(cqm: &Cqm) -> serde_json::Value {
    json!({
        "kind": "cqm",
        "variables": cqm.variables.iter().collect::<Vec<_>>(),
        "objective": poly_json(&cqm.objective),
        "constraints": cqm
            .constraints
            .iter()
            .map(|constraint| {
                json!({
                    "label": constraint.label,
                    "sense": constraint.sense.symbol(),
                    "rhs": constraint.rhs,
                    "lhs": poly_json(&constraint.lhs),
                })
            })
            .collect::<Vec<_>>(),
    })
}

pub fn bqm_to_json(bqm: &Bqm) -> serde_json::Value {
    json!({
        "kind": "bqm",
        "variables": bqm.variables.iter().collect::<Vec<_>>(),
        "offset": bqm.offset,
        "linear": bqm
            .linear
            .iter()
            .map(|(label, bias)| json!({"v": label, "bias": bias}))
            .collect::<Vec<_>>(),
        "quadratic": bqm
            .quadratic
            .iter()
            .map(|((u, v), bias)| json!({"u": u, "v": v, "bias": bias}))
            .collect::<Vec<_>>(),
    })
}

fn poly_json(poly: &crate::backend::model::Poly) -> serde_json::Value {
    json!({
        "offset": poly.offset,
        "linear": poly
            .linear
            .iter()
            .map(|(label, bias)| json!({"v": label, "bias": bias}))
            .collect::<Vec<_>>(),
        "quadratic": poly
            .quadratic
            .iter()
            .map(|((u, v), bias)| json!({"u": u, "v": v, "bias": bias}))
            .collect::<Vec<_>>(),
    })
}

/// `{offset, terms}` with linear entries encoded as `u == v`.
pub fn qubo_json(bqm: &Bqm) -> serde_json::Value {
    let mut terms: Vec<(String, String, f64)> = Vec::new();
    for (label, bias) in &bqm.linear {
        if *bias != 0.0 {
            terms.push((label.clone(), label.clone(), *bias));
        }
    }
    for ((u, v), bias) in &bqm.quadratic {
        if *bias != 0.0 {
            terms.push((u.clone(), v.clone(), *bias));
        }
    }
    terms.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    json!({
        "offset": bqm.offset,
        "terms": terms
            .into_iter()
            .map(|(u, v, bias)| json!({"u": u, "v": v, "bias": bias}))
            .collect::<Vec<_>>(),
    })
}

/// Spin-variable form via x = (s + 1) / 2.
pub fn ising_json(bqm: &Bqm) -> serde_json::Value {
    let mut offset = bqm.offset;
    let mut h: Vec<(String, f64)> = Vec::new();
    let mut j: Vec<(String, String, f64)> = Vec::new();

    let mut h_map: indexmap::IndexMap<String, f64> = indexmap::IndexMap::new();
    for (label, bias) in &bqm.linear {
        offset += bias / 2.0;
        *h_map.entry(label.clone()).or_insert(0.0) += bias / 2.0;
    }
    for ((u, v), bias) in &bqm.quadratic {
        offset += bias / 4.0;
        *h_map.entry(u.clone()).or_insert(0.0) += bias / 4.0;
        *h_map.entry(v.clone()).or_insert(0.0) += bias / 4.0;
        if *bias != 0.0 {
            j.push((u.clone(), v.clone(), bias / 4.0));
        }
    }
    for (label, bias) in h_map {
        h.push((label, bias));
    }
    h.sort_by(|a, b| a.0.cmp(&b.0));
    j.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));

    json!({
        "offset": offset,
        "h": h
            .into_iter()
            .map(|(label, bias)| json!({"v": label, "bias": bias}))
            .collect::<Vec<_>>(),
        "j": j
            .into_iter()
            .map(|(u, v, bias)| json!({"u": u, "v": v, "bias": bias}))
            .collect::<Vec<_>>(),
    })
}
