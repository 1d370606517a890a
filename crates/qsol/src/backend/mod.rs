mod codegen;
mod export;
mod model;

pub use codegen::{
    compile_ground, is_internal_variable, CodegenResult, ModelStats, NICE_WEIGHT, SHOULD_WEIGHT,
};
pub use export::{
    bqm_to_json, cqm_to_json, explain_json, export_artifacts, ising_json, qubo_json,
    BackendArtifacts,
};
pub use model::{Bqm, Cqm, CqmConstraint, Poly, Sense, FEASIBILITY_TOLERANCE};

#[cfg(test)]
mod tests;
