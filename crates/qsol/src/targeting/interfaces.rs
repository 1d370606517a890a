use std::io;
use std::path::Path;

use indexmap::IndexMap;

use crate::backend::BackendArtifacts;
use crate::ground::GroundIr;
use crate::targeting::types::{
    CapabilityStatus, CompiledModel, RuntimeError, RuntimeRunOptions, StandardRunResult,
    SupportIssue, TargetSelection,
};

/// A backend turns a Ground IR into a compiled model and knows which
/// model features it can encode.
pub trait BackendPlugin: Send + Sync {
    fn plugin_id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn capability_catalog(&self) -> IndexMap<String, CapabilityStatus>;

    fn check_support(&self, ground: &GroundIr, required_capabilities: &[String])
        -> Vec<SupportIssue>;

    fn compile_model(&self, ground: &GroundIr) -> CompiledModel;

    fn export_model(
        &self,
        compiled_model: &CompiledModel,
        outdir: &Path,
        output_format: &str,
    ) -> io::Result<BackendArtifacts>;
}

/// A runtime executes a compiled model and produces a standard result.
pub trait RuntimePlugin: Send + Sync {
    fn plugin_id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn capability_catalog(&self) -> IndexMap<String, CapabilityStatus>;

    fn compatible_backend_ids(&self) -> Vec<String>;

    fn check_support(
        &self,
        compiled_model: &CompiledModel,
        selection: &TargetSelection,
    ) -> Vec<SupportIssue>;

    fn run_model(
        &self,
        compiled_model: &CompiledModel,
        selection: &TargetSelection,
        run_options: &RuntimeRunOptions,
    ) -> Result<StandardRunResult, RuntimeError>;
}

#[derive(Default)]
pub struct PluginBundle {
    pub backends: Vec<Box<dyn BackendPlugin>>,
    pub runtimes: Vec<Box<dyn RuntimePlugin>>,
}
