use indexmap::IndexMap;

use crate::targeting::interfaces::{BackendPlugin, PluginBundle, RuntimePlugin};
use crate::targeting::plugins::builtin_plugin_bundle;
use crate::targeting::types::{IssueStage, SupportIssue};

/// Process-wide plugin registry. Built-ins register first, then
/// caller-supplied bundles (config before CLI) in stable order; duplicate
/// ids fail registration.
#[derive(Default)]
pub struct PluginRegistry {
    backends: IndexMap<String, Box<dyn BackendPlugin>>,
    runtimes: IndexMap<String, Box<dyn RuntimePlugin>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("runtimes", &self.runtimes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginRegistry {
    pub fn from_discovery(extra_bundles: Vec<PluginBundle>) -> Result<Self, SupportIssue> {
        let mut registry = PluginRegistry::default();
        registry.register_bundle(builtin_plugin_bundle())?;
        for bundle in extra_bundles {
            registry.register_bundle(bundle)?;
        }
        Ok(registry)
    }

    pub fn register_bundle(&mut self, bundle: PluginBundle) -> Result<(), SupportIssue> {
        for backend in bundle.backends {
            self.register_backend(backend)?;
        }
        for runtime in bundle.runtimes {
            self.register_runtime(runtime)?;
        }
        Ok(())
    }

    pub fn register_backend(&mut self, plugin: Box<dyn BackendPlugin>) -> Result<(), SupportIssue> {
        let plugin_id = plugin.plugin_id().to_string();
        if self.backends.contains_key(&plugin_id) {
            return Err(SupportIssue::new(
                "QSOL4009",
                format!("duplicate backend plugin id: {plugin_id}"),
                IssueStage::Resolution,
            ));
        }
        self.backends.insert(plugin_id, plugin);
        Ok(())
    }

    pub fn register_runtime(&mut self, plugin: Box<dyn RuntimePlugin>) -> Result<(), SupportIssue> {
        let plugin_id = plugin.plugin_id().to_string();
        if self.runtimes.contains_key(&plugin_id) {
            return Err(SupportIssue::new(
                "QSOL4009",
                format!("duplicate runtime plugin id: {plugin_id}"),
                IssueStage::Resolution,
            ));
        }
        self.runtimes.insert(plugin_id, plugin);
        Ok(())
    }

    pub fn backend(&self, plugin_id: &str) -> Option<&dyn BackendPlugin> {
        self.backends.get(plugin_id).map(|plugin| &**plugin)
    }

    pub fn runtime(&self, plugin_id: &str) -> Option<&dyn RuntimePlugin> {
        self.runtimes.get(plugin_id).map(|plugin| &**plugin)
    }

    pub fn list_backends(&self) -> Vec<&dyn BackendPlugin> {
        let mut ids: Vec<&String> = self.backends.keys().collect();
        ids.sort();
        ids.into_iter().map(|id| &*self.backends[id]).collect()
    }

    pub fn list_runtimes(&self) -> Vec<&dyn RuntimePlugin> {
        let mut ids: Vec<&String> = self.runtimes.keys().collect();
        ids.sort();
        ids.into_iter().map(|id| &*self.runtimes[id]).collect()
    }
}
