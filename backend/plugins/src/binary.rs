//! Entry-point resolution.
//!
//! Every manifest names a class; a [`PluginBinaryLoader`] turns that name into
//! a constructor or explains why it cannot. [`FactoryRegistry`] is the stock
//! loader for plugin code linked into the host.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use icy_core::{PluginIdent, Version};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::plugin::{PluginFactory, PluginInstance};

/// Why a discovered plugin was left out of a generation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadFailure {
    /// The entry point is unknown or does not build a plugin.
    #[error("{0} is not a plugin entry point")]
    NotAPlugin(String),

    #[error("{class_name} links against missing {missing}")]
    MissingDependency { class_name: String, missing: String },

    #[error("{class_name} needs host {required} (running {host})")]
    NeedsNewerHost {
        class_name: String,
        required: Version,
        host: Version,
    },

    /// Corrupt archive, unreadable manifest and the like.
    #[error("{class_name}: {message}")]
    Fatal { class_name: String, message: String },
}

impl LoadFailure {
    pub fn class_name(&self) -> &str {
        match self {
            LoadFailure::NotAPlugin(class_name)
            | LoadFailure::MissingDependency { class_name, .. }
            | LoadFailure::NeedsNewerHost { class_name, .. }
            | LoadFailure::Fatal { class_name, .. } => class_name,
        }
    }

    /// Failures worth a bug report to the plugin's maintainers.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, LoadFailure::NeedsNewerHost { .. })
    }

    /// Logs at the severity of the failure kind.
    pub fn log(&self) {
        match self {
            LoadFailure::NotAPlugin(class_name) => {
                debug!(plugin = %class_name, "Skipped: not a plugin entry point")
            }
            LoadFailure::MissingDependency { class_name, missing } => {
                error!(plugin = %class_name, missing = %missing, "Cannot load plugin: missing dependency")
            }
            LoadFailure::NeedsNewerHost { class_name, required, host } => warn!(
                plugin = %class_name,
                required = %required,
                host = %host,
                "Plugin needs a newer host version"
            ),
            LoadFailure::Fatal { class_name, message } => {
                error!(plugin = %class_name, error = %message, "Cannot load plugin")
            }
        }
    }
}

/// Resolves manifest entry points to constructors.
pub trait PluginBinaryLoader: Send + Sync {
    fn resolve(&self, ident: &PluginIdent, host: &Version) -> Result<PluginFactory, LoadFailure>;
}

/// One entry point known to a [`FactoryRegistry`].
pub struct Registration {
    class_name: String,
    factory: PluginFactory,
    links: Vec<String>,
    built_for: Version,
}

impl Registration {
    pub fn new<F>(class_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<PluginInstance> + Send + Sync + 'static,
    {
        Self {
            class_name: class_name.into(),
            factory: Arc::new(factory),
            links: Vec::new(),
            built_for: Version::default(),
        }
    }

    /// Another entry point this code cannot work without.
    pub fn links_to(mut self, class_name: impl Into<String>) -> Self {
        self.links.push(class_name.into());
        self
    }

    /// Lowest host version the code was built against.
    pub fn built_for(mut self, host: Version) -> Self {
        self.built_for = host;
        self
    }
}

/// Entry points linked into the host, keyed by class name.
#[derive(Default)]
pub struct FactoryRegistry {
    entries: RwLock<HashMap<String, Registration>>,
}

impl FactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, registration: Registration) -> &Self {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(registration.class_name.clone(), registration);
        self
    }

    pub fn register<F>(&self, class_name: impl Into<String>, factory: F) -> &Self
    where
        F: Fn() -> Result<PluginInstance> + Send + Sync + 'static,
    {
        self.add(Registration::new(class_name, factory))
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains_key(class_name)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PluginBinaryLoader for FactoryRegistry {
    fn resolve(&self, ident: &PluginIdent, host: &Version) -> Result<PluginFactory, LoadFailure> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let entry = entries
            .get(&ident.class_name)
            .ok_or_else(|| LoadFailure::NotAPlugin(ident.class_name.clone()))?;

        if host.is_lower(&entry.built_for) {
            return Err(LoadFailure::NeedsNewerHost {
                class_name: ident.class_name.clone(),
                required: entry.built_for,
                host: *host,
            });
        }
        if let Some(missing) = entry.links.iter().find(|link| !entries.contains_key(link.as_str())) {
            return Err(LoadFailure::MissingDependency {
                class_name: ident.class_name.clone(),
                missing: missing.clone(),
            });
        }
        Ok(Arc::clone(&entry.factory))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(class_name: &str) -> PluginIdent {
        PluginIdent::new(class_name, Version::new(1, 0, 0, 0))
    }

    #[test]
    fn resolves_registered_entry_point() {
        let registry = FactoryRegistry::new();
        registry.register("plugins.a.Action", || Ok(PluginInstance::Passive));
        let factory = registry.resolve(&ident("plugins.a.Action"), &Version::new(2, 5, 0, 0)).unwrap();
        assert!(matches!(factory().unwrap(), PluginInstance::Passive));
    }

    #[test]
    fn classifies_failures() {
        let registry = FactoryRegistry::new();
        registry
            .add(Registration::new("plugins.a.Linked", || Ok(PluginInstance::Passive)).links_to("plugins.lib.Gone"))
            .add(
                Registration::new("plugins.a.Modern", || Ok(PluginInstance::Passive))
                    .built_for(Version::new(3, 0, 0, 0)),
            );
        let host = Version::new(2, 5, 0, 0);

        let failure = |class: &str| registry.resolve(&ident(class), &host).err().unwrap();
        assert_eq!(failure("plugins.a.Unknown"), LoadFailure::NotAPlugin("plugins.a.Unknown".into()));
        assert!(matches!(failure("plugins.a.Linked"), LoadFailure::MissingDependency { missing, .. } if missing == "plugins.lib.Gone"));
        assert!(matches!(failure("plugins.a.Modern"), LoadFailure::NeedsNewerHost { .. }));
        assert!(!failure("plugins.a.Modern").is_reportable());
    }
}
