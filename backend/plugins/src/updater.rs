//! Update detection: installed plugins for which a repository offers a newer build.

use std::sync::Arc;

use icy_core::{IcyError, PluginDescriptor};
use serde::Serialize;
use tracing::{debug, info};

use crate::installer::PluginInstaller;
use crate::loader::PluginLoader;
use crate::repository::PluginRepositoryLoader;

#[derive(Debug, Clone)]
pub struct PluginUpdate {
    pub local: Arc<PluginDescriptor>,
    pub online: Arc<PluginDescriptor>,
}

/// Flat view of an update for printing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub class_name: String,
    pub installed: String,
    pub available: String,
    pub beta: bool,
}

impl PluginUpdate {
    pub fn summary(&self) -> UpdateSummary {
        UpdateSummary {
            class_name: self.local.class_name().to_string(),
            installed: self.local.version().to_string(),
            available: self.online.version().to_string(),
            beta: self.online.is_beta(),
        }
    }
}

/// Pairs every local plugin with a strictly newer online build of the same
/// class. Bundled plugins ship with the host and are never updated here.
pub fn find_updates(local: &[Arc<PluginDescriptor>], online: &[Arc<PluginDescriptor>]) -> Vec<PluginUpdate> {
    local
        .iter()
        .filter(|plugin| !plugin.is_bundled())
        .filter_map(|plugin| {
            online
                .iter()
                .find(|candidate| candidate.ident().is_newer(plugin.ident()))
                .map(|candidate| PluginUpdate {
                    local: Arc::clone(plugin),
                    online: Arc::clone(candidate),
                })
        })
        .collect()
}

/// Waits for both catalogs and compares them.
pub async fn check_for_updates(
    loader: &PluginLoader,
    repository: &PluginRepositoryLoader,
) -> Result<Vec<PluginUpdate>, IcyError> {
    loader.wait_loaded().await?;
    repository.wait_loaded().await?;

    let updates = find_updates(&loader.plugins(), &repository.plugins());
    info!(updates = updates.len(), "Update check finished");
    Ok(updates)
}

/// Queues every update for installation; returns how many were queued.
pub fn apply(installer: &PluginInstaller, updates: &[PluginUpdate], show_progress: bool) -> usize {
    updates
        .iter()
        .filter(|update| {
            let queued = installer.install(Arc::clone(&update.online), show_progress);
            if queued {
                debug!(plugin = %update.online.ident(), "Update queued");
            }
            queued
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::FactoryRegistry;
    use crate::loader::LoaderSettings;
    use crate::plugin::PluginInstance;
    use crate::repository::RepositorySettings;
    use crate::testing::{self, RepoFixture};
    use icy_core::{xml, Capability, DescriptorMeta, PluginLayout, RepositorySource, Version};

    fn local(class_name: &str, version: &str, capabilities: &[Capability]) -> Arc<PluginDescriptor> {
        let meta = DescriptorMeta {
            capabilities: capabilities.iter().copied().collect(),
            ..Default::default()
        };
        Arc::new(PluginDescriptor::local(testing::ident(class_name, version), meta, PluginLayout::default()))
    }

    fn online(class_name: &str, version: &str) -> Arc<PluginDescriptor> {
        let ident = icy_core::PluginOnlineIdent {
            ident: testing::ident(class_name, version),
            ..Default::default()
        };
        Arc::new(PluginDescriptor::online(ident, RepositorySource::default()))
    }

    #[test]
    fn only_strictly_newer_builds() {
        let installed = vec![
            local("plugins.a.Old", "1.0", &[]),
            local("plugins.a.Current", "2.0", &[]),
            local("plugins.a.Ahead", "3.0", &[]),
            local("plugins.kernel.Core", "1.0", &[Capability::Bundled]),
        ];
        let available = vec![
            online("plugins.a.Old", "1.1"),
            online("plugins.a.Current", "2.0"),
            online("plugins.a.Ahead", "2.5"),
            online("plugins.kernel.Core", "9.0"),
        ];

        let updates = find_updates(&installed, &available);
        assert_eq!(updates.len(), 1);
        assert_eq!(
            updates[0].summary(),
            UpdateSummary {
                class_name: "plugins.a.Old".into(),
                installed: "1.0.0.0".into(),
                available: "1.1.0.0".into(),
                beta: false,
            }
        );
    }

    #[tokio::test]
    async fn applied_updates_replace_the_installed_build() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path().join("root"));
        testing::install_package(&layout, "plugins.a.Tool", "1.0", &[]);
        let mut repo = RepoFixture::new(&dir.path().join("repo"));
        repo.publish("plugins.a.Tool", "1.4", &[]);

        let registry = FactoryRegistry::new();
        registry.register("plugins.a.Tool", || Ok(PluginInstance::Passive));
        let host = Version::new(2, 5, 0, 0);
        let services = testing::services();
        let loader = PluginLoader::new(
            LoaderSettings {
                layout: layout.clone(),
                host_version: host,
                ..Default::default()
            },
            Arc::new(registry),
            services.clone(),
        );
        let repository = PluginRepositoryLoader::new(
            RepositorySettings {
                host_version: host,
                accept_beta: false,
                repositories: vec![repo.source("main")],
            },
            services.clone(),
        );
        let installer = PluginInstaller::new(loader.clone(), repository.clone(), services);
        loader.start();
        repository.start();
        installer.start();

        let updates = check_for_updates(&loader, &repository).await.unwrap();
        assert_eq!(apply(&installer, &updates, false), 1);
        installer.wait_install().await.unwrap();

        assert_eq!(loader.plugin("plugins.a.Tool").unwrap().version(), &Version::new(1, 4, 0, 0));
        let on_disk = std::fs::read_to_string(layout.xml_path("plugins.a.Tool")).unwrap();
        assert_eq!(xml::parse_descriptor(&on_disk).unwrap().0.version, Version::new(1, 4, 0, 0));
        assert!(check_for_updates(&loader, &repository).await.unwrap().is_empty());

        installer.shutdown().await;
        repository.shutdown().await;
        loader.shutdown().await;
    }
}
