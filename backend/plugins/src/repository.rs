//! Remote plugin catalog.
//!
//! Polls every enabled repository for its plugin list and keeps, per class,
//! the highest version this host can run. Descriptors are created with their
//! metadata unloaded; it is fetched on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{Context, Result};
use icy_core::{xml, IcyError, PluginDescriptor, PluginIdent, PluginOnlineIdent, RepositorySource, Version};
use icy_logging::{PluginActivity, PluginEventLogger};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::event_bus::PluginEvent;
use crate::network;
use crate::services::HostServices;
use crate::task::SingleSlot;

#[derive(Debug, Clone, Default)]
pub struct RepositorySettings {
    pub host_version: Version,
    pub accept_beta: bool,
    pub repositories: Vec<RepositorySource>,
}

#[derive(Default)]
struct Catalog {
    plugins: Vec<Arc<PluginDescriptor>>,
    loaded: bool,
    failed: bool,
}

#[derive(Clone)]
pub struct PluginRepositoryLoader {
    inner: Arc<RepositoryInner>,
}

struct RepositoryInner {
    settings: RepositorySettings,
    services: HostServices,
    slot: Arc<SingleSlot>,
    catalog: RwLock<Catalog>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PluginRepositoryLoader {
    pub fn new(settings: RepositorySettings, services: HostServices) -> Self {
        Self {
            inner: Arc::new(RepositoryInner {
                settings,
                services,
                slot: SingleSlot::new("plugin-repository"),
                catalog: RwLock::new(Catalog::default()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawns the polling worker and requests the first refresh.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *worker = Some(self.inner.slot.spawn(move |ticket| {
            let inner = Arc::clone(&inner);
            async move { inner.refresh(ticket).await }
        }));
        drop(worker);
        self.inner.slot.request();
    }

    pub async fn shutdown(&self) {
        self.inner.slot.close();
        let worker = self.inner.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Repository worker failed");
            }
        }
    }

    pub async fn reload(&self) -> Result<(), IcyError> {
        let ticket = self.inner.slot.request();
        self.inner.slot.wait_for(ticket).await
    }

    pub fn reload_async(&self) -> u64 {
        self.inner.slot.request()
    }

    /// Waits until the latest refresh succeeded or failed for good.
    pub async fn wait_loaded(&self) -> Result<(), IcyError> {
        let ticket = self.inner.slot.latest();
        self.inner.slot.wait_for(ticket).await
    }

    /// True after a successful refresh and after a terminal failure.
    pub fn is_loaded(&self) -> bool {
        let catalog = self.inner.catalog();
        catalog.loaded || catalog.failed
    }

    /// Every enabled repository failed during the last refresh.
    pub fn is_failed(&self) -> bool {
        self.inner.catalog().failed
    }

    pub fn repositories(&self) -> Vec<RepositorySource> {
        self.inner.settings.repositories.iter().filter(|r| r.enabled).cloned().collect()
    }

    pub fn plugins(&self) -> Vec<Arc<PluginDescriptor>> {
        self.inner.catalog().plugins.clone()
    }

    pub fn plugin(&self, class_name: &str) -> Option<Arc<PluginDescriptor>> {
        self.inner
            .catalog()
            .plugins
            .iter()
            .find(|p| p.class_name() == class_name)
            .cloned()
    }

    /// Entry matching `ident`: the exact version, or any version at least as
    /// high with `accept_newer`.
    pub fn plugin_for(&self, ident: &PluginIdent, accept_newer: bool) -> Option<Arc<PluginDescriptor>> {
        self.plugin(&ident.class_name).filter(|p| {
            if accept_newer {
                p.ident().is_greater_or_equal(ident)
            } else {
                p.version() == &ident.version
            }
        })
    }

    /// Fetches the full descriptor of every entry; returns how many succeeded.
    pub async fn load_all_descriptors(&self) -> usize {
        let fetcher = Arc::clone(&self.inner.services.fetcher);
        let mut loaded = 0;
        for plugin in self.plugins() {
            if plugin.load_descriptor(fetcher.as_ref()).await {
                loaded += 1;
            }
        }
        loaded
    }
}

impl RepositoryInner {
    fn catalog(&self) -> std::sync::RwLockReadGuard<'_, Catalog> {
        self.catalog.read().unwrap_or_else(|p| p.into_inner())
    }

    async fn refresh(&self, ticket: u64) -> bool {
        {
            let mut catalog = self.catalog.write().unwrap_or_else(|p| p.into_inner());
            catalog.loaded = false;
            catalog.failed = false;
        }

        let enabled: Vec<&RepositorySource> = self.settings.repositories.iter().filter(|r| r.enabled).collect();
        let mut best: HashMap<String, (PluginOnlineIdent, RepositorySource)> = HashMap::new();
        let mut failures = 0;

        for repository in &enabled {
            if self.slot.is_superseded(ticket) {
                debug!(ticket, "Repository refresh superseded");
                return false;
            }
            match self.fetch_list(repository).await {
                Ok(idents) => {
                    debug!(repository = %repository.name, entries = idents.len(), "Repository list fetched");
                    for online in idents.into_iter().filter(|o| self.accepts(&o.ident)) {
                        match best.get(&online.ident.class_name) {
                            Some((current, _)) if !online.ident.is_greater(&current.ident) => {}
                            _ => {
                                best.insert(online.ident.class_name.clone(), (online, (*repository).clone()));
                            }
                        }
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(repository = %repository.name, error = format!("{e:#}"), "Cannot load repository");
                }
            }
        }

        let mut plugins: Vec<Arc<PluginDescriptor>> = best
            .into_values()
            .map(|(online, repository)| Arc::new(PluginDescriptor::online(online, repository)))
            .collect();
        plugins.sort_by(|a, b| a.class_name().cmp(b.class_name()));

        let failed = !enabled.is_empty() && failures == enabled.len();
        let count = plugins.len();
        {
            let mut catalog = self.catalog.write().unwrap_or_else(|p| p.into_inner());
            catalog.plugins = plugins;
            catalog.loaded = !failed;
            catalog.failed = failed;
        }

        if failed {
            error!(repositories = enabled.len(), "No repository could be loaded");
        } else {
            info!(plugins = count, repositories = enabled.len(), "Repository catalog loaded");
        }
        PluginEventLogger::log(PluginActivity::RepositoryRefreshed { plugins: count });
        self.services.events.publish(PluginEvent::RepositoryChanged);
        true
    }

    fn accepts(&self, ident: &PluginIdent) -> bool {
        ident.supports_host(&self.settings.host_version) && (self.settings.accept_beta || !ident.version.is_beta())
    }

    async fn fetch_list(&self, repository: &RepositorySource) -> Result<Vec<PluginOnlineIdent>> {
        let url = if repository.support_param {
            network::with_query(
                &repository.location,
                &[
                    ("kernelVersion", self.settings.host_version.to_string()),
                    ("beta", self.settings.accept_beta.to_string()),
                ],
            )
        } else {
            repository.location.clone()
        };

        let bytes = self
            .services
            .fetcher
            .fetch(&url, repository.credentials.as_ref())
            .await?;
        let raw = String::from_utf8(bytes).context("repository list is not UTF-8")?;
        Ok(xml::parse_repository_list(&raw)?)
    }
}
