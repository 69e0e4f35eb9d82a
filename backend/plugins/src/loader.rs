//! Plugin Loader
//!
//! Scans bundled manifests and the package archives of the local plugin tree,
//! resolves every entry point and publishes the result as one immutable
//! [`Generation`]. Scans run on a single-slot worker: requests arriving during
//! a scan abort it and fold into one follow-up scan.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use icy_core::{xml, Capability, DescriptorMeta, IcyError, PluginDescriptor, PluginIdent, PluginLayout, Version};
use icy_logging::{PluginActivity, PluginEventLogger};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::binary::{LoadFailure, PluginBinaryLoader};
use crate::daemon::DaemonRegistry;
use crate::event_bus::PluginEvent;
use crate::installer::PluginInstaller;
use crate::launcher::{construct, report_failure};
use crate::plugin::PluginFactory;
use crate::repository::PluginRepositoryLoader;
use crate::services::HostServices;
use crate::task::SingleSlot;

#[derive(Debug, Clone, Default)]
pub struct LoaderSettings {
    pub layout: PluginLayout,
    pub host_version: Version,
    /// Packages whose file stem ends with one of these are never loaded.
    pub excluded_suffixes: Vec<String>,
    pub disabled_daemons: Vec<String>,
    /// Manifests of plugins shipped inside the host.
    pub bundled: Vec<String>,
}

/// One complete scan result. Plugins and entry points are only ever replaced together.
pub struct Generation {
    pub id: u64,
    /// Sorted by class name.
    pub plugins: Vec<Arc<PluginDescriptor>>,
    pub factories: HashMap<String, PluginFactory>,
    pub failures: HashMap<String, LoadFailure>,
}

impl Generation {
    fn empty() -> Self {
        Self {
            id: 0,
            plugins: Vec::new(),
            factories: HashMap::new(),
            failures: HashMap::new(),
        }
    }

    pub fn plugin(&self, class_name: &str) -> Option<&Arc<PluginDescriptor>> {
        self.plugins
            .binary_search_by(|p| p.class_name().cmp(class_name))
            .ok()
            .map(|i| &self.plugins[i])
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("id", &self.id)
            .field("plugins", &self.plugins.len())
            .field("failures", &self.failures)
            .finish_non_exhaustive()
    }
}

/// A declared dependency the local tree does not satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatisfiedDependency {
    pub plugin: PluginIdent,
    pub dependency: PluginIdent,
}

#[derive(Clone)]
pub struct PluginLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    settings: LoaderSettings,
    binaries: Arc<dyn PluginBinaryLoader>,
    services: HostServices,
    slot: Arc<SingleSlot>,
    generation: RwLock<Arc<Generation>>,
    daemons: Arc<DaemonRegistry>,
    disabled_daemons: Mutex<HashSet<String>>,
    initialized: AtomicBool,
    unsatisfied: Mutex<Vec<UnsatisfiedDependency>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Default)]
struct Scan {
    plugins: Vec<Arc<PluginDescriptor>>,
    factories: HashMap<String, PluginFactory>,
    failures: HashMap<String, LoadFailure>,
}

impl Scan {
    fn fail(&mut self, failure: LoadFailure) {
        failure.log();
        self.failures.insert(failure.class_name().to_string(), failure);
    }
}

impl PluginLoader {
    pub fn new(settings: LoaderSettings, binaries: Arc<dyn PluginBinaryLoader>, services: HostServices) -> Self {
        let disabled_daemons = settings.disabled_daemons.iter().cloned().collect();
        Self {
            inner: Arc::new(LoaderInner {
                settings,
                binaries,
                services,
                slot: SingleSlot::new("plugin-loader"),
                generation: RwLock::new(Arc::new(Generation::empty())),
                daemons: Arc::new(DaemonRegistry::new()),
                disabled_daemons: Mutex::new(disabled_daemons),
                initialized: AtomicBool::new(false),
                unsatisfied: Mutex::new(Vec::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawns the scan worker and requests the first scan.
    pub fn start(&self) {
        let mut worker = self.inner.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *worker = Some(self.inner.slot.spawn(move |ticket| {
            let inner = Arc::clone(&inner);
            async move { inner.run_reload(ticket).await }
        }));
        drop(worker);

        info!(root = %self.inner.settings.layout.root().display(), "Plugin loader started");
        self.inner.slot.request();
    }

    /// Stops the worker after its current scan, then every daemon.
    pub async fn shutdown(&self) {
        self.inner.slot.close();
        let worker = self.inner.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Plugin loader worker failed");
            }
        }
        let daemons = Arc::clone(&self.inner.daemons);
        if let Err(e) = tokio::task::spawn_blocking(move || daemons.stop_all()).await {
            error!(error = %e, "Failed to stop daemons");
        }
        info!("Plugin loader stopped");
    }

    /// Requests a scan and waits until a scan covering it finished.
    pub async fn reload(&self) -> Result<(), IcyError> {
        let ticket = self.inner.slot.request();
        self.inner.slot.wait_for(ticket).await
    }

    /// Requests a scan without waiting; returns its ticket.
    pub fn reload_async(&self) -> u64 {
        self.inner.slot.request()
    }

    /// Waits for the latest requested scan.
    pub async fn wait_loaded(&self) -> Result<(), IcyError> {
        let ticket = self.inner.slot.latest();
        self.inner.slot.wait_for(ticket).await
    }

    pub fn is_loading(&self) -> bool {
        self.inner.slot.is_pending()
    }

    /// True once the first scan completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Number of scans run so far, aborted ones included.
    pub fn scan_count(&self) -> u64 {
        self.inner.slot.snapshot().runs
    }

    pub fn layout(&self) -> &PluginLayout {
        &self.inner.settings.layout
    }

    pub fn host_version(&self) -> Version {
        self.inner.settings.host_version
    }

    pub fn generation(&self) -> Arc<Generation> {
        self.inner.generation()
    }

    pub fn plugins(&self) -> Vec<Arc<PluginDescriptor>> {
        self.generation().plugins.clone()
    }

    pub fn plugin(&self, class_name: &str) -> Option<Arc<PluginDescriptor>> {
        self.generation().plugin(class_name).cloned()
    }

    pub fn plugins_with(&self, capability: Capability) -> Vec<Arc<PluginDescriptor>> {
        self.generation()
            .plugins
            .iter()
            .filter(|p| p.has_capability(capability))
            .cloned()
            .collect()
    }

    pub fn daemon_plugins(&self) -> Vec<Arc<PluginDescriptor>> {
        self.plugins_with(Capability::Daemon)
    }

    pub fn importers(&self) -> Vec<Arc<PluginDescriptor>> {
        self.plugins_with(Capability::Importer)
    }

    pub fn active_daemons(&self) -> Vec<PluginIdent> {
        self.inner.daemons.active()
    }

    pub fn load_failure(&self, class_name: &str) -> Option<LoadFailure> {
        self.generation().failures.get(class_name).cloned()
    }

    pub fn failures(&self) -> Vec<LoadFailure> {
        let mut failures: Vec<_> = self.generation().failures.values().cloned().collect();
        failures.sort_by(|a, b| a.class_name().cmp(b.class_name()));
        failures
    }

    pub fn factory(&self, class_name: &str) -> Option<PluginFactory> {
        self.generation().factories.get(class_name).cloned()
    }

    /// Dependencies found unsatisfied by the first scan.
    pub fn unsatisfied_dependencies(&self) -> Vec<UnsatisfiedDependency> {
        self.inner.unsatisfied.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Loaded plugins that declare a dependency on the class of `ident`.
    pub fn dependents_of(&self, ident: &PluginIdent) -> Vec<Arc<PluginDescriptor>> {
        self.generation()
            .plugins
            .iter()
            .filter(|p| p.dependencies().iter().any(|d| d.class_name == ident.class_name))
            .cloned()
            .collect()
    }

    pub fn is_daemon_enabled(&self, class_name: &str) -> bool {
        !self
            .inner
            .disabled_daemons
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(class_name)
    }

    /// Enables or disables a daemon, starting or stopping it right away.
    pub async fn set_daemon_enabled(&self, class_name: &str, enabled: bool) -> Result<()> {
        {
            let mut disabled = self.inner.disabled_daemons.lock().unwrap_or_else(|p| p.into_inner());
            if enabled {
                disabled.remove(class_name);
            } else {
                disabled.insert(class_name.to_string());
            }
        }

        let Some(descriptor) = self.plugin(class_name) else {
            return Ok(());
        };
        descriptor.set_enabled(enabled);
        if !descriptor.has_capability(Capability::Daemon) {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        let factory = self.factory(class_name);
        tokio::task::spawn_blocking(move || {
            if !enabled {
                inner.daemons.stop(descriptor.class_name());
            } else if let Some(factory) = factory {
                inner.daemons.start(
                    &descriptor,
                    &factory,
                    inner.services.host.as_ref(),
                    inner.services.reporter.as_ref(),
                );
            }
        })
        .await?;
        info!(plugin = %class_name, enabled, "Daemon state changed");
        Ok(())
    }

    /// Queues for installation every dependency that is missing locally, older
    /// than required or failed to load. Returns what was queued.
    pub async fn check_plugins(
        &self,
        installer: &PluginInstaller,
        repository: &PluginRepositoryLoader,
        show_progress: bool,
    ) -> Result<Vec<Arc<PluginDescriptor>>> {
        self.wait_loaded().await?;
        repository.wait_loaded().await?;

        let generation = self.generation();
        let mut queued: Vec<Arc<PluginDescriptor>> = Vec::new();

        for plugin in &generation.plugins {
            for dependency in plugin.dependencies() {
                let satisfied = !generation.failures.contains_key(&dependency.class_name)
                    && generation
                        .plugin(&dependency.class_name)
                        .is_some_and(|local| local.ident().is_greater_or_equal(&dependency));
                if satisfied || queued.iter().any(|q| q.class_name() == dependency.class_name) {
                    continue;
                }

                match repository.plugin_for(&dependency, true) {
                    Some(online) => {
                        info!(plugin = %plugin.ident(), dependency = %online.ident(), "Queueing dependency");
                        installer.install(Arc::clone(&online), show_progress);
                        queued.push(online);
                    }
                    None => warn!(
                        plugin = %plugin.ident(),
                        dependency = %dependency,
                        "Dependency not available from any repository"
                    ),
                }
            }
        }
        Ok(queued)
    }
}

impl LoaderInner {
    fn generation(&self) -> Arc<Generation> {
        Arc::clone(&self.generation.read().unwrap_or_else(|p| p.into_inner()))
    }

    async fn run_reload(self: &Arc<Self>, ticket: u64) -> bool {
        let daemons = Arc::clone(&self.daemons);
        if let Err(e) = tokio::task::spawn_blocking(move || daemons.stop_all()).await {
            error!(error = %e, "Failed to stop daemons before reload");
        }

        let Some(scan) = self.scan(ticket).await else {
            debug!(ticket, "Plugin scan superseded");
            return false;
        };

        let id = self.generation().id + 1;
        let generation = Arc::new(Generation {
            id,
            plugins: scan.plugins,
            factories: scan.factories,
            failures: scan.failures,
        });
        // The previous generation is released as soon as the last reader drops it.
        *self.generation.write().unwrap_or_else(|p| p.into_inner()) = Arc::clone(&generation);

        info!(
            generation = id,
            plugins = generation.plugins.len(),
            failures = generation.failures.len(),
            "Plugin generation loaded"
        );
        PluginEventLogger::log(PluginActivity::Reloaded {
            generation: id,
            plugins: generation.plugins.len(),
            failures: generation.failures.len(),
        });

        if !self.initialized.swap(true, Ordering::AcqRel) {
            self.verify_dependencies(&generation);
        }
        self.start_daemons(&generation).await;
        self.services.events.publish(PluginEvent::LoaderChanged { generation: id });
        self.prefetch_importers(&generation);
        true
    }

    /// `None` when a newer request arrived or the loader is closing.
    async fn scan(&self, ticket: u64) -> Option<Scan> {
        let mut scan = Scan::default();

        for raw in &self.settings.bundled {
            match xml::parse_descriptor(raw) {
                Ok((ident, mut meta)) => {
                    meta.capabilities.insert(Capability::Bundled);
                    self.admit(ident, meta, &mut scan);
                }
                Err(e) => error!(error = %e, "Invalid bundled plugin manifest"),
            }
        }

        let layout = &self.settings.layout;
        let (scan_root, backup_root) = (layout.scan_root(), layout.backup_root());
        let excluded = self.settings.excluded_suffixes.clone();
        let packages: Vec<PathBuf> =
            match tokio::task::spawn_blocking(move || archive::list_packages(&scan_root, &backup_root, &excluded)).await {
                Ok(packages) => packages,
                Err(e) => {
                    error!(error = %e, "Failed to list plugin packages");
                    Vec::new()
                }
            };

        for path in packages {
            if self.slot.is_superseded(ticket) || self.slot.is_closed() {
                return None;
            }
            let Some(class_name) = layout.class_name_for(&path) else {
                debug!(path = %path.display(), "Skipping package outside the plugin package");
                continue;
            };
            match archive::inspect_async(path).await {
                Ok((ident, meta)) if ident.class_name == class_name => self.admit(ident, meta, &mut scan),
                Ok((ident, _)) => scan.fail(LoadFailure::Fatal {
                    message: format!("package declares {}", ident.class_name),
                    class_name,
                }),
                Err(e) => scan.fail(LoadFailure::Fatal {
                    class_name,
                    message: e.to_string(),
                }),
            }
        }

        scan.plugins.sort_by(|a, b| a.class_name().cmp(b.class_name()));
        Some(scan)
    }

    fn admit(&self, ident: PluginIdent, meta: DescriptorMeta, scan: &mut Scan) {
        if scan.plugins.iter().any(|p| p.class_name() == ident.class_name) {
            warn!(plugin = %ident, "Duplicate plugin class ignored");
            return;
        }

        let host = self.settings.host_version;
        if !ident.supports_host(&host) {
            scan.fail(LoadFailure::NeedsNewerHost {
                class_name: ident.class_name.clone(),
                required: ident.required_kernel_version,
                host,
            });
            return;
        }

        match self.binaries.resolve(&ident, &host) {
            Ok(factory) => {
                let class_name = ident.class_name.clone();
                let descriptor = PluginDescriptor::local(ident, meta, self.settings.layout.clone());
                if descriptor.has_capability(Capability::Daemon) {
                    let disabled = self.disabled_daemons.lock().unwrap_or_else(|p| p.into_inner());
                    descriptor.set_enabled(!disabled.contains(&class_name));
                }
                scan.factories.insert(class_name, factory);
                scan.plugins.push(Arc::new(descriptor));
            }
            Err(failure) => scan.fail(failure),
        }
    }

    fn verify_dependencies(&self, generation: &Generation) {
        let mut unsatisfied = Vec::new();
        for plugin in &generation.plugins {
            for dependency in plugin.dependencies() {
                let found = generation
                    .plugin(&dependency.class_name)
                    .is_some_and(|local| local.ident().is_greater_or_equal(&dependency));
                if !found {
                    warn!(plugin = %plugin.ident(), dependency = %dependency, "Unsatisfied plugin dependency");
                    unsatisfied.push(UnsatisfiedDependency {
                        plugin: plugin.ident().clone(),
                        dependency,
                    });
                }
            }
        }
        *self.unsatisfied.lock().unwrap_or_else(|p| p.into_inner()) = unsatisfied;
    }

    async fn start_daemons(&self, generation: &Generation) {
        let candidates: Vec<(Arc<PluginDescriptor>, PluginFactory)> = generation
            .plugins
            .iter()
            .filter(|p| p.has_capability(Capability::Daemon))
            .filter(|p| {
                let enabled = p.is_enabled();
                if !enabled {
                    info!(plugin = %p.ident(), "Daemon disabled, not started");
                }
                enabled
            })
            .filter_map(|p| generation.factories.get(p.class_name()).map(|f| (Arc::clone(p), Arc::clone(f))))
            .collect();
        if candidates.is_empty() {
            return;
        }

        let daemons = Arc::clone(&self.daemons);
        let (host, reporter) = (Arc::clone(&self.services.host), Arc::clone(&self.services.reporter));
        let started = tokio::task::spawn_blocking(move || {
            for (descriptor, factory) in candidates {
                daemons.start(&descriptor, &factory, host.as_ref(), reporter.as_ref());
            }
        })
        .await;
        if let Err(e) = started {
            error!(error = %e, "Failed to start daemons");
        }
    }

    /// Builds each importer once in the background so the first use is fast.
    fn prefetch_importers(&self, generation: &Generation) {
        let importers: Vec<(Arc<PluginDescriptor>, PluginFactory)> = generation
            .plugins
            .iter()
            .filter(|p| p.has_capability(Capability::Importer))
            .filter_map(|p| generation.factories.get(p.class_name()).map(|f| (Arc::clone(p), Arc::clone(f))))
            .collect();
        if importers.is_empty() {
            return;
        }

        let (host, reporter) = (Arc::clone(&self.services.host), Arc::clone(&self.services.reporter));
        tokio::task::spawn_blocking(move || {
            for (descriptor, factory) in importers {
                match construct(&descriptor, &factory, host.as_ref()) {
                    Ok(_) => debug!(plugin = %descriptor.ident(), "Importer prefetched"),
                    Err(e) => report_failure(reporter.as_ref(), &descriptor, &e),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{FactoryRegistry, Registration};
    use crate::plugin::PluginInstance;
    use crate::testing::{self, TestDaemon};
    use std::sync::mpsc;

    const HOST: Version = Version::new(2, 5, 0, 0);

    fn settings(root: &std::path::Path) -> LoaderSettings {
        LoaderSettings {
            layout: PluginLayout::new(root),
            host_version: HOST,
            excluded_suffixes: vec!["Test".into()],
            ..Default::default()
        }
    }

    fn passive() -> Result<PluginInstance> {
        Ok(PluginInstance::Passive)
    }

    #[tokio::test]
    async fn scan_classifies_every_package() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path());
        testing::install_package(&layout, "plugins.a.Good", "1.0", &[]);
        testing::install_package(&layout, "plugins.a.Unknown", "1.0", &[]);
        testing::install_package(&layout, "plugins.a.Linked", "1.0", &[]);
        testing::install_package(&layout, "plugins.a.GoodTest", "1.0", &[]);
        let future = PluginIdent::new("plugins.a.Future", Version::new(1, 0, 0, 0)).requiring(Version::new(9, 0, 0, 0));
        testing::write_package(&layout.jar_path("plugins.a.Future"), &future, &DescriptorMeta::default());
        std::fs::write(layout.jar_path("plugins.a.Corrupt"), b"garbage").unwrap();

        let registry = FactoryRegistry::new();
        registry
            .register("plugins.a.Good", passive)
            .register("plugins.a.Future", passive)
            .register("plugins.a.GoodTest", passive)
            .add(Registration::new("plugins.a.Linked", passive).links_to("plugins.lib.Gone"));

        let loader = PluginLoader::new(settings(dir.path()), Arc::new(registry), testing::services());
        loader.start();
        loader.wait_loaded().await.unwrap();

        let classes: Vec<String> = loader.plugins().iter().map(|p| p.class_name().to_string()).collect();
        assert_eq!(classes, vec!["plugins.a.Good"]);
        assert!(loader.is_initialized());
        assert!(matches!(loader.load_failure("plugins.a.Unknown"), Some(LoadFailure::NotAPlugin(_))));
        assert!(matches!(loader.load_failure("plugins.a.Linked"), Some(LoadFailure::MissingDependency { .. })));
        assert!(matches!(loader.load_failure("plugins.a.Future"), Some(LoadFailure::NeedsNewerHost { .. })));
        assert!(matches!(loader.load_failure("plugins.a.Corrupt"), Some(LoadFailure::Fatal { .. })));
        assert!(loader.load_failure("plugins.a.GoodTest").is_none());
        assert!(loader.factory("plugins.a.Good").is_some());

        loader.shutdown().await;
    }

    #[tokio::test]
    async fn bundled_manifests_and_dependency_check() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path());
        testing::install_package(&layout, "plugins.a.Tool", "1.0", &[("plugins.kernel.Core", "2.0")]);

        let core = PluginIdent::new("plugins.kernel.Core", Version::new(1, 0, 0, 0));
        let mut cfg = settings(dir.path());
        cfg.bundled = vec![xml::write_descriptor(&core, &DescriptorMeta::default()).unwrap()];

        let registry = FactoryRegistry::new();
        registry.register("plugins.a.Tool", passive).register("plugins.kernel.Core", passive);

        let loader = PluginLoader::new(cfg, Arc::new(registry), testing::services());
        loader.start();
        loader.wait_loaded().await.unwrap();

        let bundled = loader.plugin("plugins.kernel.Core").unwrap();
        assert!(bundled.is_bundled());
        assert!(bundled.is_kernel_plugin());
        assert_eq!(loader.dependents_of(bundled.ident()).len(), 1);

        let unsatisfied = loader.unsatisfied_dependencies();
        assert_eq!(unsatisfied.len(), 1);
        assert_eq!(unsatisfied[0].dependency.version, Version::new(2, 0, 0, 0));

        loader.shutdown().await;
    }

    #[tokio::test]
    async fn daemons_follow_generations_and_switches() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path());
        testing::install_package_with(&layout, "plugins.d.Watcher", "1.0", &[], &[Capability::Daemon]);
        testing::install_package_with(&layout, "plugins.d.Muted", "1.0", &[], &[Capability::Daemon]);

        let (watcher, muted) = (TestDaemon::new(), TestDaemon::new());
        let registry = FactoryRegistry::new();
        registry
            .add(Registration::new("plugins.d.Watcher", watcher.factory_fn()))
            .add(Registration::new("plugins.d.Muted", muted.factory_fn()));

        let mut cfg = settings(dir.path());
        cfg.disabled_daemons = vec!["plugins.d.Muted".into()];
        let loader = PluginLoader::new(cfg, Arc::new(registry), testing::services());
        loader.start();
        loader.wait_loaded().await.unwrap();

        let active: Vec<String> = loader.active_daemons().into_iter().map(|i| i.class_name).collect();
        assert_eq!(active, vec!["plugins.d.Watcher"]);
        assert_eq!(loader.daemon_plugins().len(), 2);

        loader.reload().await.unwrap();
        assert_eq!(watcher.inits(), 2);
        assert!(watcher.stopped());

        loader.set_daemon_enabled("plugins.d.Muted", true).await.unwrap();
        assert!(loader.is_daemon_enabled("plugins.d.Muted"));
        assert_eq!(loader.active_daemons().len(), 2);
        loader.set_daemon_enabled("plugins.d.Watcher", false).await.unwrap();
        assert_eq!(loader.active_daemons().len(), 1);

        loader.shutdown().await;
        assert!(loader.active_daemons().is_empty());
        assert!(muted.stopped());
    }

    /// Blocks the first resolution until released.
    struct GatedRegistry {
        inner: FactoryRegistry,
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl PluginBinaryLoader for GatedRegistry {
        fn resolve(&self, ident: &PluginIdent, host: &Version) -> Result<PluginFactory, LoadFailure> {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                entered.send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            self.inner.resolve(ident, host)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn requests_during_a_scan_yield_one_more_scan() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path());
        testing::install_package(&layout, "plugins.a.Slow", "1.0", &[]);

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let registry = GatedRegistry {
            inner: FactoryRegistry::new(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        };
        registry.inner.register("plugins.a.Slow", passive);

        let loader = PluginLoader::new(settings(dir.path()), Arc::new(registry), testing::services());
        loader.start();
        tokio::task::spawn_blocking(move || entered_rx.recv().unwrap()).await.unwrap();

        assert!(loader.is_loading());
        loader.reload_async();
        loader.reload_async();
        release_tx.send(()).unwrap();

        loader.wait_loaded().await.unwrap();
        assert_eq!(loader.scan_count(), 2);
        assert!(!loader.is_loading());
        assert!(loader.plugin("plugins.a.Slow").is_some());

        loader.shutdown().await;
    }
}
