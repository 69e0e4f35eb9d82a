//! Plugin installer.
//!
//! One worker task owns two FIFOs, installs and removals, each behind its own
//! lock. The worker drains installs, then removals, until both are empty and
//! sleeps until the next request. Every installed file is backed up first and
//! restored when the download or the package check fails.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use icy_core::{
    is_interruption, Announcement, IcyError, NoProgress, PluginDescriptor, PluginIdent, PluginLayout,
    ProgressReporter,
};
use icy_logging::{PluginActivity, PluginEventLogger};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::archive;
use crate::binary::LoadFailure;
use crate::event_bus::PluginEvent;
use crate::launcher::report_failure;
use crate::loader::PluginLoader;
use crate::repository::PluginRepositoryLoader;
use crate::services::HostServices;

/// A queued install or removal. Two requests for the same plugin are equal.
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub descriptor: Arc<PluginDescriptor>,
    pub show_progress: bool,
}

impl PartialEq for InstallRequest {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}

impl Eq for InstallRequest {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallOutcome {
    Installed,
    /// Installed, but the host is too old to load it.
    NeedsNewerHost,
    Failed,
}

impl InstallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallOutcome::Installed => "installed",
            InstallOutcome::NeedsNewerHost => "needs_newer_host",
            InstallOutcome::Failed => "failed",
        }
    }
}

/// Result of one install batch; every plugin of the batch is in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<PluginIdent>,
    pub needs_newer_host: Vec<PluginIdent>,
    pub failed: Vec<PluginIdent>,
}

impl InstallReport {
    fn record(&mut self, ident: PluginIdent, outcome: InstallOutcome) {
        match outcome {
            InstallOutcome::Installed => self.installed.push(ident),
            InstallOutcome::NeedsNewerHost => self.needs_newer_host.push(ident),
            InstallOutcome::Failed => self.failed.push(ident),
        }
    }

    pub fn total(&self) -> usize {
        self.installed.len() + self.needs_newer_host.len() + self.failed.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveReport {
    pub removed: Vec<PluginIdent>,
    pub failed: Vec<PluginIdent>,
}

/// Snapshot of the installer, published on every change.
#[derive(Debug, Clone, Default)]
pub struct InstallerState {
    pub installing: Vec<PluginIdent>,
    pub removing: Vec<PluginIdent>,
    pub queued_installs: Vec<PluginIdent>,
    pub queued_removals: Vec<PluginIdent>,
    pub last_install: Option<InstallReport>,
    pub last_remove: Option<RemoveReport>,
}

impl InstallerState {
    fn install_idle(&self) -> bool {
        self.installing.is_empty() && self.queued_installs.is_empty()
    }

    fn remove_idle(&self) -> bool {
        self.removing.is_empty() && self.queued_removals.is_empty()
    }
}

#[derive(Clone)]
pub struct PluginInstaller {
    inner: Arc<InstallerInner>,
}

struct InstallerInner {
    loader: PluginLoader,
    repository: PluginRepositoryLoader,
    services: HostServices,
    install_queue: Mutex<VecDeque<InstallRequest>>,
    remove_queue: Mutex<VecDeque<InstallRequest>>,
    wake: Notify,
    state: watch::Sender<InstallerState>,
    closed: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

enum Queue {
    Install,
    Remove,
}

impl PluginInstaller {
    pub fn new(loader: PluginLoader, repository: PluginRepositoryLoader, services: HostServices) -> Self {
        let (state, _) = watch::channel(InstallerState::default());
        Self {
            inner: Arc::new(InstallerInner {
                loader,
                repository,
                services,
                install_queue: Mutex::new(VecDeque::new()),
                remove_queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                state,
                closed: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn start(&self) {
        let mut worker = self.inner.worker.lock().unwrap_or_else(|p| p.into_inner());
        if worker.is_none() {
            let inner = Arc::clone(&self.inner);
            *worker = Some(tokio::spawn(async move { inner.run().await }));
            debug!("Plugin installer started");
        }
    }

    /// Finishes the running batch and stops; queued requests are dropped.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.wake.notify_one();
        let worker = self.inner.worker.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Installer worker failed");
            }
        }
        self.inner.state.send_modify(|_| {});
    }

    /// Queues an install; returns `false` when the plugin is already queued.
    pub fn install(&self, descriptor: Arc<PluginDescriptor>, show_progress: bool) -> bool {
        self.inner.enqueue(Queue::Install, InstallRequest { descriptor, show_progress })
    }

    /// Queues a removal; returns `false` when the plugin is already queued.
    pub fn remove(&self, descriptor: Arc<PluginDescriptor>, show_progress: bool) -> bool {
        self.inner.enqueue(Queue::Remove, InstallRequest { descriptor, show_progress })
    }

    pub fn state(&self) -> InstallerState {
        self.inner.state.borrow().clone()
    }

    pub fn is_processing(&self) -> bool {
        let state = self.inner.state.borrow();
        !state.install_idle() || !state.remove_idle()
    }

    pub fn is_installing(&self) -> bool {
        !self.inner.state.borrow().install_idle()
    }

    pub fn is_installing_plugin(&self, descriptor: &PluginDescriptor) -> bool {
        self.inner.state.borrow().installing.contains(descriptor.ident())
    }

    pub fn is_waiting_for_install(&self, descriptor: &PluginDescriptor) -> bool {
        self.inner.state.borrow().queued_installs.contains(descriptor.ident())
    }

    pub fn is_removing(&self) -> bool {
        !self.inner.state.borrow().remove_idle()
    }

    pub fn is_removing_plugin(&self, descriptor: &PluginDescriptor) -> bool {
        self.inner.state.borrow().removing.contains(descriptor.ident())
    }

    pub fn is_waiting_for_remove(&self, descriptor: &PluginDescriptor) -> bool {
        self.inner.state.borrow().queued_removals.contains(descriptor.ident())
    }

    /// Waits until no install is queued or running.
    pub async fn wait_install(&self) -> Result<(), IcyError> {
        self.wait_until(InstallerState::install_idle).await
    }

    /// Waits until no removal is queued or running.
    pub async fn wait_remove(&self) -> Result<(), IcyError> {
        self.wait_until(InstallerState::remove_idle).await
    }

    async fn wait_until(&self, idle: fn(&InstallerState) -> bool) -> Result<(), IcyError> {
        let mut rx = self.inner.state.subscribe();
        let closed = &self.inner.closed;
        rx.wait_for(|s| idle(s) || closed.load(Ordering::Acquire))
            .await
            .map_err(|_| IcyError::ServiceStopped("plugin-installer".into()))?;
        if idle(&self.inner.state.borrow()) {
            Ok(())
        } else {
            Err(IcyError::ServiceStopped("plugin-installer".into()))
        }
    }
}

impl InstallerInner {
    fn queue(&self, which: &Queue) -> &Mutex<VecDeque<InstallRequest>> {
        match which {
            Queue::Install => &self.install_queue,
            Queue::Remove => &self.remove_queue,
        }
    }

    fn enqueue(&self, which: Queue, request: InstallRequest) -> bool {
        if self.closed.load(Ordering::Acquire) {
            warn!(plugin = %request.descriptor.ident(), "Installer stopped, request dropped");
            return false;
        }
        {
            let mut queue = self.queue(&which).lock().unwrap_or_else(|p| p.into_inner());
            if queue.contains(&request) {
                debug!(plugin = %request.descriptor.ident(), "Already queued");
                return false;
            }
            queue.push_back(request);
            // Published under the queue lock so the snapshot never runs behind the queue.
            let idents: Vec<PluginIdent> = queue.iter().map(|r| r.descriptor.ident().clone()).collect();
            self.state.send_modify(|s| match which {
                Queue::Install => s.queued_installs = idents,
                Queue::Remove => s.queued_removals = idents,
            });
        }
        self.wake.notify_one();
        true
    }

    /// Takes everything queued right now.
    fn take_batch(&self, which: Queue) -> Vec<InstallRequest> {
        let mut queue = self.queue(&which).lock().unwrap_or_else(|p| p.into_inner());
        let batch: Vec<InstallRequest> = queue.drain(..).collect();
        if !batch.is_empty() {
            let idents: Vec<PluginIdent> = batch.iter().map(|r| r.descriptor.ident().clone()).collect();
            self.state.send_modify(|s| match which {
                Queue::Install => {
                    s.queued_installs.clear();
                    s.installing = idents;
                }
                Queue::Remove => {
                    s.queued_removals.clear();
                    s.removing = idents;
                }
            });
        }
        batch
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.closed.load(Ordering::Acquire) {
                break;
            }
            loop {
                let installs = self.take_batch(Queue::Install);
                if !installs.is_empty() {
                    let report = self.install_batch(installs).await;
                    self.state.send_modify(|s| {
                        s.installing.clear();
                        s.last_install = Some(report);
                    });
                    continue;
                }
                let removals = self.take_batch(Queue::Remove);
                if !removals.is_empty() {
                    let report = self.remove_batch(removals).await;
                    self.state.send_modify(|s| {
                        s.removing.clear();
                        s.last_remove = Some(report);
                    });
                    continue;
                }
                break;
            }
            self.wake.notified().await;
        }
        debug!("Plugin installer stopped");
    }

    fn layout(&self) -> &PluginLayout {
        self.loader.layout()
    }

    fn open_progress(&self, batch: &[InstallRequest], title: &str) -> Box<dyn ProgressReporter> {
        if batch.iter().any(|r| r.show_progress) && !self.services.host.is_headless() {
            self.services.host.open_progress(title)
        } else {
            Box::new(NoProgress)
        }
    }

    async fn install_batch(&self, batch: Vec<InstallRequest>) -> InstallReport {
        let progress = self.open_progress(&batch, "Installing plugins");
        let mut report = InstallReport::default();
        let mut outcomes: Vec<(Arc<PluginDescriptor>, InstallOutcome)> = Vec::new();

        progress.set_message("Resolving dependencies");
        let (ordered, unresolved) = self.resolve_batch(&batch).await;
        let mut failed_classes: HashSet<String> = HashSet::new();
        for descriptor in unresolved {
            error!(plugin = %descriptor.ident(), "Cannot resolve plugin dependencies");
            failed_classes.insert(descriptor.class_name().to_string());
            outcomes.push((descriptor, InstallOutcome::Failed));
        }

        let mut downloaded: Vec<Arc<PluginDescriptor>> = Vec::new();
        progress.set_length(ordered.len() as u64);
        for (index, descriptor) in ordered.into_iter().enumerate() {
            progress.set_position(index as u64);
            // Dependencies come first in `ordered`, so their fate is already known.
            if let Some(dependency) = descriptor
                .dependencies()
                .into_iter()
                .find(|d| failed_classes.contains(&d.class_name))
            {
                error!(plugin = %descriptor.ident(), dependency = %dependency, "Dependency failed to install, skipping plugin");
                failed_classes.insert(descriptor.class_name().to_string());
                outcomes.push((descriptor, InstallOutcome::Failed));
                continue;
            }
            if progress.is_cancel_requested() {
                info!(plugin = %descriptor.ident(), "Install cancelled");
                failed_classes.insert(descriptor.class_name().to_string());
                outcomes.push((descriptor, InstallOutcome::Failed));
                continue;
            }
            progress.set_message(&format!("Installing {}", descriptor.name()));
            match self.install_one(&descriptor, progress.as_ref()).await {
                Ok(()) => downloaded.push(descriptor),
                Err(e) => {
                    failed_classes.insert(descriptor.class_name().to_string());
                    if !is_interruption(&e) {
                        error!(plugin = %descriptor.ident(), error = format!("{e:#}"), "Plugin install failed");
                        PluginEventLogger::log(PluginActivity::Failure {
                            class_name: descriptor.class_name().to_string(),
                            message: format!("{e:#}"),
                        });
                    }
                    outcomes.push((descriptor, InstallOutcome::Failed));
                }
            }
        }

        if !downloaded.is_empty() {
            progress.set_message("Reloading plugins");
            if let Err(e) = self.loader.reload().await {
                error!(error = %e, "Plugin reload after install failed");
            }
        }
        for descriptor in downloaded {
            let outcome = self.classify(&descriptor);
            outcomes.push((descriptor, outcome));
        }

        for (descriptor, outcome) in outcomes {
            let ident = descriptor.ident().clone();
            PluginEventLogger::log(PluginActivity::Installed {
                class_name: ident.class_name.clone(),
                version: ident.version.to_string(),
                outcome: outcome.as_str().to_string(),
            });
            self.services.events.publish(PluginEvent::Installed {
                ident: ident.clone(),
                outcome,
            });
            report.record(ident, outcome);
        }

        progress.close();
        self.summarize_install(&report);
        report
    }

    /// Orders the batch with dependencies first. Returns the ordered list and
    /// the requested plugins whose dependencies cannot be found.
    async fn resolve_batch(&self, batch: &[InstallRequest]) -> (Vec<Arc<PluginDescriptor>>, Vec<Arc<PluginDescriptor>>) {
        let mut ordered: Vec<Arc<PluginDescriptor>> = Vec::new();
        let mut unresolved = Vec::new();

        for request in batch {
            let mut plan = Vec::new();
            let mut visiting = HashSet::new();
            match self.resolve(Arc::clone(&request.descriptor), &mut plan, &mut visiting).await {
                Ok(()) => {
                    for descriptor in plan {
                        if !ordered.iter().any(|d| d.class_name() == descriptor.class_name()) {
                            ordered.push(descriptor);
                        }
                    }
                }
                Err(e) => {
                    warn!(plugin = %request.descriptor.ident(), error = format!("{e:#}"), "Unresolved dependency");
                    unresolved.push(Arc::clone(&request.descriptor));
                }
            }
        }
        (ordered, unresolved)
    }

    /// Depth-first: dependencies land in `plan` before their dependents.
    async fn resolve(
        &self,
        descriptor: Arc<PluginDescriptor>,
        plan: &mut Vec<Arc<PluginDescriptor>>,
        visiting: &mut HashSet<String>,
    ) -> Result<()> {
        let mut stack = vec![(descriptor, false)];
        while let Some((descriptor, expanded)) = stack.pop() {
            let class_name = descriptor.class_name().to_string();
            if expanded {
                if !plan.iter().any(|d| d.class_name() == class_name) {
                    plan.push(descriptor);
                }
                continue;
            }
            if !visiting.insert(class_name) {
                continue;
            }
            if !descriptor.load_descriptor(self.services.fetcher.as_ref()).await {
                return Err(anyhow!("cannot load descriptor of {}", descriptor.ident()));
            }

            let dependencies = descriptor.dependencies();
            stack.push((descriptor, true));
            for dependency in dependencies.into_iter().rev() {
                if self.is_satisfied_locally(&dependency) {
                    continue;
                }
                let online = self
                    .repository
                    .plugin_for(&dependency, true)
                    .ok_or_else(|| IcyError::MissingDependency(dependency.to_string()))?;
                stack.push((online, false));
            }
        }
        Ok(())
    }

    fn is_satisfied_locally(&self, dependency: &PluginIdent) -> bool {
        self.loader.load_failure(&dependency.class_name).is_none()
            && self
                .loader
                .plugin(&dependency.class_name)
                .is_some_and(|local| local.ident().is_greater_or_equal(dependency))
    }

    /// Backup, download, verify; restores the backup on any failure.
    async fn install_one(&self, descriptor: &PluginDescriptor, progress: &dyn ProgressReporter) -> Result<()> {
        let class_name = descriptor.class_name();
        let files = self.layout().plugin_files(class_name);

        let backups = backup(self.layout(), &files)
            .await
            .with_context(|| format!("backup of {class_name} failed"))?;

        let result = self.download(descriptor, &files, progress).await;
        if result.is_err() {
            restore(&files, &backups).await;
        }
        discard_backups(&backups).await;

        if result.is_ok() {
            info!(plugin = %descriptor.ident(), "Plugin downloaded");
        }
        result
    }

    /// Jar, check and descriptor make the plugin; icon and image are extras.
    /// Once the descriptor is written the plugin is committed, and a cancel
    /// request only skips the extras still to fetch.
    async fn download(&self, descriptor: &PluginDescriptor, files: &[PathBuf; 4], progress: &dyn ProgressReporter) -> Result<()> {
        let [jar, icon, image, xml] = files;
        let meta = descriptor.meta().clone();
        let credentials = descriptor.repository().and_then(|r| r.credentials.clone());
        let fetcher = self.services.fetcher.as_ref();

        if meta.jar_url.is_empty() {
            return Err(IcyError::Descriptor(format!("{} has no jar url", descriptor.ident())).into());
        }
        let bytes = fetcher.fetch(&meta.jar_url, credentials.as_ref()).await?;
        write_file(jar, &bytes).await?;
        archive::verify(jar.clone(), descriptor.class_name()).await?;
        write_file(xml, descriptor.to_xml()?.as_bytes()).await?;

        for (url, path) in [(&meta.icon_url, icon), (&meta.image_url, image)] {
            if progress.is_cancel_requested() {
                info!(plugin = %descriptor.ident(), "Cancelled, skipping remaining plugin assets");
                break;
            }
            if url.is_empty() {
                continue;
            }
            match fetcher.fetch(url, credentials.as_ref()).await {
                Ok(bytes) => write_file(path, &bytes).await?,
                Err(e) => warn!(plugin = %descriptor.ident(), url = %url, error = %e, "Optional plugin asset unavailable"),
            }
        }
        Ok(())
    }

    fn classify(&self, descriptor: &PluginDescriptor) -> InstallOutcome {
        match self.loader.load_failure(descriptor.class_name()) {
            Some(LoadFailure::NeedsNewerHost { .. }) => InstallOutcome::NeedsNewerHost,
            Some(failure) => {
                report_failure(self.services.reporter.as_ref(), descriptor, &anyhow!(failure));
                InstallOutcome::Failed
            }
            None if self.loader.plugin(descriptor.class_name()).is_some() => InstallOutcome::Installed,
            None => {
                warn!(plugin = %descriptor.ident(), "Installed package was not picked up by the loader");
                InstallOutcome::Failed
            }
        }
    }

    fn summarize_install(&self, report: &InstallReport) {
        info!(
            installed = report.installed.len(),
            needs_newer_host = report.needs_newer_host.len(),
            failed = report.failed.len(),
            "Install batch finished"
        );
        if self.services.host.is_headless() || report.total() == 0 {
            return;
        }

        let names = |idents: &[PluginIdent]| {
            idents
                .iter()
                .map(|i| i.simple_class_name().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut message = String::new();
        if !report.installed.is_empty() {
            message.push_str(&format!("Installed: {}. ", names(&report.installed)));
        }
        if !report.needs_newer_host.is_empty() {
            message.push_str(&format!("Needs a newer Icy: {}. ", names(&report.needs_newer_host)));
        }
        if !report.failed.is_empty() {
            message.push_str(&format!("Failed: {}.", names(&report.failed)));
        }
        let message = message.trim_end().to_string();

        let announcement = if report.installed.len() == report.total() {
            Announcement::Success(message)
        } else if report.installed.is_empty() {
            Announcement::Failure(message)
        } else {
            Announcement::PartialFailure(message)
        };
        self.services.notifier.announce(announcement);
    }

    async fn remove_batch(&self, batch: Vec<InstallRequest>) -> RemoveReport {
        let progress = self.open_progress(&batch, "Removing plugins");
        let mut report = RemoveReport::default();

        for request in &batch {
            let ident = request.descriptor.ident().clone();
            progress.set_message(&format!("Removing {}", request.descriptor.name()));
            let success = remove_files(self.layout(), &ident.class_name).await;
            if success {
                info!(plugin = %ident, "Plugin removed");
                report.removed.push(ident.clone());
            } else {
                error!(plugin = %ident, "Plugin removal failed");
                report.failed.push(ident.clone());
            }
            PluginEventLogger::log(PluginActivity::Removed {
                class_name: ident.class_name.clone(),
                version: ident.version.to_string(),
                success,
            });
            self.services.events.publish(PluginEvent::Removed { ident, success });
        }
        progress.close();

        if let Err(e) = self.loader.reload().await {
            error!(error = %e, "Plugin reload after removal failed");
        }

        info!(removed = report.removed.len(), failed = report.failed.len(), "Remove batch finished");
        if !self.services.host.is_headless() {
            let announcement = match (report.removed.len(), report.failed.len()) {
                (n, 0) => Announcement::Success(format!("{n} plugin(s) removed")),
                (0, n) => Announcement::Failure(format!("{n} plugin(s) could not be removed")),
                (ok, ko) => Announcement::PartialFailure(format!("{ok} plugin(s) removed, {ko} failed")),
            };
            self.services.notifier.announce(announcement);
        }
        report
    }
}

/// Copies every existing file aside. Returns `(original, backup)` pairs.
async fn backup(layout: &PluginLayout, files: &[PathBuf]) -> Result<HashMap<PathBuf, PathBuf>> {
    let mut backups = HashMap::new();
    for file in files {
        if !tokio::fs::try_exists(file).await.unwrap_or(false) {
            continue;
        }
        let target = layout.backup_path(file);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(file, &target)
            .await
            .with_context(|| format!("copy {} to {}", file.display(), target.display()))?;
        backups.insert(file.clone(), target);
    }
    Ok(backups)
}

/// Puts backups back; files that had none are deleted.
async fn restore(files: &[PathBuf], backups: &HashMap<PathBuf, PathBuf>) {
    for file in files {
        let result = match backups.get(file) {
            Some(saved) => tokio::fs::copy(saved, file).await.map(|_| ()),
            None => match tokio::fs::remove_file(file).await {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        if let Err(e) = result {
            error!(file = %file.display(), error = %e, "Failed to restore plugin file");
        }
    }
}

async fn discard_backups(backups: &HashMap<PathBuf, PathBuf>) {
    for saved in backups.values() {
        if let Err(e) = tokio::fs::remove_file(saved).await {
            warn!(file = %saved.display(), error = %e, "Failed to delete backup");
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("write {}", path.display()))
}

/// Deletes all files of a plugin. Only the jar decides success; the other
/// files are still attempted when it cannot be deleted.
async fn remove_files(layout: &PluginLayout, class_name: &str) -> bool {
    let [jar, extras @ ..] = layout.plugin_files(class_name);

    let jar_removed = match tokio::fs::remove_file(&jar).await {
        Ok(()) => true,
        Err(e) => {
            error!(file = %jar.display(), error = %e, "Cannot delete plugin package");
            false
        }
    };
    for file in extras {
        match tokio::fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(file = %file.display(), error = %e, "Cannot delete plugin file"),
        }
    }
    jar_removed
}
