//! Wiring of the plugin services from the loaded configuration.

use std::sync::Arc;

use anyhow::{Context, Result};
use icy_config::IcyConfig;
use icy_core::PluginLayout;
use icy_plugins::{
    HostServices, HttpFetcher, LoaderSettings, PluginInstaller, PluginLauncher, PluginLoader, PluginRepositoryLoader,
    RepositorySettings,
};
use tracing::{debug, info};

use crate::builtin::{self, HostBinaries};
use crate::console::{CancelFlag, ConsoleHost, TerminalNotifier};

/// Running plugin services for one command.
pub struct App {
    pub config: IcyConfig,
    pub services: HostServices,
    pub loader: PluginLoader,
    pub repository: PluginRepositoryLoader,
    pub installer: PluginInstaller,
}

impl App {
    pub fn new(config: IcyConfig) -> Result<Self> {
        let host_version = config.host_version().context("Invalid host version")?;
        let cancel = CancelFlag::default();

        let mut services = HostServices::with_fetcher(Arc::new(HttpFetcher::new()?));
        if !config.is_headless() {
            cancel.watch_ctrl_c();
            services = services
                .host(Arc::new(ConsoleHost::new(cancel)?))
                .notifier(Arc::new(TerminalNotifier));
        }

        let layout = PluginLayout::new(config.plugin_root());
        debug!(root = %layout.root().display(), host = %host_version, "Plugin services configured");

        let loader = PluginLoader::new(
            LoaderSettings {
                layout,
                host_version,
                excluded_suffixes: config.excluded_suffixes(),
                disabled_daemons: config.disabled_daemons(),
                bundled: builtin::bundled_manifests(host_version)?,
            },
            Arc::new(HostBinaries::new(host_version)),
            services.clone(),
        );
        let repository = PluginRepositoryLoader::new(
            RepositorySettings {
                host_version,
                accept_beta: config.accept_beta(),
                repositories: config.repository_sources(),
            },
            services.clone(),
        );
        let installer = PluginInstaller::new(loader.clone(), repository.clone(), services.clone());

        Ok(Self {
            config,
            services,
            loader,
            repository,
            installer,
        })
    }

    /// Starts the loader, the repository poller and the installer.
    pub fn start(&self) {
        self.loader.start();
        self.repository.start();
        self.installer.start();
    }

    pub fn launcher(&self) -> PluginLauncher {
        PluginLauncher::new(Arc::clone(&self.services.host), Arc::clone(&self.services.reporter))
    }

    pub fn show_progress(&self) -> bool {
        self.config.show_progress()
    }

    /// With `plugins.autoCheck`, installs the dependencies the first scan
    /// found missing. Returns how many installs were queued.
    pub async fn auto_check(&self) -> Result<usize> {
        if !self.config.auto_check() {
            return Ok(0);
        }
        self.loader.wait_loaded().await?;
        if self.loader.unsatisfied_dependencies().is_empty() {
            return Ok(0);
        }
        let queued = self
            .loader
            .check_plugins(&self.installer, &self.repository, self.show_progress())
            .await?;
        if !queued.is_empty() {
            info!(count = queued.len(), "Installing missing plugin dependencies");
            self.installer.wait_install().await?;
        }
        Ok(queued.len())
    }

    /// Stops services in reverse start order; running daemons are stopped by the loader.
    pub async fn shutdown(&self) {
        self.installer.shutdown().await;
        self.repository.shutdown().await;
        self.loader.shutdown().await;
    }
}
