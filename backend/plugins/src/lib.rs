//! `icy-plugins`: discovery, installation and execution of Icy plugins.
//!
//! - [`PluginLoader`] scans the local plugin tree into immutable generations
//! - [`PluginRepositoryLoader`] polls remote repositories
//! - [`PluginInstaller`] downloads, verifies and removes plugin packages
//! - [`PluginLauncher`] runs plugins on the right thread

pub mod archive;
pub mod binary;
pub mod daemon;
pub mod dispatcher;
pub mod event_bus;
pub mod installer;
pub mod launcher;
pub mod loader;
pub mod network;
pub mod plugin;
pub mod repository;
pub mod services;
pub mod task;
pub mod updater;

#[cfg(test)]
mod testing;

pub use binary::{FactoryRegistry, LoadFailure, PluginBinaryLoader, Registration};
pub use daemon::DaemonRegistry;
pub use dispatcher::{DispatcherHost, UiDispatcher};
pub use event_bus::{EventBus, PluginEvent};
pub use installer::{InstallOutcome, InstallReport, InstallerState, PluginInstaller, RemoveReport};
pub use launcher::{launch_mode, Launch, LaunchMode, PluginLauncher};
pub use loader::{Generation, LoaderSettings, PluginLoader, UnsatisfiedDependency};
pub use network::HttpFetcher;
pub use plugin::{ActionPlugin, DaemonPlugin, PluginFactory, PluginInstance};
pub use repository::{PluginRepositoryLoader, RepositorySettings};
pub use services::HostServices;
pub use task::SingleSlot;
pub use updater::{check_for_updates, find_updates, PluginUpdate, UpdateSummary};
