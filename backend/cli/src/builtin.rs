//! Plugins linked into the `icy` binary, and the entry point table.

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use anyhow::Result;
use icy_core::{xml, Capability, DescriptorMeta, IcyError, PluginIdent, Version};
use icy_plugins::{
    ActionPlugin, DaemonPlugin, FactoryRegistry, LoadFailure, PluginBinaryLoader, PluginFactory, PluginInstance,
};
use tracing::{debug, info};

pub const ABOUT_CLASS: &str = "plugins.kernel.about.About";
pub const HEARTBEAT_CLASS: &str = "plugins.kernel.heartbeat.Heartbeat";

struct About {
    host: Version,
}

impl ActionPlugin for About {
    fn run(&mut self) -> Result<()> {
        println!("Icy plugin host {}", self.host);
        Ok(())
    }
}

/// Logs a line every interval until stopped.
struct Heartbeat {
    interval: Duration,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl DaemonPlugin for Heartbeat {
    fn init(&self) -> Result<()> {
        debug!(interval = ?self.interval, "Heartbeat ready");
        Ok(())
    }

    fn run(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(|p| p.into_inner());
        while !*stopped {
            let (guard, timeout) = self
                .wake
                .wait_timeout(stopped, self.interval)
                .unwrap_or_else(|p| p.into_inner());
            stopped = guard;
            if timeout.timed_out() {
                info!(target: "heartbeat", "alive");
            }
        }
    }

    fn stop(&self) {
        *self.stopped.lock().unwrap_or_else(|p| p.into_inner()) = true;
        self.wake.notify_all();
    }
}

/// Manifests of the built-in plugins, fed to the loader as bundled plugins.
pub fn bundled_manifests(host: Version) -> Result<Vec<String>, IcyError> {
    let manifest = |class: &str, name: &str, description: &str, capabilities: &[Capability]| {
        let meta = DescriptorMeta {
            name: name.to_string(),
            author: "Icy".to_string(),
            description: description.to_string(),
            capabilities: capabilities.iter().copied().collect::<BTreeSet<_>>(),
            ..Default::default()
        };
        xml::write_descriptor(&PluginIdent::new(class, host), &meta)
    };
    Ok(vec![
        manifest(
            ABOUT_CLASS,
            "About",
            "Prints the host version",
            &[Capability::Actionable, Capability::NoUiConstructor],
        )?,
        manifest(HEARTBEAT_CLASS, "Heartbeat", "Logs periodically while running", &[Capability::Daemon])?,
    ])
}

pub fn registry(host: Version) -> FactoryRegistry {
    let registry = FactoryRegistry::new();
    registry
        .register(ABOUT_CLASS, move || Ok(PluginInstance::Action(Box::new(About { host }))))
        .register(HEARTBEAT_CLASS, || {
            Ok(PluginInstance::Daemon(Arc::new(Heartbeat {
                interval: Duration::from_secs(60),
                stopped: Mutex::new(false),
                wake: Condvar::new(),
            })))
        });
    registry
}

/// Entry points of the binary. Packages without linked code load as passive
/// plugins, which is enough for libraries and dependency checks.
pub struct HostBinaries {
    linked: FactoryRegistry,
}

impl HostBinaries {
    pub fn new(host: Version) -> Self {
        Self { linked: registry(host) }
    }
}

impl PluginBinaryLoader for HostBinaries {
    fn resolve(&self, ident: &PluginIdent, host: &Version) -> Result<PluginFactory, LoadFailure> {
        match self.linked.resolve(ident, host) {
            Err(LoadFailure::NotAPlugin(_)) => {
                debug!(plugin = %ident, "No linked code, loading as passive plugin");
                Ok(Arc::new(|| Ok(PluginInstance::Passive)))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlinked_classes_load_as_passive() {
        let host = Version::new(2, 5, 0, 0);
        let binaries = HostBinaries::new(host);

        let about = binaries.resolve(&PluginIdent::new(ABOUT_CLASS, host), &host).ok().unwrap();
        assert_eq!(about().unwrap().kind(), "action");

        let library = binaries
            .resolve(&PluginIdent::new("plugins.lib.Math", Version::new(1, 0, 0, 0)), &host)
            .ok()
            .unwrap();
        assert_eq!(library().unwrap().kind(), "passive");
    }

    #[test]
    fn manifests_parse_back() {
        let host = Version::new(2, 5, 0, 0);
        let parsed: Vec<PluginIdent> = bundled_manifests(host)
            .unwrap()
            .iter()
            .map(|raw| xml::parse_descriptor(raw).unwrap().0)
            .collect();
        assert_eq!(parsed[0].class_name, ABOUT_CLASS);
        assert_eq!(parsed[1].version, host);
    }
}
