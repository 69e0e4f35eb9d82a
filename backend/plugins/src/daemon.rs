//! Running daemon plugins, each on its own thread.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;

use icy_core::{ExceptionReporter, HostInterface, PluginDescriptor, PluginIdent};
use tracing::{error, info, warn};

use crate::launcher::{construct, guarded, report_failure};
use crate::plugin::{DaemonPlugin, PluginFactory, PluginInstance};

struct RunningDaemon {
    ident: PluginIdent,
    daemon: Arc<dyn DaemonPlugin>,
    thread: Option<thread::JoinHandle<()>>,
}

#[derive(Default)]
pub struct DaemonRegistry {
    running: Mutex<Vec<RunningDaemon>>,
}

impl DaemonRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds, initializes and starts one daemon. Failures go to the reporter.
    pub fn start(
        &self,
        descriptor: &PluginDescriptor,
        factory: &PluginFactory,
        host: &dyn HostInterface,
        reporter: &dyn ExceptionReporter,
    ) -> bool {
        if self.is_running(descriptor.class_name()) {
            return true;
        }

        let daemon = match construct(descriptor, factory, host) {
            Ok(PluginInstance::Daemon(daemon)) => daemon,
            Ok(other) => {
                warn!(plugin = %descriptor.ident(), kind = other.kind(), "Declared daemon builds no daemon");
                return false;
            }
            Err(e) => {
                report_failure(reporter, descriptor, &e);
                return false;
            }
        };
        if let Err(e) = guarded(|| daemon.init()) {
            report_failure(reporter, descriptor, &e);
            return false;
        }

        let runner = Arc::clone(&daemon);
        let ident = descriptor.ident().clone();
        let name = ident.clone();
        let spawned = thread::Builder::new()
            .name(format!("daemon-{}", ident.simple_class_name()))
            .spawn(move || {
                if panic::catch_unwind(AssertUnwindSafe(|| runner.run())).is_err() {
                    error!(plugin = %name, "Daemon panicked");
                }
            });

        match spawned {
            Ok(handle) => {
                host.register_daemon(&ident);
                info!(plugin = %ident, "Daemon started");
                self.lock().push(RunningDaemon {
                    ident,
                    daemon,
                    thread: Some(handle),
                });
                true
            }
            Err(e) => {
                report_failure(reporter, descriptor, &anyhow::Error::from(e));
                false
            }
        }
    }

    /// Stops one daemon and waits for its thread.
    pub fn stop(&self, class_name: &str) -> bool {
        let found = {
            let mut running = self.lock();
            running
                .iter()
                .position(|d| d.ident.class_name == class_name)
                .map(|i| running.remove(i))
        };
        match found {
            Some(daemon) => {
                shutdown(daemon);
                true
            }
            None => false,
        }
    }

    /// Stops every daemon, most recently started first.
    pub fn stop_all(&self) {
        let running = std::mem::take(&mut *self.lock());
        for daemon in running.into_iter().rev() {
            shutdown(daemon);
        }
    }

    pub fn active(&self) -> Vec<PluginIdent> {
        self.lock().iter().map(|d| d.ident.clone()).collect()
    }

    pub fn is_running(&self, class_name: &str) -> bool {
        self.lock().iter().any(|d| d.ident.class_name == class_name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RunningDaemon>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn shutdown(mut daemon: RunningDaemon) {
    if panic::catch_unwind(AssertUnwindSafe(|| daemon.daemon.stop())).is_err() {
        error!(plugin = %daemon.ident, "Daemon panicked while stopping");
    }
    if let Some(handle) = daemon.thread.take() {
        if handle.join().is_err() {
            error!(plugin = %daemon.ident, "Daemon thread panicked");
        }
    }
    info!(plugin = %daemon.ident, "Daemon stopped");
}
