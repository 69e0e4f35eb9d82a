//! Interfaces of the collaborators the plugin pipeline talks to: the hosting
//! application, its progress and announcement widgets, crash reporting, and
//! the network.

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::ident::PluginIdent;

/// Basic-auth credentials of a repository.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

/// A configured remote plugin repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySource {
    pub name: String,
    pub location: String,
    pub enabled: bool,
    /// Whether the repository understands the `kernelVersion`/`beta` query parameters.
    pub support_param: bool,
    pub credentials: Option<Credentials>,
}

/// Fetches a resource by URL.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str, credentials: Option<&Credentials>) -> Result<Vec<u8>>;
}

/// Work item executed on the host's UI thread.
pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// The application hosting the plugins.
pub trait HostInterface: Send + Sync {
    /// No UI at all: everything runs on the calling thread and popups are suppressed.
    fn is_headless(&self) -> bool;

    /// Runs `task` on the UI thread and blocks until it finished.
    fn invoke_on_ui(&self, task: UiTask) -> Result<()>;

    /// Called once per daemon started after a reload.
    fn register_daemon(&self, _ident: &PluginIdent) {}

    /// Opens a progress widget for a long operation.
    fn open_progress(&self, _title: &str) -> Box<dyn ProgressReporter> {
        Box::new(NoProgress)
    }
}

/// Host without a UI thread; tasks run inline.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeadlessHost;

impl HostInterface for HeadlessHost {
    fn is_headless(&self) -> bool {
        true
    }

    fn invoke_on_ui(&self, task: UiTask) -> Result<()> {
        task();
        Ok(())
    }
}

/// Progress widget of a long-running operation.
pub trait ProgressReporter: Send + Sync {
    fn set_message(&self, message: &str);
    fn set_position(&self, position: u64);
    fn set_length(&self, length: u64);
    /// Cooperative cancellation flag, polled between steps.
    fn is_cancel_requested(&self) -> bool;
    fn close(&self);
}

/// Progress sink that shows nothing and is never cancelled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn set_message(&self, _message: &str) {}
    fn set_position(&self, _position: u64) {}
    fn set_length(&self, _length: u64) {}
    fn is_cancel_requested(&self) -> bool {
        false
    }
    fn close(&self) {}
}

/// Transient notification shown to the user after a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    Success(String),
    PartialFailure(String),
    Failure(String),
}

impl Announcement {
    pub fn message(&self) -> &str {
        match self {
            Announcement::Success(m) | Announcement::PartialFailure(m) | Announcement::Failure(m) => m,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn announce(&self, announcement: Announcement);
}

/// Notifier writing announcements to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn announce(&self, announcement: Announcement) {
        match &announcement {
            Announcement::Success(m) => info!(target: "announcements", "{m}"),
            Announcement::PartialFailure(m) => warn!(target: "announcements", "{m}"),
            Announcement::Failure(m) => error!(target: "announcements", "{m}"),
        }
    }
}

/// Forwards plugin failures to the plugin's maintainers.
pub trait ExceptionReporter: Send + Sync {
    fn report(&self, plugin: &PluginIdent, maintainer: Option<&str>, err: &anyhow::Error);
}

/// Reporter that only records the failure in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogExceptionReporter;

impl ExceptionReporter for LogExceptionReporter {
    fn report(&self, plugin: &PluginIdent, maintainer: Option<&str>, err: &anyhow::Error) {
        error!(
            plugin = %plugin,
            maintainer = maintainer.unwrap_or("unknown"),
            error = format!("{err:#}"),
            "Plugin failure"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn headless_host_runs_inline() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        HeadlessHost
            .invoke_on_ui(Box::new(move || flag.store(true, Ordering::SeqCst)))
            .unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials {
            login: "me".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
