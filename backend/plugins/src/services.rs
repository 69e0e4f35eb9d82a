//! Collaborators shared by the loader, the repository loader and the installer.

use std::sync::Arc;

use icy_core::{
    ExceptionReporter, HeadlessHost, HostInterface, LogExceptionReporter, LogNotifier, Notifier, ResourceFetcher,
};

use crate::event_bus::EventBus;

#[derive(Clone)]
pub struct HostServices {
    pub host: Arc<dyn HostInterface>,
    pub reporter: Arc<dyn ExceptionReporter>,
    pub notifier: Arc<dyn Notifier>,
    pub fetcher: Arc<dyn ResourceFetcher>,
    pub events: EventBus,
}

impl HostServices {
    /// Headless host with log-only reporting around `fetcher`.
    pub fn with_fetcher(fetcher: Arc<dyn ResourceFetcher>) -> Self {
        Self {
            host: Arc::new(HeadlessHost),
            reporter: Arc::new(LogExceptionReporter),
            notifier: Arc::new(LogNotifier),
            fetcher,
            events: EventBus::new(),
        }
    }

    pub fn host(mut self, host: Arc<dyn HostInterface>) -> Self {
        self.host = host;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ExceptionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}
