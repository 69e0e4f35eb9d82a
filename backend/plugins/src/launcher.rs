//! Plugin launcher.
//!
//! | declares   | headless           | interactive                    |
//! |------------|--------------------|--------------------------------|
//! | threaded   | run on caller      | own thread, fire and forget    |
//! | actionable | run on caller      | UI thread, caller blocks       |
//!
//! Instances are built on the UI thread unless the plugin declares
//! `no_ui_constructor` or the host is headless.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{anyhow, Result};
use icy_core::{is_interruption, Capability, ExceptionReporter, HostInterface, IcyError, PluginDescriptor};
use tracing::{debug, info};

use crate::loader::PluginLoader;
use crate::plugin::{PluginFactory, PluginInstance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Dedicated thread, the caller does not wait.
    Detached,
    /// On the calling thread.
    Inline,
    /// On the UI thread, the caller waits.
    OnUiThread,
}

/// How a plugin runs, `None` when it declares nothing runnable.
pub fn launch_mode(descriptor: &PluginDescriptor, headless: bool) -> Option<LaunchMode> {
    if descriptor.has_capability(Capability::Threaded) {
        Some(if headless { LaunchMode::Inline } else { LaunchMode::Detached })
    } else if descriptor.has_capability(Capability::Actionable) {
        Some(if headless { LaunchMode::Inline } else { LaunchMode::OnUiThread })
    } else {
        None
    }
}

#[derive(Debug)]
pub enum Launch {
    Completed,
    Spawned(thread::JoinHandle<()>),
    /// Stopped by an interruption; nothing was reported.
    Interrupted,
    /// The failure went to the exception reporter.
    Failed,
    NotRunnable,
}

pub struct PluginLauncher {
    host: Arc<dyn HostInterface>,
    reporter: Arc<dyn ExceptionReporter>,
}

impl PluginLauncher {
    pub fn new(host: Arc<dyn HostInterface>, reporter: Arc<dyn ExceptionReporter>) -> Self {
        Self { host, reporter }
    }

    /// Launches the plugin of `class_name` from the loader's current generation.
    pub fn start_class(&self, loader: &PluginLoader, class_name: &str) -> Result<Launch> {
        let descriptor = loader
            .plugin(class_name)
            .ok_or_else(|| IcyError::EntryPointNotFound(class_name.to_string()))?;
        let factory = loader
            .factory(class_name)
            .ok_or_else(|| IcyError::EntryPointNotFound(class_name.to_string()))?;
        Ok(self.start(&descriptor, &factory))
    }

    pub fn start(&self, descriptor: &Arc<PluginDescriptor>, factory: &PluginFactory) -> Launch {
        let headless = self.host.is_headless();
        let Some(mode) = launch_mode(descriptor, headless) else {
            debug!(plugin = %descriptor.ident(), "Plugin declares nothing to run");
            return Launch::NotRunnable;
        };
        info!(plugin = %descriptor.ident(), mode = ?mode, "Launching plugin");

        match mode {
            LaunchMode::Inline => self.finish(descriptor, construct_and_run(descriptor, factory, self.host.as_ref())),
            LaunchMode::OnUiThread => {
                let (tx, rx) = mpsc::channel();
                let (desc, factory) = (Arc::clone(descriptor), Arc::clone(factory));
                // Already on the UI thread once inside, so the constructor runs there too.
                let task = Box::new(move || {
                    let _ = tx.send(guarded(|| factory()).and_then(|instance| run_instance(&desc, instance)));
                });
                let result = self
                    .host
                    .invoke_on_ui(task)
                    .and_then(|()| rx.recv().map_err(|_| anyhow!("plugin task did not complete")))
                    .and_then(|result| result);
                self.finish(descriptor, result)
            }
            LaunchMode::Detached => {
                let (desc, factory) = (Arc::clone(descriptor), Arc::clone(factory));
                let (host, reporter) = (Arc::clone(&self.host), Arc::clone(&self.reporter));
                let spawned = thread::Builder::new()
                    .name(format!("plugin-{}", descriptor.ident().simple_class_name()))
                    .spawn(move || {
                        if let Err(e) = construct_and_run(&desc, &factory, host.as_ref()) {
                            report_failure(reporter.as_ref(), &desc, &e);
                        }
                    });
                match spawned {
                    Ok(handle) => Launch::Spawned(handle),
                    Err(e) => self.finish(descriptor, Err(e.into())),
                }
            }
        }
    }

    fn finish(&self, descriptor: &PluginDescriptor, result: Result<()>) -> Launch {
        match result {
            Ok(()) => Launch::Completed,
            Err(e) if is_interruption(&e) => {
                debug!(plugin = %descriptor.ident(), "Plugin interrupted");
                Launch::Interrupted
            }
            Err(e) => {
                report_failure(self.reporter.as_ref(), descriptor, &e);
                Launch::Failed
            }
        }
    }
}

fn construct_and_run(descriptor: &PluginDescriptor, factory: &PluginFactory, host: &dyn HostInterface) -> Result<()> {
    let instance = construct(descriptor, factory, host)?;
    run_instance(descriptor, instance)
}

fn run_instance(descriptor: &PluginDescriptor, instance: PluginInstance) -> Result<()> {
    match instance {
        PluginInstance::Action(mut action) => guarded(|| action.run()),
        other => Err(IcyError::EntryPointNotFound(format!(
            "{} builds a {} plugin with nothing to run",
            descriptor.class_name(),
            other.kind()
        ))
        .into()),
    }
}

/// Builds an instance, on the UI thread when the plugin needs it.
pub fn construct(descriptor: &PluginDescriptor, factory: &PluginFactory, host: &dyn HostInterface) -> Result<PluginInstance> {
    if host.is_headless() || descriptor.has_capability(Capability::NoUiConstructor) {
        return guarded(|| factory());
    }
    let (tx, rx) = mpsc::channel();
    let factory = Arc::clone(factory);
    host.invoke_on_ui(Box::new(move || {
        let _ = tx.send(guarded(|| factory()));
    }))?;
    rx.recv().map_err(|_| anyhow!("plugin constructor did not complete"))?
}

/// Runs plugin code, turning a panic into an error.
pub(crate) fn guarded<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("plugin panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Sends a plugin failure to the reporter; interruptions are dropped.
pub(crate) fn report_failure(reporter: &dyn ExceptionReporter, descriptor: &PluginDescriptor, err: &anyhow::Error) {
    if is_interruption(err) {
        return;
    }
    let maintainer = {
        let meta = descriptor.meta();
        let found = [&meta.email, &meta.author]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned();
        found
    };
    reporter.report(descriptor.ident(), maintainer.as_deref(), err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::DispatcherHost;
    use crate::plugin::ActionPlugin;
    use crate::testing::{self, descriptor_with, RecordingReporter};
    use icy_core::DescriptorMeta;
    use icy_core::HeadlessHost;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(Arc<AtomicUsize>);

    impl ActionPlugin for Counter {
        fn run(&mut self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing(Option<IcyError>);

    impl ActionPlugin for Failing {
        fn run(&mut self) -> Result<()> {
            match self.0.take() {
                Some(e) => Err(e.into()),
                None => panic!("exploded"),
            }
        }
    }

    fn counter_factory(count: &Arc<AtomicUsize>) -> PluginFactory {
        let count = Arc::clone(count);
        Arc::new(move || Ok(PluginInstance::Action(Box::new(Counter(Arc::clone(&count))))))
    }

    #[test]
    fn decision_table() {
        let threaded = descriptor_with("plugins.a.T", &[Capability::Threaded, Capability::Actionable]);
        let action = descriptor_with("plugins.a.A", &[Capability::Actionable]);
        let passive = descriptor_with("plugins.a.P", &[]);

        assert_eq!(launch_mode(&threaded, false), Some(LaunchMode::Detached));
        assert_eq!(launch_mode(&threaded, true), Some(LaunchMode::Inline));
        assert_eq!(launch_mode(&action, false), Some(LaunchMode::OnUiThread));
        assert_eq!(launch_mode(&action, true), Some(LaunchMode::Inline));
        assert_eq!(launch_mode(&passive, false), None);
    }

    #[test]
    fn headless_runs_inline() {
        let count = Arc::new(AtomicUsize::new(0));
        let launcher = PluginLauncher::new(Arc::new(HeadlessHost), Arc::new(RecordingReporter::default()));
        let desc = Arc::new(descriptor_with("plugins.a.T", &[Capability::Threaded]));
        assert!(matches!(launcher.start(&desc, &counter_factory(&count)), Launch::Completed));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn interactive_threaded_and_ui_plugins() {
        let count = Arc::new(AtomicUsize::new(0));
        let launcher = PluginLauncher::new(Arc::new(DispatcherHost::new().unwrap()), Arc::new(RecordingReporter::default()));

        let threaded = Arc::new(descriptor_with("plugins.a.T", &[Capability::Threaded]));
        match launcher.start(&threaded, &counter_factory(&count)) {
            Launch::Spawned(handle) => handle.join().unwrap(),
            other => panic!("expected a spawned thread, got {other:?}"),
        }

        let action = Arc::new(descriptor_with("plugins.a.A", &[Capability::Actionable]));
        assert!(matches!(launcher.start(&action, &counter_factory(&count)), Launch::Completed));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failures_reported_but_interruptions_silent() {
        let reporter = Arc::new(RecordingReporter::default());
        let launcher = PluginLauncher::new(Arc::new(HeadlessHost), reporter.clone());
        let desc = Arc::new(descriptor_with("plugins.a.A", &[Capability::Actionable]));

        let interrupted: PluginFactory =
            Arc::new(|| Ok(PluginInstance::Action(Box::new(Failing(Some(IcyError::Interrupted))))));
        assert!(matches!(launcher.start(&desc, &interrupted), Launch::Interrupted));
        assert!(reporter.reports().is_empty());

        let panicking: PluginFactory = Arc::new(|| Ok(PluginInstance::Action(Box::new(Failing(None)))));
        assert!(matches!(launcher.start(&desc, &panicking), Launch::Failed));

        let passive: PluginFactory = Arc::new(|| Ok(PluginInstance::Passive));
        assert!(matches!(launcher.start(&desc, &passive), Launch::Failed));

        let reports = reporter.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].1.contains("exploded"));
        assert_eq!(reports[0].0, "plugins.a.A");
    }

    #[test]
    fn reports_go_to_email_then_author() {
        let reporter = RecordingReporter::default();
        let err = anyhow!("broken");

        report_failure(&reporter, &descriptor_with("plugins.a.Mail", &[]), &err);

        let by_author = PluginDescriptor::local(
            testing::ident("plugins.a.Author", "1.0"),
            DescriptorMeta {
                author: "Jane".into(),
                ..Default::default()
            },
            Default::default(),
        );
        report_failure(&reporter, &by_author, &err);

        let anonymous =
            PluginDescriptor::local(testing::ident("plugins.a.Anon", "1.0"), DescriptorMeta::default(), Default::default());
        report_failure(&reporter, &anonymous, &err);

        assert_eq!(
            reporter.maintainers(),
            vec![Some("maintainer@plugins.test".to_string()), Some("Jane".to_string()), None]
        );
    }
}
