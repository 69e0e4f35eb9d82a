//! Fixtures shared by the unit tests of this crate.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use anyhow::Result;
use icy_core::{
    xml, Announcement, Capability, DescriptorMeta, ExceptionReporter, Notifier, PluginDescriptor, PluginIdent,
    PluginLayout, PluginOnlineIdent, RepositorySource,
};

use crate::archive::MANIFEST_ENTRY;
use crate::network::{self, HttpFetcher};
use crate::plugin::{DaemonPlugin, PluginFactory, PluginInstance};
use crate::services::HostServices;

pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// Writes a package whose manifest describes `ident`.
pub fn write_package(path: &Path, ident: &PluginIdent, meta: &DescriptorMeta) {
    let manifest = xml::write_descriptor(ident, meta).unwrap();
    write_zip(path, &[(MANIFEST_ENTRY, manifest.as_bytes()), ("classes/Main.class", b"\xca\xfe\xba\xbe")]);
}

pub fn ident(class_name: &str, version: &str) -> PluginIdent {
    PluginIdent::new(class_name, version.parse().unwrap())
}

fn dependencies(deps: &[(&str, &str)]) -> Vec<PluginIdent> {
    deps.iter().map(|(class, version)| ident(class, version)).collect()
}

pub fn install_package(layout: &PluginLayout, class_name: &str, version: &str, deps: &[(&str, &str)]) {
    install_package_with(layout, class_name, version, deps, &[]);
}

pub fn install_package_with(
    layout: &PluginLayout,
    class_name: &str,
    version: &str,
    deps: &[(&str, &str)],
    capabilities: &[Capability],
) {
    let meta = DescriptorMeta {
        dependencies: dependencies(deps),
        capabilities: capabilities.iter().copied().collect(),
        ..Default::default()
    };
    write_package(&layout.jar_path(class_name), &ident(class_name, version), &meta);
}

/// Local descriptor at version 1.0 that was never written to disk.
pub fn descriptor_with(class_name: &str, capabilities: &[Capability]) -> PluginDescriptor {
    let meta = DescriptorMeta {
        email: "maintainer@plugins.test".into(),
        capabilities: capabilities.iter().copied().collect(),
        ..Default::default()
    };
    PluginDescriptor::local(ident(class_name, "1.0"), meta, PluginLayout::default())
}

pub fn services() -> HostServices {
    HostServices::with_fetcher(Arc::new(HttpFetcher::new().unwrap()))
}

#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<(String, String)>>,
    maintainers: Mutex<Vec<Option<String>>>,
}

impl RecordingReporter {
    /// `(class name, message)` of every report so far.
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn maintainers(&self) -> Vec<Option<String>> {
        self.maintainers.lock().unwrap().clone()
    }
}

impl ExceptionReporter for RecordingReporter {
    fn report(&self, plugin: &PluginIdent, maintainer: Option<&str>, err: &anyhow::Error) {
        self.reports
            .lock()
            .unwrap()
            .push((plugin.class_name.clone(), format!("{err:#}")));
        self.maintainers.lock().unwrap().push(maintainer.map(str::to_string));
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    announcements: Mutex<Vec<Announcement>>,
}

impl RecordingNotifier {
    pub fn announcements(&self) -> Vec<Announcement> {
        self.announcements.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn announce(&self, announcement: Announcement) {
        self.announcements.lock().unwrap().push(announcement);
    }
}

/// Daemon whose `run` parks until `stop`. Counters are shared by every
/// instance built from the same fixture.
#[derive(Clone, Default)]
pub struct TestDaemon {
    inits: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

struct TestDaemonInstance {
    fixture: TestDaemon,
    stop: Mutex<bool>,
    wake: Condvar,
}

impl DaemonPlugin for TestDaemonInstance {
    fn init(&self) -> Result<()> {
        self.fixture.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn run(&self) {
        let mut stopped = self.stop.lock().unwrap();
        while !*stopped {
            stopped = self.wake.wait(stopped).unwrap();
        }
    }

    fn stop(&self) {
        *self.stop.lock().unwrap() = true;
        self.wake.notify_all();
        self.fixture.stops.fetch_add(1, Ordering::SeqCst);
    }
}

impl TestDaemon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory_fn(&self) -> impl Fn() -> Result<PluginInstance> + Send + Sync + 'static {
        let fixture = self.clone();
        move || {
            Ok(PluginInstance::Daemon(Arc::new(TestDaemonInstance {
                fixture: fixture.clone(),
                stop: Mutex::new(false),
                wake: Condvar::new(),
            })))
        }
    }

    pub fn factory(&self) -> PluginFactory {
        Arc::new(self.factory_fn())
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> bool {
        self.stops.load(Ordering::SeqCst) > 0
    }
}

/// A repository served from a directory through `file://` URLs.
pub struct RepoFixture {
    dir: PathBuf,
    entries: Vec<PluginOnlineIdent>,
}

impl RepoFixture {
    pub fn new(dir: &Path) -> Self {
        std::fs::create_dir_all(dir).unwrap();
        Self {
            dir: dir.to_path_buf(),
            entries: Vec::new(),
        }
    }

    pub fn publish(&mut self, class_name: &str, version: &str, deps: &[(&str, &str)]) -> PluginOnlineIdent {
        self.publish_ident(ident(class_name, version), deps, None)
    }

    /// Publishes descriptor, icon and package. Without `jar` a valid package
    /// for `ident` is generated.
    pub fn publish_ident(&mut self, ident: PluginIdent, deps: &[(&str, &str)], jar: Option<&[u8]>) -> PluginOnlineIdent {
        let stem = format!("{}-{}", ident.class_name, ident.version).replace(' ', "_");
        let (jar_path, xml_path, icon_path) = (
            self.dir.join(format!("{stem}.jar")),
            self.dir.join(format!("{stem}.xml")),
            self.dir.join(format!("{stem}_icon.png")),
        );

        let meta = DescriptorMeta {
            name: ident.simple_class_name().to_string(),
            url: network::file_url(&xml_path),
            jar_url: network::file_url(&jar_path),
            icon_url: network::file_url(&icon_path),
            author: "Fixture".into(),
            dependencies: dependencies(deps),
            ..Default::default()
        };
        match jar {
            Some(bytes) => std::fs::write(&jar_path, bytes).unwrap(),
            None => write_package(&jar_path, &ident, &meta),
        }
        std::fs::write(&icon_path, b"\x89PNG").unwrap();
        std::fs::write(&xml_path, xml::write_descriptor(&ident, &meta).unwrap()).unwrap();

        let online = PluginOnlineIdent {
            name: meta.name,
            url: meta.url,
            ident,
        };
        self.entries.push(online.clone());
        online
    }

    /// Writes the plugin list and returns a source pointing at it.
    pub fn source(&self, name: &str) -> RepositorySource {
        let list = self.dir.join("plugins.xml");
        std::fs::write(&list, xml::write_repository_list(&self.entries).unwrap()).unwrap();
        RepositorySource {
            name: name.into(),
            location: network::file_url(&list),
            enabled: true,
            ..Default::default()
        }
    }
}
