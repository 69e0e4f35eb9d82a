//! Per-plugin metadata record shared by the local loader and the repository loader.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::IcyError;
use crate::host::{RepositorySource, ResourceFetcher};
use crate::ident::{PluginIdent, PluginOnlineIdent};
use crate::layout::PluginLayout;
use crate::version::Version;
use crate::xml;

/// Package of plugins shipped with the host itself.
pub const KERNEL_PACKAGE: &str = "plugins.kernel.";

/// Execution contract a plugin declares in its manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Has a `run` entry point the user can trigger.
    Actionable,
    /// Runs on its own thread rather than the UI thread.
    Threaded,
    /// Long-lived background plugin started with each generation.
    Daemon,
    /// May be constructed off the UI thread.
    NoUiConstructor,
    /// Provides file importers.
    Importer,
    /// Ships inside the host binary.
    Bundled,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Actionable => "actionable",
            Capability::Threaded => "threaded",
            Capability::Daemon => "daemon",
            Capability::NoUiConstructor => "no_ui_constructor",
            Capability::Importer => "importer",
            Capability::Bundled => "bundled",
        }
    }
}

impl FromStr for Capability {
    type Err = IcyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "actionable" => Capability::Actionable,
            "threaded" => Capability::Threaded,
            "daemon" => Capability::Daemon,
            "no_ui_constructor" => Capability::NoUiConstructor,
            "importer" => Capability::Importer,
            "bundled" => Capability::Bundled,
            other => return Err(IcyError::Descriptor(format!("unknown capability {other}"))),
        })
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptive part of a descriptor, everything except identity and load state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorMeta {
    pub name: String,
    /// Location of the descriptor XML itself.
    pub url: String,
    pub jar_url: String,
    pub icon_url: String,
    pub image_url: String,
    pub author: String,
    pub web: String,
    pub email: String,
    pub description: String,
    pub changelog: Option<String>,
    pub dependencies: Vec<PluginIdent>,
    pub capabilities: BTreeSet<Capability>,
}

/// Where a descriptor came from, which decides where lazy loads read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorOrigin {
    /// Found in the local plugin tree, or bundled with the host.
    Local(PluginLayout),
    /// Advertised by a remote repository.
    Online(RepositorySource),
}

/// Metadata of one plugin build.
///
/// Equality and hashing only look at class name and version, so a local and
/// an online descriptor of the same build compare equal.
pub struct PluginDescriptor {
    ident: PluginIdent,
    origin: DescriptorOrigin,
    meta: RwLock<DescriptorMeta>,
    enabled: AtomicBool,
    descriptor_loaded: OnceCell<bool>,
    changelog_loaded: OnceCell<bool>,
    icon: OnceCell<Option<Vec<u8>>>,
    image: OnceCell<Option<Vec<u8>>>,
}

impl PluginDescriptor {
    /// Descriptor of an installed or bundled plugin; its metadata is already known.
    pub fn local(ident: PluginIdent, meta: DescriptorMeta, layout: PluginLayout) -> Self {
        Self {
            ident,
            origin: DescriptorOrigin::Local(layout),
            meta: RwLock::new(meta),
            enabled: AtomicBool::new(true),
            descriptor_loaded: OnceCell::new_with(Some(true)),
            changelog_loaded: OnceCell::new(),
            icon: OnceCell::new(),
            image: OnceCell::new(),
        }
    }

    /// Descriptor of a repository entry; metadata is fetched on demand.
    pub fn online(online: PluginOnlineIdent, repository: RepositorySource) -> Self {
        let meta = DescriptorMeta {
            name: online.name,
            url: online.url,
            ..Default::default()
        };
        Self {
            ident: online.ident,
            origin: DescriptorOrigin::Online(repository),
            meta: RwLock::new(meta),
            enabled: AtomicBool::new(true),
            descriptor_loaded: OnceCell::new(),
            changelog_loaded: OnceCell::new(),
            icon: OnceCell::new(),
            image: OnceCell::new(),
        }
    }

    /// Parses a descriptor document found in the local tree.
    pub fn from_xml(raw: &str, layout: PluginLayout) -> Result<Self> {
        let (ident, meta) = xml::parse_descriptor(raw)?;
        Ok(Self::local(ident, meta, layout))
    }

    pub fn to_xml(&self) -> Result<String, IcyError> {
        xml::write_descriptor(&self.ident, &self.meta())
    }

    pub fn ident(&self) -> &PluginIdent {
        &self.ident
    }

    pub fn class_name(&self) -> &str {
        &self.ident.class_name
    }

    pub fn version(&self) -> &Version {
        &self.ident.version
    }

    pub fn origin(&self) -> &DescriptorOrigin {
        &self.origin
    }

    pub fn repository(&self) -> Option<&RepositorySource> {
        match &self.origin {
            DescriptorOrigin::Online(repo) => Some(repo),
            DescriptorOrigin::Local(_) => None,
        }
    }

    /// Read access to the metadata; poisoned locks still yield the data.
    pub fn meta(&self) -> RwLockReadGuard<'_, DescriptorMeta> {
        self.meta.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn name(&self) -> String {
        let meta = self.meta();
        if meta.name.is_empty() {
            self.ident.simple_class_name().to_string()
        } else {
            meta.name.clone()
        }
    }

    pub fn dependencies(&self) -> Vec<PluginIdent> {
        self.meta().dependencies.clone()
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.meta().capabilities.contains(&capability)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn is_beta(&self) -> bool {
        self.ident.version.is_beta()
    }

    pub fn is_kernel_plugin(&self) -> bool {
        self.ident.class_name.starts_with(KERNEL_PACKAGE)
    }

    pub fn is_bundled(&self) -> bool {
        self.has_capability(Capability::Bundled)
    }

    /// Whether the jar of this class exists on disk right now.
    pub fn is_installed(&self, layout: &PluginLayout) -> bool {
        layout.jar_path(&self.ident.class_name).is_file()
    }

    pub fn is_descriptor_loaded(&self) -> bool {
        self.descriptor_loaded.initialized()
    }

    /// Fetches the full descriptor XML. Only the first call does I/O.
    pub async fn load_descriptor(&self, fetcher: &dyn ResourceFetcher) -> bool {
        *self
            .descriptor_loaded
            .get_or_init(|| async {
                match self.fetch_descriptor(fetcher).await {
                    Ok(meta) => {
                        let mut guard = self.meta.write().unwrap_or_else(|p| p.into_inner());
                        *guard = meta;
                        true
                    }
                    Err(e) => {
                        warn!(plugin = %self.ident, error = format!("{e:#}"), "Failed to load plugin descriptor");
                        false
                    }
                }
            })
            .await
    }

    async fn fetch_descriptor(&self, fetcher: &dyn ResourceFetcher) -> Result<DescriptorMeta> {
        let url = self.meta().url.clone();
        if url.is_empty() {
            return Err(IcyError::Descriptor(format!("{} has no descriptor url", self.ident)).into());
        }
        let credentials = self.repository().and_then(|r| r.credentials.as_ref());
        let bytes = fetcher.fetch(&url, credentials).await?;
        let raw = String::from_utf8(bytes).context("descriptor is not UTF-8")?;
        let (ident, mut meta) = xml::parse_descriptor(&raw)?;
        if ident.class_name != self.ident.class_name {
            return Err(IcyError::Descriptor(format!(
                "descriptor at {url} describes {} instead of {}",
                ident.class_name, self.ident.class_name
            ))
            .into());
        }
        if meta.url.is_empty() {
            meta.url = url;
        }
        if meta.name.is_empty() {
            meta.name = self.meta().name.clone();
        }
        Ok(meta)
    }

    /// Makes sure the changelog is available. Only the first call does I/O.
    pub async fn load_changelog(&self, fetcher: &dyn ResourceFetcher) -> bool {
        *self
            .changelog_loaded
            .get_or_init(|| async {
                self.load_descriptor(fetcher).await && self.meta().changelog.is_some()
            })
            .await
    }

    pub fn changelog(&self) -> Option<String> {
        self.meta().changelog.clone()
    }

    /// Icon bytes, read once from disk (local) or the repository (online).
    pub async fn load_icon(&self, fetcher: &dyn ResourceFetcher) -> Option<Vec<u8>> {
        self.icon
            .get_or_init(|| self.load_asset(fetcher, Asset::Icon))
            .await
            .clone()
    }

    /// Large image bytes, read once like the icon.
    pub async fn load_image(&self, fetcher: &dyn ResourceFetcher) -> Option<Vec<u8>> {
        self.image
            .get_or_init(|| self.load_asset(fetcher, Asset::Image))
            .await
            .clone()
    }

    pub fn is_icon_loaded(&self) -> bool {
        self.icon.initialized()
    }

    pub fn is_image_loaded(&self) -> bool {
        self.image.initialized()
    }

    async fn load_asset(&self, fetcher: &dyn ResourceFetcher, asset: Asset) -> Option<Vec<u8>> {
        let result = match &self.origin {
            DescriptorOrigin::Local(layout) => {
                let path = match asset {
                    Asset::Icon => layout.icon_path(&self.ident.class_name),
                    Asset::Image => layout.image_path(&self.ident.class_name),
                };
                tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("read {}", path.display()))
            }
            DescriptorOrigin::Online(repo) => {
                if !self.load_descriptor(fetcher).await {
                    return None;
                }
                let url = match asset {
                    Asset::Icon => self.meta().icon_url.clone(),
                    Asset::Image => self.meta().image_url.clone(),
                };
                if url.is_empty() {
                    return None;
                }
                fetcher.fetch(&url, repo.credentials.as_ref()).await
            }
        };

        match result {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(plugin = %self.ident, asset = ?asset, error = %e, "Plugin asset unavailable");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Asset {
    Icon,
    Image,
}

impl PartialEq for PluginDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.ident.class_name == other.ident.class_name && self.ident.version == other.ident.version
    }
}

impl Eq for PluginDescriptor {}

impl Hash for PluginDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ident.class_name.hash(state);
        self.ident.version.hash(state);
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("ident", &self.ident)
            .field("name", &self.meta().name)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.ident)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Credentials;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves fixed documents and counts every request per url.
    #[derive(Default)]
    struct CountingFetcher {
        docs: HashMap<String, Vec<u8>>,
        hits: Mutex<HashMap<String, usize>>,
    }

    impl CountingFetcher {
        fn with(mut self, url: &str, body: &[u8]) -> Self {
            self.docs.insert(url.to_string(), body.to_vec());
            self
        }

        fn hits(&self, url: &str) -> usize {
            self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ResourceFetcher for CountingFetcher {
        async fn fetch(&self, url: &str, _credentials: Option<&Credentials>) -> Result<Vec<u8>> {
            *self.hits.lock().unwrap().entry(url.to_string()).or_default() += 1;
            self.docs
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("404 {url}"))
        }
    }

    fn sample_meta() -> DescriptorMeta {
        DescriptorMeta {
            name: "Spot Detector".into(),
            url: "https://repo.example/spot.xml".into(),
            jar_url: "https://repo.example/spot.jar".into(),
            icon_url: "https://repo.example/spot_icon.png".into(),
            image_url: "https://repo.example/spot.png".into(),
            author: "Jane <jane@example.org>".into(),
            web: "https://example.org".into(),
            email: "jane@example.org".into(),
            description: "Detects spots & blobs".into(),
            changelog: Some("1.1: faster\n1.0: first".into()),
            dependencies: vec![
                PluginIdent::new("plugins.lib.Wavelets", "1.0".parse().unwrap())
                    .requiring("2.0".parse().unwrap()),
            ],
            capabilities: [Capability::Actionable, Capability::Threaded].into_iter().collect(),
        }
    }

    fn online(url: &str) -> PluginDescriptor {
        PluginDescriptor::online(
            PluginOnlineIdent {
                ident: PluginIdent::new("plugins.spot.SpotDetector", "1.1".parse().unwrap()),
                name: "Spot Detector".into(),
                url: url.into(),
            },
            RepositorySource::default(),
        )
    }

    #[test]
    fn xml_round_trip_keeps_metadata() {
        let ident = PluginIdent::new("plugins.spot.SpotDetector", "1.1".parse().unwrap());
        let layout = PluginLayout::new("/tmp/icy");
        let original = PluginDescriptor::local(ident.clone(), sample_meta(), layout.clone());

        let reloaded = PluginDescriptor::from_xml(&original.to_xml().unwrap(), layout).unwrap();
        assert_eq!(reloaded.ident(), &ident);
        assert_eq!(*reloaded.meta(), sample_meta());
    }

    #[test]
    fn equality_ignores_origin() {
        let local = PluginDescriptor::local(
            PluginIdent::new("plugins.spot.SpotDetector", "1.1".parse().unwrap()),
            DescriptorMeta::default(),
            PluginLayout::new("/tmp/icy"),
        );
        assert_eq!(local, online("x"));
    }

    #[tokio::test]
    async fn descriptor_load_happens_once() {
        let url = "https://repo.example/spot.xml";
        let ident = PluginIdent::new("plugins.spot.SpotDetector", "1.1".parse().unwrap());
        let body = xml::write_descriptor(&ident, &sample_meta()).unwrap();
        let fetcher = CountingFetcher::default().with(url, body.as_bytes());
        let descriptor = online(url);

        assert!(descriptor.load_descriptor(&fetcher).await);
        assert!(descriptor.load_descriptor(&fetcher).await);
        assert!(descriptor.load_changelog(&fetcher).await);
        assert_eq!(fetcher.hits(url), 1);
        assert_eq!(descriptor.meta().author, "Jane <jane@example.org>");
    }

    #[tokio::test]
    async fn failed_loads_are_not_retried() {
        let url = "https://repo.example/missing.xml";
        let fetcher = CountingFetcher::default();
        let descriptor = online(url);

        assert!(!descriptor.load_descriptor(&fetcher).await);
        assert!(!descriptor.load_descriptor(&fetcher).await);
        assert!(descriptor.load_icon(&fetcher).await.is_none());
        assert!(descriptor.load_image(&fetcher).await.is_none());
        assert!(descriptor.is_icon_loaded());
        assert_eq!(fetcher.hits(url), 1);
    }

    #[tokio::test]
    async fn icon_fetched_once() {
        let url = "https://repo.example/spot.xml";
        let ident = PluginIdent::new("plugins.spot.SpotDetector", "1.1".parse().unwrap());
        let body = xml::write_descriptor(&ident, &sample_meta()).unwrap();
        let fetcher = CountingFetcher::default()
            .with(url, body.as_bytes())
            .with("https://repo.example/spot_icon.png", b"PNG");
        let descriptor = online(url);

        assert_eq!(descriptor.load_icon(&fetcher).await.as_deref(), Some(&b"PNG"[..]));
        assert_eq!(descriptor.load_icon(&fetcher).await.as_deref(), Some(&b"PNG"[..]));
        assert_eq!(fetcher.hits("https://repo.example/spot_icon.png"), 1);
    }

    #[test]
    fn installed_state_follows_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path());
        let descriptor = PluginDescriptor::local(
            PluginIdent::new("plugins.spot.SpotDetector", "1.1".parse().unwrap()),
            DescriptorMeta::default(),
            layout.clone(),
        );
        assert!(!descriptor.is_installed(&layout));

        let jar = layout.jar_path("plugins.spot.SpotDetector");
        std::fs::create_dir_all(jar.parent().unwrap()).unwrap();
        std::fs::write(&jar, b"jar").unwrap();
        assert!(descriptor.is_installed(&layout));

        std::fs::remove_file(&jar).unwrap();
        assert!(!descriptor.is_installed(&layout));
    }

    #[tokio::test]
    async fn local_icon_read_from_layout() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path());
        let icon = layout.icon_path("plugins.spot.SpotDetector");
        std::fs::create_dir_all(icon.parent().unwrap()).unwrap();
        std::fs::write(&icon, b"ICON").unwrap();

        let descriptor = PluginDescriptor::local(
            PluginIdent::new("plugins.spot.SpotDetector", "1.1".parse().unwrap()),
            DescriptorMeta::default(),
            layout,
        );
        let fetcher = CountingFetcher::default();
        assert_eq!(descriptor.load_icon(&fetcher).await.as_deref(), Some(&b"ICON"[..]));
        std::fs::remove_file(&icon).unwrap();
        assert_eq!(descriptor.load_icon(&fetcher).await.as_deref(), Some(&b"ICON"[..]));
    }
}
