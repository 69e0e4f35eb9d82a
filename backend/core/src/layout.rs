//! Deterministic on-disk layout of installed plugins.
//!
//! `plugins.author.Tool` lives at `<root>/plugins/author/Tool.jar` with its
//! `Tool_icon.png`, `Tool.png` and `Tool.xml` siblings.

use std::path::{Path, PathBuf};

/// Package every plugin class must live under.
pub const PLUGIN_PACKAGE: &str = "plugins";

const JAR_EXT: &str = "jar";
const ICON_SUFFIX: &str = "_icon.png";
const IMAGE_EXT: &str = "png";
const XML_EXT: &str = "xml";
const BACKUP_DIR: &str = ".backup";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginLayout {
    root: PathBuf,
}

impl PluginLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory scanned for plugin archives.
    pub fn scan_root(&self) -> PathBuf {
        self.root.join(PLUGIN_PACKAGE)
    }

    pub fn backup_root(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    /// Extension-less path derived from the qualified class name.
    pub fn class_path(&self, class_name: &str) -> PathBuf {
        class_name
            .split('.')
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    pub fn jar_path(&self, class_name: &str) -> PathBuf {
        self.class_path(class_name).with_extension(JAR_EXT)
    }

    pub fn icon_path(&self, class_name: &str) -> PathBuf {
        let mut raw = self.class_path(class_name).into_os_string();
        raw.push(ICON_SUFFIX);
        PathBuf::from(raw)
    }

    pub fn image_path(&self, class_name: &str) -> PathBuf {
        self.class_path(class_name).with_extension(IMAGE_EXT)
    }

    pub fn xml_path(&self, class_name: &str) -> PathBuf {
        self.class_path(class_name).with_extension(XML_EXT)
    }

    /// All files a plugin may own, jar first.
    pub fn plugin_files(&self, class_name: &str) -> [PathBuf; 4] {
        [
            self.jar_path(class_name),
            self.icon_path(class_name),
            self.image_path(class_name),
            self.xml_path(class_name),
        ]
    }

    /// Where `file` is copied while an install is in progress.
    pub fn backup_path(&self, file: &Path) -> PathBuf {
        match file.strip_prefix(&self.root) {
            Ok(relative) => self.backup_root().join(relative),
            Err(_) => self
                .backup_root()
                .join(file.file_name().unwrap_or(file.as_os_str())),
        }
    }

    /// Inverse of [`jar_path`](Self::jar_path); `None` for files outside the plugin package.
    pub fn class_name_for(&self, jar: &Path) -> Option<String> {
        if jar.extension().and_then(|ext| ext.to_str()) != Some(JAR_EXT) {
            return None;
        }
        let relative = jar.strip_prefix(&self.root).ok()?.with_extension("");
        let segments: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        if segments.first() != Some(&PLUGIN_PACKAGE) || segments.len() < 2 {
            return None;
        }
        Some(segments.join("."))
    }
}
