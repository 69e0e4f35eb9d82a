//! Plugin package archives.
//!
//! A package is a zip file at the jar path of its class, carrying the
//! descriptor document as `plugin.xml`. Reads only touch that entry.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use icy_core::{xml, DescriptorMeta, IcyError, PluginIdent};
use tracing::warn;
use walkdir::WalkDir;
use zip::ZipArchive;

pub const MANIFEST_ENTRY: &str = "plugin.xml";
const PACKAGE_EXT: &str = "jar";

/// Raw manifest text of the package at `path`.
pub fn read_manifest(path: &Path) -> Result<String, IcyError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| IcyError::InvalidArchive(format!("{}: {e}", path.display())))?;
    let mut entry = archive.by_name(MANIFEST_ENTRY).map_err(|_| {
        IcyError::InvalidArchive(format!("{} has no {MANIFEST_ENTRY}", path.display()))
    })?;

    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .map_err(|e| IcyError::InvalidArchive(format!("{}: {e}", path.display())))?;
    Ok(content)
}

/// Reads and parses the manifest of a package.
pub fn inspect(path: &Path) -> Result<(PluginIdent, DescriptorMeta), IcyError> {
    let raw = read_manifest(path)?;
    xml::parse_descriptor(&raw)
}

/// [`inspect`] on the blocking pool.
pub async fn inspect_async(path: PathBuf) -> Result<(PluginIdent, DescriptorMeta), IcyError> {
    tokio::task::spawn_blocking(move || inspect(&path))
        .await
        .map_err(|e| IcyError::Other(e.into()))?
}

/// Checks a freshly downloaded package: valid zip, parsable manifest, expected class.
pub async fn verify(path: PathBuf, class_name: &str) -> Result<PluginIdent, IcyError> {
    let (ident, _) = inspect_async(path.clone()).await?;
    if ident.class_name != class_name {
        return Err(IcyError::InvalidArchive(format!(
            "{} declares {} instead of {class_name}",
            path.display(),
            ident.class_name
        )));
    }
    Ok(ident)
}

/// Every package under `scan_root`, sorted, skipping `skip_dir` and files
/// whose stem ends with one of `excluded_suffixes`.
pub fn list_packages(scan_root: &Path, skip_dir: &Path, excluded_suffixes: &[String]) -> Vec<PathBuf> {
    if !scan_root.exists() {
        return Vec::new();
    }
    let mut found: Vec<PathBuf> = WalkDir::new(scan_root)
        .into_iter()
        .filter_entry(|e| e.path() != skip_dir)
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Cannot list plugin directory");
                None
            }
        })
        .filter(|e| e.file_type().is_file() && is_package(e.path(), excluded_suffixes))
        .map(|e| e.into_path())
        .collect();

    found.sort();
    found
}

fn is_package(path: &Path, excluded_suffixes: &[String]) -> bool {
    if path.extension().and_then(|e| e.to_str()) != Some(PACKAGE_EXT) {
        return false;
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    !excluded_suffixes.iter().any(|suffix| stem.ends_with(suffix.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use icy_core::{PluginLayout, Version};

    #[tokio::test]
    async fn reads_manifest_from_package() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path());
        let ident = PluginIdent::new("plugins.demo.Spots", Version::new(1, 2, 0, 0));
        testing::write_package(&layout.jar_path(&ident.class_name), &ident, &DescriptorMeta::default());

        let verified = verify(layout.jar_path(&ident.class_name), "plugins.demo.Spots").await.unwrap();
        assert_eq!(verified, ident);

        let err = verify(layout.jar_path(&ident.class_name), "plugins.demo.Other").await.unwrap_err();
        assert!(matches!(err, IcyError::InvalidArchive(_)));
    }

    #[test]
    fn rejects_non_zip_and_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("Garbage.jar");
        std::fs::write(&garbage, b"not a zip").unwrap();
        assert!(matches!(inspect(&garbage), Err(IcyError::InvalidArchive(_))));

        let empty = dir.path().join("Empty.jar");
        testing::write_zip(&empty, &[("readme.txt", b"hello".as_slice())]);
        assert!(matches!(inspect(&empty), Err(IcyError::InvalidArchive(_))));
    }

    #[test]
    fn lists_packages_with_exclusions() {
        let dir = tempfile::tempdir().unwrap();
        let layout = PluginLayout::new(dir.path());
        for class in ["plugins.a.One", "plugins.b.c.Two", "plugins.a.OneTest"] {
            testing::write_zip(&layout.jar_path(class), &[]);
        }
        std::fs::write(layout.image_path("plugins.a.One"), b"png").unwrap();
        testing::write_zip(&layout.backup_path(&layout.jar_path("plugins.a.Old")), &[]);

        let found = list_packages(&layout.scan_root(), &layout.backup_root(), &["Test".to_string()]);
        assert_eq!(found, vec![layout.jar_path("plugins.a.One"), layout.jar_path("plugins.b.c.Two")]);

        assert!(list_packages(&dir.path().join("absent"), &layout.backup_root(), &[]).is_empty());
    }
}
