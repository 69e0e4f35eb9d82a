//! Config file read/write with atomic backup rotation.

use crate::schema::IcyConfig;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

/// Default config file name within the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

/// Number of rolling backups to keep.
const MAX_BACKUPS: usize = 3;

/// Resolve the Icy config directory.
/// Priority: `ICY_CONFIG_DIR` env > `~/.icy/` > `./.icy`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("ICY_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".icy"),
        None => PathBuf::from(".icy"),
    }
}

/// Resolve the full path to the main config file.
pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Load and parse the config from disk.
///
/// Returns `Ok(Default::default())` if the file doesn't exist (first run).
pub async fn load_config(path: &Path) -> Result<IcyConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "Config file does not exist; using defaults");
        return Ok(IcyConfig::default());
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    // An empty file is a valid (empty) config.
    if raw.trim().is_empty() {
        return Ok(IcyConfig::default());
    }

    let config: IcyConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config YAML at: {}", path.display()))?;

    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

/// Write config to disk atomically (write to temp file, rename).
///
/// Keeps rolling backups of the previous versions.
pub async fn write_config(config: &IcyConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.with_context(|| {
            format!("Failed to create config directory: {}", parent.display())
        })?;
    }

    if path.exists() {
        rotate_backups(path).await;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;

    let tmp_path = path.with_extension("yaml.tmp");
    fs::write(&tmp_path, yaml.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp config: {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to rename temp config to: {}", path.display()))?;

    info!(path = %path.display(), "Wrote config");
    Ok(())
}

/// config.yaml.bak.1 → .bak.2 → ... ; failures only warn.
async fn rotate_backups(path: &Path) {
    for i in (1..MAX_BACKUPS).rev() {
        let old = path.with_extension(format!("yaml.bak.{i}"));
        let new = path.with_extension(format!("yaml.bak.{}", i + 1));
        if old.exists() {
            if let Err(e) = fs::rename(&old, &new).await {
                warn!("Failed to rotate backup {}: {}", old.display(), e);
            }
        }
    }

    let bak = path.with_extension("yaml.bak.1");
    if let Err(e) = fs::copy(path, &bak).await {
        warn!("Failed to create backup {}: {}", bak.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{PluginsConfig, RepositoryConfig};

    #[tokio::test]
    async fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("config.yaml")).await.unwrap();
        assert_eq!(cfg, IcyConfig::default());
    }

    #[tokio::test]
    async fn write_then_load_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(dir.path());

        let mut cfg = IcyConfig {
            plugins: Some(PluginsConfig {
                accept_beta: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        write_config(&cfg, &path).await.unwrap();

        cfg.repositories.push(RepositoryConfig {
            name: "main".into(),
            location: "file:///repo/plugins.xml".into(),
            ..Default::default()
        });
        write_config(&cfg, &path).await.unwrap();

        assert_eq!(load_config(&path).await.unwrap(), cfg);
        let backup = load_config(&path.with_extension("yaml.bak.1")).await.unwrap();
        assert!(backup.repositories.is_empty());
    }
}
