//! Icy plugin manager configuration schema.
//!
//! Every field is optional on disk; [`crate::defaults`] fills in the gaps and
//! the accessor methods below read the effective values.

use std::path::PathBuf;

use icy_core::{Credentials, RepositorySource, Version};
use serde::{Deserialize, Serialize};

use crate::defaults;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IcyConfig {
    /// Host application identity and mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<HostConfig>,

    /// Local plugin tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<PluginsConfig>,

    /// Remote plugin repositories, polled in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repositories: Vec<RepositoryConfig>,

    /// Install/remove pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<InstallerConfig>,

    /// Logging configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Host ("kernel") version plugins are checked against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginsConfig {
    /// Directory holding the `plugins/` tree
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accept_beta: Option<bool>,
    /// Class names of daemons that must not be started
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_daemons: Vec<String>,
    /// Archives whose simple class name ends with one of these are skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded_suffixes: Option<Vec<String>>,
    /// Queue missing dependencies for install after the first load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_check: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    pub name: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Repository accepts `kernelVersion` / `beta` query parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_param: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_progress: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// JSON console output instead of the human format
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
}

// ---------------------------------------------------------------------------
// Effective values
// ---------------------------------------------------------------------------

impl IcyConfig {
    pub fn host_version(&self) -> anyhow::Result<Version> {
        let raw = self
            .host
            .as_ref()
            .and_then(|h| h.version.as_deref())
            .unwrap_or(defaults::DEFAULT_HOST_VERSION);
        Ok(raw.parse()?)
    }

    pub fn is_headless(&self) -> bool {
        self.host.as_ref().and_then(|h| h.headless).unwrap_or(true)
    }

    pub fn plugin_root(&self) -> PathBuf {
        self.plugins
            .as_ref()
            .and_then(|p| p.root.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(crate::io::config_dir)
    }

    pub fn accept_beta(&self) -> bool {
        self.plugins.as_ref().and_then(|p| p.accept_beta).unwrap_or(false)
    }

    pub fn auto_check(&self) -> bool {
        self.plugins.as_ref().and_then(|p| p.auto_check).unwrap_or(true)
    }

    pub fn disabled_daemons(&self) -> Vec<String> {
        self.plugins
            .as_ref()
            .map(|p| p.disabled_daemons.clone())
            .unwrap_or_default()
    }

    pub fn excluded_suffixes(&self) -> Vec<String> {
        self.plugins
            .as_ref()
            .and_then(|p| p.excluded_suffixes.clone())
            .unwrap_or_else(|| {
                defaults::DEFAULT_EXCLUDED_SUFFIXES
                    .iter()
                    .map(|s| s.to_string())
                    .collect()
            })
    }

    pub fn show_progress(&self) -> bool {
        self.installer.as_ref().and_then(|i| i.show_progress).unwrap_or(true)
    }

    pub fn log_level(&self) -> String {
        self.logging
            .as_ref()
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| defaults::DEFAULT_LOG_LEVEL.to_string())
    }

    pub fn log_dir(&self) -> PathBuf {
        self.logging
            .as_ref()
            .and_then(|l| l.dir.as_deref())
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::io::config_dir().join("logs"))
    }

    pub fn log_json(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.json).unwrap_or(false)
    }

    /// Repositories as consumed by the repository loader.
    pub fn repository_sources(&self) -> Vec<RepositorySource> {
        self.repositories.iter().map(RepositoryConfig::to_source).collect()
    }
}

impl RepositoryConfig {
    pub fn to_source(&self) -> RepositorySource {
        let credentials = match (&self.login, &self.password) {
            (Some(login), password) if !login.is_empty() => Some(Credentials {
                login: login.clone(),
                password: password.clone().unwrap_or_default(),
            }),
            _ => None,
        };
        RepositorySource {
            name: self.name.clone(),
            location: self.location.clone(),
            enabled: self.enabled.unwrap_or(true),
            support_param: self.support_param.unwrap_or(true),
            credentials,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_yaml() {
        let yaml = r#"
host:
  version: "2.5"
  headless: false
plugins:
  root: /opt/icy
  acceptBeta: true
  disabledDaemons: [plugins.a.Watcher]
repositories:
  - name: main
    location: https://repo.example/plugins.xml
    login: me
    password: secret
"#;
        let cfg: IcyConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.host_version().unwrap(), "2.5".parse().unwrap());
        assert!(!cfg.is_headless());
        assert!(cfg.accept_beta());
        assert_eq!(cfg.plugin_root(), PathBuf::from("/opt/icy"));
        assert_eq!(cfg.disabled_daemons(), vec!["plugins.a.Watcher".to_string()]);

        let sources = cfg.repository_sources();
        assert!(sources[0].enabled);
        assert_eq!(sources[0].credentials.as_ref().unwrap().password, "secret");
    }

    #[test]
    fn repository_without_login_has_no_credentials() {
        let repo = RepositoryConfig {
            name: "r".into(),
            location: "file:///r.xml".into(),
            enabled: Some(false),
            ..Default::default()
        };
        let source = repo.to_source();
        assert!(source.credentials.is_none());
        assert!(!source.enabled);
    }
}
