//! Config defaults: fills unset values so the written file documents them.

use crate::schema::{HostConfig, IcyConfig, InstallerConfig, LoggingConfig, PluginsConfig};

/// Host version assumed when none is configured.
pub const DEFAULT_HOST_VERSION: &str = "2.5.0.0";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Simple class names ending like this are test fixtures, not plugins.
pub const DEFAULT_EXCLUDED_SUFFIXES: &[&str] = &["Test", "Tests"];

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: IcyConfig) -> IcyConfig {
    let config = apply_host_defaults(config);
    let config = apply_plugin_defaults(config);
    let config = apply_installer_defaults(config);
    apply_logging_defaults(config)
}

fn apply_host_defaults(mut config: IcyConfig) -> IcyConfig {
    let host = config.host.get_or_insert_with(HostConfig::default);
    if host.version.is_none() {
        host.version = Some(DEFAULT_HOST_VERSION.to_string());
    }
    if host.headless.is_none() {
        host.headless = Some(true);
    }
    config
}

fn apply_plugin_defaults(mut config: IcyConfig) -> IcyConfig {
    let plugins = config.plugins.get_or_insert_with(PluginsConfig::default);
    if plugins.accept_beta.is_none() {
        plugins.accept_beta = Some(false);
    }
    if plugins.auto_check.is_none() {
        plugins.auto_check = Some(true);
    }
    if plugins.excluded_suffixes.is_none() {
        plugins.excluded_suffixes = Some(
            DEFAULT_EXCLUDED_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
    }
    for repo in &mut config.repositories {
        repo.enabled.get_or_insert(true);
        repo.support_param.get_or_insert(true);
    }
    config
}

fn apply_installer_defaults(mut config: IcyConfig) -> IcyConfig {
    let installer = config.installer.get_or_insert_with(InstallerConfig::default);
    if installer.show_progress.is_none() {
        installer.show_progress = Some(true);
    }
    config
}

fn apply_logging_defaults(mut config: IcyConfig) -> IcyConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    if logging.level.is_none() {
        logging.level = Some(DEFAULT_LOG_LEVEL.to_string());
    }
    config
}
