//! Config validation: collects every problem in one pass.

use std::collections::HashSet;

use crate::schema::IcyConfig;
use thiserror::Error;

const URL_SCHEMES: &[&str] = &["http://", "https://", "file://"];
const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &IcyConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_host(config, &mut report);
    validate_repositories(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_host(config: &IcyConfig, report: &mut ValidationReport) {
    if let Err(e) = config.host_version() {
        report.error("host.version", e.to_string());
    }
}

fn validate_repositories(config: &IcyConfig, report: &mut ValidationReport) {
    if !config.repositories.iter().any(|r| r.enabled != Some(false)) {
        report.warn("repositories", "No enabled repository; online plugins will be unavailable");
    }

    let mut names = HashSet::new();
    for (i, repo) in config.repositories.iter().enumerate() {
        let path = format!("repositories[{i}]");
        if repo.name.trim().is_empty() {
            report.error(format!("{path}.name"), "Repository name cannot be empty");
        } else if !names.insert(repo.name.as_str()) {
            report.warn(format!("{path}.name"), format!("Duplicate repository name '{}'", repo.name));
        }

        if !URL_SCHEMES.iter().any(|scheme| repo.location.starts_with(scheme)) {
            report.error(
                format!("{path}.location"),
                format!("Unsupported repository location '{}'", repo.location),
            );
        }

        if repo.password.is_some() && repo.login.as_deref().map(str::is_empty).unwrap_or(true) {
            report.warn(format!("{path}.login"), "Password set without login; it will be ignored");
        }
    }
}

fn validate_logging(config: &IcyConfig, report: &mut ValidationReport) {
    let Some(level) = config.logging.as_ref().and_then(|l| l.level.as_deref()) else { return };
    // EnvFilter directives like "icy_plugins=debug" are accepted as-is.
    if !level.contains('=') && !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        report.error("logging.level", format!("Unknown log level '{level}'"));
    }
}
