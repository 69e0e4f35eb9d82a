//! `icy-config`: configuration of the Icy plugin manager.
//!
//! Provides:
//! - Typed config schema (host, plugin tree, repositories, installer, logging)
//! - YAML read/write with atomic backup rotation
//! - `${ENV_VAR}` expansion for repository credentials
//! - Default value application
//! - Validation report
//! - Redaction for safe display

pub mod defaults;
pub mod env;
pub mod io;
pub mod redact;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, write_config};
pub use redact::redact;
pub use schema::{IcyConfig, RepositoryConfig};
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{Context, Result};
use std::path::Path;

/// Load, expand env vars, apply defaults and validate a config file.
///
/// This is the main entry point for loading a config at runtime.
pub async fn load_and_prepare(path: &Path) -> Result<IcyConfig> {
    let raw_config = load_config(path).await?;

    let config = resolve_env_vars(raw_config).context("Failed to resolve env vars in config")?;
    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
    if let Some(first) = report.errors.into_iter().next() {
        return Err(first).context("Invalid configuration");
    }

    Ok(config)
}
