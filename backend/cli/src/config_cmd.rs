//! `icy config`: show the effective configuration or write a default file.

use std::path::Path;

use anyhow::{bail, Result};
use icy_config::{apply_all_defaults, redact, validate, write_config, IcyConfig};

use crate::terminal_output::{note_error, note_info, note_success, note_warn};

pub async fn run(path: &Path, config: &IcyConfig, init: bool) -> Result<()> {
    if init {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            bail!("{} already exists", path.display());
        }
        write_config(&apply_all_defaults(IcyConfig::default()), path).await?;
        note_success(&format!("Wrote {}", path.display()));
        return Ok(());
    }

    note_info(&format!("Configuration file: {}", path.display()));
    println!("{}", serde_json::to_string_pretty(&redact(config))?);

    let report = validate(config);
    for warning in &report.warnings {
        note_warn(&warning.to_string());
    }
    for error in &report.errors {
        note_error(&error.to_string());
    }
    if !report.is_valid() {
        bail!("Configuration has {} error(s)", report.errors.len());
    }
    Ok(())
}
