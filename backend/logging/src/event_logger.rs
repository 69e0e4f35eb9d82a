//! Plugin Event Logger
//!
//! Install, remove and reload activity written on the `plugin_events` target,
//! which the file layer persists as NDJSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginActivity {
    Installed {
        class_name: String,
        version: String,
        outcome: String,
    },
    Removed {
        class_name: String,
        version: String,
        success: bool,
    },
    Reloaded {
        generation: u64,
        plugins: usize,
        failures: usize,
    },
    RepositoryRefreshed {
        plugins: usize,
    },
    Failure {
        class_name: String,
        message: String,
    },
}

#[derive(Debug, Serialize)]
pub struct PluginLogEntry {
    pub timestamp: DateTime<Utc>,
    pub activity: PluginActivity,
}

pub struct PluginEventLogger;

impl PluginEventLogger {
    /// Records one activity; free-form messages are redacted first.
    pub fn log(mut activity: PluginActivity) {
        if let PluginActivity::Failure { message, .. } = &mut activity {
            *message = redact_sensitive_data(message);
        }

        let entry = PluginLogEntry {
            timestamp: Utc::now(),
            activity,
        };

        match serde_json::to_string(&entry) {
            Ok(json) => info!(target: "plugin_events", event = %json, "Plugin event"),
            Err(_) => info!(target: "plugin_events", event = ?entry, "Plugin event"),
        }
    }
}
