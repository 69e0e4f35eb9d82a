//! Telemetry and structured logging for Icy.
//!
//! Handles credential redaction, console plus rolling NDJSON output, and the
//! `plugin_events` audit trail written by the installer and loader.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{PluginActivity, PluginEventLogger, PluginLogEntry};
pub use logger::{init_logger, LogGuard};
pub use redact::redact_sensitive_data;
