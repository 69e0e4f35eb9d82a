//! Plugin SDK
//!
//! The interfaces host-linked plugin code implements. An entry point builds a
//! [`PluginInstance`]; what the host does with it depends on the variant and
//! on the capabilities declared in the plugin manifest.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

/// A plugin the user can run.
pub trait ActionPlugin: Send {
    fn run(&mut self) -> Result<()>;
}

/// A long-lived background plugin.
///
/// `run` executes on a dedicated thread and must return once `stop` was called.
pub trait DaemonPlugin: Send + Sync {
    fn init(&self) -> Result<()>;
    fn run(&self);
    fn stop(&self);
}

/// Object produced by a plugin entry point.
pub enum PluginInstance {
    Action(Box<dyn ActionPlugin>),
    Daemon(Arc<dyn DaemonPlugin>),
    /// Library or importer plugins with nothing to run.
    Passive,
}

impl PluginInstance {
    pub fn kind(&self) -> &'static str {
        match self {
            PluginInstance::Action(_) => "action",
            PluginInstance::Daemon(_) => "daemon",
            PluginInstance::Passive => "passive",
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PluginInstance::{}", self.kind())
    }
}

/// Constructor of a plugin entry point.
pub type PluginFactory = Arc<dyn Fn() -> Result<PluginInstance> + Send + Sync>;
