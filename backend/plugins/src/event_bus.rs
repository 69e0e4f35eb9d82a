//! Event Bus
//!
//! Publish-subscribe channel announcing plugin installs, removals and
//! reloads to whoever displays or reacts to them.

use icy_core::PluginIdent;
use tokio::sync::broadcast;
use tracing::debug;

use crate::installer::InstallOutcome;

const CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginEvent {
    Installed { ident: PluginIdent, outcome: InstallOutcome },
    Removed { ident: PluginIdent, success: bool },
    /// A new local generation was swapped in.
    LoaderChanged { generation: u64 },
    RepositoryChanged,
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PluginEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CAPACITY);
        Self { sender: tx }
    }

    /// Dispatches an event to all current subscribers.
    pub fn publish(&self, event: PluginEvent) {
        debug!(event = ?event, "Publishing plugin event");
        // Nobody listening is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
