//! Terminal implementations of the host collaborators.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use icy_core::{Announcement, HostInterface, Notifier, PluginIdent, ProgressReporter, UiTask};
use icy_plugins::DispatcherHost;
use tracing::info;

use crate::terminal_output::{note_error, note_success, note_warn, paint, DIM};

/// Cancellation flag raised by Ctrl-C, shared by every progress line.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raises the flag on the first Ctrl-C.
    pub fn watch_ctrl_c(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Cancelling after the current step...");
                flag.raise();
            }
        });
    }
}

/// Interactive host: a UI dispatch thread plus progress lines on stderr.
pub struct ConsoleHost {
    ui: DispatcherHost,
    cancel: CancelFlag,
}

impl ConsoleHost {
    pub fn new(cancel: CancelFlag) -> Result<Self> {
        Ok(Self {
            ui: DispatcherHost::new()?,
            cancel,
        })
    }
}

impl HostInterface for ConsoleHost {
    fn is_headless(&self) -> bool {
        false
    }

    fn invoke_on_ui(&self, task: UiTask) -> Result<()> {
        self.ui.invoke_on_ui(task)
    }

    fn register_daemon(&self, ident: &PluginIdent) {
        info!(plugin = %ident, "Daemon running");
    }

    fn open_progress(&self, title: &str) -> Box<dyn ProgressReporter> {
        eprintln!("{}", paint(title, DIM));
        Box::new(TerminalProgress {
            length: AtomicU64::new(0),
            position: AtomicU64::new(0),
            last: Mutex::new(String::new()),
            cancel: self.cancel.clone(),
        })
    }
}

/// One stderr line per message change, prefixed with the step counter.
pub struct TerminalProgress {
    length: AtomicU64,
    position: AtomicU64,
    last: Mutex<String>,
    cancel: CancelFlag,
}

impl TerminalProgress {
    fn line(&self, message: &str) -> String {
        match self.length.load(Ordering::Relaxed) {
            0 => format!("  {message}"),
            length => format!("  [{}/{length}] {message}", self.position.load(Ordering::Relaxed) + 1),
        }
    }
}

impl ProgressReporter for TerminalProgress {
    fn set_message(&self, message: &str) {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if *last != message {
            eprintln!("{}", self.line(message));
            *last = message.to_string();
        }
    }

    fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn is_cancel_requested(&self) -> bool {
        self.cancel.is_raised()
    }

    fn close(&self) {}
}

/// Prints batch announcements as notes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn announce(&self, announcement: Announcement) {
        match &announcement {
            Announcement::Success(m) => note_success(m),
            Announcement::PartialFailure(m) => note_warn(m),
            Announcement::Failure(m) => note_error(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_follows_the_cancel_flag() {
        let cancel = CancelFlag::default();
        let progress = TerminalProgress {
            length: AtomicU64::new(0),
            position: AtomicU64::new(0),
            last: Mutex::new(String::new()),
            cancel: cancel.clone(),
        };
        assert_eq!(progress.line("Resolving"), "  Resolving");
        progress.set_length(3);
        progress.set_position(1);
        assert_eq!(progress.line("Installing Spots"), "  [2/3] Installing Spots");

        assert!(!progress.is_cancel_requested());
        cancel.raise();
        assert!(progress.is_cancel_requested());
    }
}
