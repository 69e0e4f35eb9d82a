//! UI dispatcher: one dedicated thread executing submitted closures in order.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};

use anyhow::{anyhow, Context, Result};
use icy_core::{HostInterface, UiTask};
use tracing::{debug, error};

pub struct UiDispatcher {
    sender: Mutex<Option<mpsc::Sender<UiTask>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl UiDispatcher {
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<UiTask>();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for task in rx {
                    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                        error!("UI task panicked");
                    }
                }
                debug!("UI dispatcher stopped");
            })
            .context("Failed to spawn UI dispatcher thread")?;

        Ok(Self {
            sender: Mutex::new(Some(tx)),
            thread_id: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn is_dispatch_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Queues `task` without waiting for it.
    pub fn submit(&self, task: UiTask) -> Result<()> {
        let sender = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        sender
            .as_ref()
            .ok_or_else(|| anyhow!("UI dispatcher is shut down"))?
            .send(task)
            .map_err(|_| anyhow!("UI dispatcher is gone"))
    }

    /// Runs `task` on the dispatch thread and blocks until it returned.
    /// Called from the dispatch thread itself, the task runs inline.
    pub fn invoke_and_wait(&self, task: UiTask) -> Result<()> {
        if self.is_dispatch_thread() {
            task();
            return Ok(());
        }
        let (done_tx, done_rx) = mpsc::channel::<()>();
        self.submit(Box::new(move || {
            task();
            let _ = done_tx.send(());
        }))?;
        done_rx.recv().map_err(|_| anyhow!("UI task panicked"))
    }

    /// Drains queued tasks and joins the thread.
    pub fn shutdown(&self) {
        self.sender.lock().unwrap_or_else(|p| p.into_inner()).take();
        let handle = self.thread.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if !self.is_dispatch_thread() && handle.join().is_err() {
                error!("UI dispatcher thread panicked");
            }
        }
    }
}

impl Drop for UiDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Interactive host whose UI work runs on a [`UiDispatcher`].
pub struct DispatcherHost {
    dispatcher: UiDispatcher,
}

impl DispatcherHost {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dispatcher: UiDispatcher::spawn("icy-ui")?,
        })
    }
}

impl HostInterface for DispatcherHost {
    fn is_headless(&self) -> bool {
        false
    }

    fn invoke_on_ui(&self, task: UiTask) -> Result<()> {
        self.dispatcher.invoke_and_wait(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn runs_tasks_in_order_on_one_thread() {
        let dispatcher = UiDispatcher::spawn("ui-test").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            dispatcher
                .submit(Box::new(move || seen.lock().unwrap().push((i, thread::current().id()))))
                .unwrap();
        }
        dispatcher.invoke_and_wait(Box::new(|| {})).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(_, id)| *id == dispatcher.thread_id));
    }

    #[test]
    fn panicking_task_reports_and_thread_survives() {
        let dispatcher = UiDispatcher::spawn("ui-panic").unwrap();
        assert!(dispatcher.invoke_and_wait(Box::new(|| panic!("boom"))).is_err());
        assert!(dispatcher.invoke_and_wait(Box::new(|| {})).is_ok());
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let dispatcher = UiDispatcher::spawn("ui-closed").unwrap();
        dispatcher.shutdown();
        assert!(dispatcher.submit(Box::new(|| {})).is_err());
    }
}
