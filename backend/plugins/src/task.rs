//! Single-slot background task.
//!
//! A service owns one worker that runs one job at a time. Requests arriving
//! while a job runs are folded into a single follow-up run; callers that need
//! the result await the ticket their request returned.

use std::future::Future;
use std::sync::Arc;

use icy_core::IcyError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotState {
    /// Ticket of the latest request.
    pub requested: u64,
    /// Ticket covered by the last finished run.
    pub completed: u64,
    /// Number of runs executed so far.
    pub runs: u64,
    pub running: bool,
    pub closed: bool,
}

impl SlotState {
    pub fn is_pending(&self) -> bool {
        self.running || self.requested > self.completed
    }
}

pub struct SingleSlot {
    name: &'static str,
    state: watch::Sender<SlotState>,
}

impl SingleSlot {
    pub fn new(name: &'static str) -> Arc<Self> {
        let (state, _) = watch::channel(SlotState::default());
        Arc::new(Self { name, state })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn snapshot(&self) -> SlotState {
        *self.state.borrow()
    }

    /// Asks for one more run and returns the ticket that run will cover.
    pub fn request(&self) -> u64 {
        let mut ticket = 0;
        self.state.send_modify(|s| {
            s.requested += 1;
            ticket = s.requested;
        });
        ticket
    }

    /// Ticket of the most recent request, without asking for a new run.
    pub fn latest(&self) -> u64 {
        self.state.borrow().requested
    }

    /// A run working for `ticket` is stale once a newer request arrived.
    pub fn is_superseded(&self, ticket: u64) -> bool {
        self.state.borrow().requested > ticket
    }

    pub fn is_pending(&self) -> bool {
        self.state.borrow().is_pending()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Waits until a run covering `ticket` finished.
    pub async fn wait_for(&self, ticket: u64) -> Result<(), IcyError> {
        let mut rx = self.state.subscribe();
        let state = rx
            .wait_for(|s| s.completed >= ticket || s.closed)
            .await
            .map(|s| *s)
            .map_err(|_| IcyError::ServiceStopped(self.name.to_string()))?;
        if state.completed >= ticket {
            Ok(())
        } else {
            Err(IcyError::ServiceStopped(self.name.to_string()))
        }
    }

    /// Stops the worker after its current run; pending waiters get `ServiceStopped`.
    pub fn close(&self) {
        self.state.send_modify(|s| s.closed = true);
    }

    /// Spawns the worker. `job` receives the ticket it runs for and returns
    /// `false` when it gave up because a newer request superseded it; waiters
    /// on that ticket are then released by the follow-up run instead.
    pub fn spawn<F, Fut>(self: &Arc<Self>, mut job: F) -> JoinHandle<()>
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let slot = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = slot.state.subscribe();
            loop {
                let ticket = match rx.wait_for(|s| s.closed || s.requested > s.completed).await {
                    Ok(state) if !state.closed => state.requested,
                    _ => break,
                };
                slot.state.send_modify(|s| s.running = true);
                debug!(task = slot.name, ticket, "Task run started");
                let finished = job(ticket).await;
                slot.state.send_modify(|s| {
                    s.running = false;
                    s.runs += 1;
                    if finished || s.requested == ticket {
                        s.completed = s.completed.max(ticket);
                    }
                });
                debug!(task = slot.name, ticket, finished, "Task run ended");
            }
            debug!(task = slot.name, "Task worker stopped");
        })
    }
}
