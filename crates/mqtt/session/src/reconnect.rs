//! Unattended reconnection.
//!
//! `ReconnectController` owns the attempt counter and at most one pending
//! backoff task. The task only sleeps; when the wait elapses it reports its id
//! back to the session, which checks the id against the active task before
//! connecting. A task that was cancelled, or superseded, is therefore inert
//! even if its wake-up message is already queued.

use std::time::Duration;

use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::backoff::{Backoff, BackoffError};

/// Result of asking the controller to start a reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// A backoff wait was scheduled for this attempt.
    Scheduled { attempt: u32, delay: Duration },

    /// A task is already pending; nothing changed.
    AlreadyActive,

    /// The ceiling was reached; no task was scheduled.
    Exhausted(BackoffError),
}

#[derive(Debug)]
struct PendingTask {
    id: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
pub struct ReconnectController {
    backoff: Backoff,
    task: Option<PendingTask>,
    next_id: u64,
    elapsed_tx: mpsc::UnboundedSender<u64>,
}

impl ReconnectController {
    /// `elapsed_tx` receives the id of a task whose wait ran to completion.
    pub fn new(backoff: Backoff, elapsed_tx: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            backoff,
            task: None,
            next_id: 0,
            elapsed_tx,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Attempts made in the current sequence.
    pub fn attempts(&self) -> u32 {
        self.backoff.attempt()
    }

    pub fn max_attempts(&self) -> u32 {
        self.backoff.max_attempts()
    }

    /// Starts a reconnection sequence step unless one is already pending.
    pub fn start(&mut self) -> ReconnectOutcome {
        if self.is_active() {
            debug!("Reconnection already pending");
            return ReconnectOutcome::AlreadyActive;
        }
        self.attempt()
    }

    /// Counts an attempt and schedules its backoff wait.
    fn attempt(&mut self) -> ReconnectOutcome {
        let delay = match self.backoff.next_sleep() {
            Ok(delay) => delay,
            Err(e) => return ReconnectOutcome::Exhausted(e),
        };
        let attempt = self.backoff.attempt();

        self.next_id += 1;
        let id = self.next_id;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let tx = self.elapsed_tx.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(id);
                }
            }
        });

        info!(
            "Reconnection attempt {attempt}/{} in {:.0}s",
            self.backoff.max_attempts(),
            delay.as_secs_f64()
        );
        self.task = Some(PendingTask { id, cancel, handle });
        ReconnectOutcome::Scheduled { attempt, delay }
    }

    /// Counts an attempt that runs right away, dropping any pending wait.
    pub fn attempt_now(&mut self) -> Result<u32, BackoffError> {
        self.cancel();
        self.backoff.next_immediate()?;
        Ok(self.backoff.attempt())
    }

    /// Claims a finished wait. Returns `true` only for the active task, which
    /// is cleared so a new sequence step can start.
    pub fn take_elapsed(&mut self, id: u64) -> bool {
        match &self.task {
            Some(task) if task.id == id => {
                self.task = None;
                true
            }
            _ => {
                debug!("Ignoring stale reconnection task {id}");
                false
            }
        }
    }

    /// Aborts the pending wait, keeping the counter. Returns `true` if a task was pending.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.cancel.cancel();
                task.handle.abort();
                debug!("Cancelled reconnection task {}", task.id);
                true
            }
            None => false,
        }
    }

    /// Aborts the pending wait and zeroes the counter.
    pub fn reset(&mut self) {
        self.cancel();
        self.backoff.reset();
    }

    /// A CONNACK was accepted.
    pub fn on_connected(&mut self) {
        self.backoff.reset();
    }
}

impl Drop for ReconnectController {
    fn drop(&mut self) {
        self.cancel();
    }
}
