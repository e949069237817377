//! Reconnection scheduling.
//!
//! A retry is a sleeping task that posts its generation back into the agent's
//! event loop. The loop re-checks the connection before acting, so a timer that
//! fires after a manual disconnect or a successful reconnect does nothing.

#![expect(
    clippy::module_name_repetitions,
    reason = "Scheduler state reads better qualified when re-exported"
)]

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Scheduler state.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulerState {
    /// No retry pending
    #[default]
    Idle,
    /// A retry will fire for this generation
    Scheduled { generation: u64 },
}

/// Inputs deciding whether a retry may be scheduled.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub auto_reconnect: bool,
    pub configured: bool,
    pub manual_disconnect: bool,
}

impl RetryPolicy {
    fn allows_retry(self) -> bool {
        self.auto_reconnect && self.configured && !self.manual_disconnect
    }
}

pub(crate) struct ReconnectScheduler {
    state: SchedulerState,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    fire_tx: mpsc::UnboundedSender<u64>,
}

impl ReconnectScheduler {
    pub(crate) fn new(fire_tx: mpsc::UnboundedSender<u64>) -> Self {
        Self {
            state: SchedulerState::Idle,
            generation: 0,
            timer: None,
            fire_tx,
        }
    }

    pub(crate) fn state(&self) -> SchedulerState {
        self.state
    }

    pub(crate) fn is_scheduled(&self) -> bool {
        matches!(self.state, SchedulerState::Scheduled { .. })
    }

    /// Schedule one retry after `delay`. Returns `false` when the policy
    /// forbids it or a retry is already pending.
    pub(crate) fn schedule(&mut self, delay: Duration, policy: RetryPolicy) -> bool {
        if !policy.allows_retry() || self.is_scheduled() {
            return false;
        }

        self.generation += 1;
        let generation = self.generation;
        let fire_tx = self.fire_tx.clone();

        #[cfg(feature = "tracing")]
        tracing::debug!(generation, ?delay, "Scheduling reconnect");

        self.timer = Some(tokio::spawn(async move {
            sleep(delay).await;
            // The loop may be gone by now
            _ = fire_tx.send(generation);
        }));
        self.state = SchedulerState::Scheduled { generation };
        true
    }

    /// A timer fired. Returns whether it belongs to the pending retry, in which
    /// case the scheduler is idle again and the caller decides whether to reconnect.
    pub(crate) fn fired(&mut self, generation: u64) -> bool {
        if self.state != (SchedulerState::Scheduled { generation }) {
            #[cfg(feature = "tracing")]
            tracing::trace!(generation, "Ignoring stale reconnect timer");
            return false;
        }
        self.state = SchedulerState::Idle;
        self.timer = None;
        true
    }

    /// Drop any pending retry.
    pub(crate) fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.state = SchedulerState::Idle;
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
