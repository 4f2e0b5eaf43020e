//! Escalation timer
//!
//! At most one timer is armed per queue. The queue owns it as an
//! `Option<EscalationTimer>`: `Some` is armed, `None` is idle.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::primitives::wait;

/// A pending escalation.
///
/// `generation` identifies this arming. A timer whose generation no longer
/// matches the queue's armed timer lost a race with disarm and must do nothing.
pub(crate) struct EscalationTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl EscalationTimer {
    /// Run `on_fire` after `delay`
    pub fn arm(generation: u64, delay: Duration, on_fire: BoxFuture<'static, ()>) -> Self {
        debug!(generation, ?delay, "EscalationTimer::arm: called");
        let handle = tokio::spawn(async move {
            wait(delay).await;
            on_fire.await;
        });
        Self { generation, handle }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancel before it fires. Never call from the timer's own task.
    pub fn disarm(self) {
        debug!(generation = self.generation, "EscalationTimer::disarm: called");
        self.handle.abort();
    }
}
