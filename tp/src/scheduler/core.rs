//! Concurrency task queue implementation

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{QueueError, TaskError};
use crate::lifecycle::LifecycleState;
use crate::primitives::RemoveBy;
use crate::throttle::LaunchThrottleQueue;

use super::config::QueueConfig;
use super::escalation::EscalationTimer;
use super::queue::{
    QueueState, QueueStats, SubmitResult, Task, TaskAction, TaskId, TaskLocation, TaskRecord, TaskSnapshot,
};

/// Internal state protected by mutex
#[derive(Default)]
struct QueueInner {
    state: LifecycleState,

    /// Every waiting or processing task, by id
    records: HashMap<TaskId, TaskRecord>,

    /// Not yet admitted, FIFO
    waiting: VecDeque<TaskId>,

    /// Admitted, in admission order (front is oldest)
    main: VecDeque<TaskId>,

    /// Moved aside by escalation, in relocation order
    supplemental: VecDeque<TaskId>,

    /// Live tasks per key, for deduplication
    active_keys: HashMap<String, usize>,

    /// Keys of retired tasks, in retirement order
    history: Vec<String>,

    escalation: Option<EscalationTimer>,
    escalation_generation: u64,

    next_id: u64,
    stats: QueueStats,
}

impl QueueInner {
    fn next_task_id(&mut self) -> TaskId {
        self.next_id += 1;
        TaskId(self.next_id)
    }

    fn track_key(&mut self, key: &str) {
        *self.active_keys.entry(key.to_string()).or_default() += 1;
    }

    fn release_key(&mut self, key: &str) {
        if let Some(count) = self.active_keys.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.active_keys.remove(key);
            }
        }
    }

    fn processing_len(&self) -> usize {
        self.main.len() + self.supplemental.len()
    }

    fn disarm_escalation(&mut self) {
        if let Some(timer) = self.escalation.take() {
            timer.disarm();
        }
    }

    fn snapshots<'a>(
        &'a self,
        ids: impl Iterator<Item = &'a TaskId> + 'a,
    ) -> impl Iterator<Item = TaskSnapshot> + 'a {
        ids.filter_map(move |id| self.records.get(id)).map(TaskRecord::snapshot)
    }
}

struct Shared {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
    throttle: LaunchThrottleQueue,
}

/// Admits keyed async tasks under a concurrency cap.
///
/// Tasks wait in FIFO order until a main slot is free, then launch through an
/// owned [`LaunchThrottleQueue`] so launches are spaced by
/// `min_launch_interval`. When a backlog persists for `supplemental_wait`
/// while main is full, the oldest main task is moved into the supplemental
/// set, freeing its slot for the next waiting task. Failed tasks are logged
/// and retired like successful ones.
#[derive(Clone)]
pub struct ConcurrencyTaskQueue {
    shared: Arc<Shared>,
}

impl ConcurrencyTaskQueue {
    /// Create a new queue with the given configuration
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        debug!(?config, "ConcurrencyTaskQueue::new: called");
        config.validate()?;
        let throttle = LaunchThrottleQueue::new(config.min_launch_interval());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                inner: Mutex::new(QueueInner::default()),
                throttle,
            }),
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Submit a task. Duplicates (with deduplication on) and submissions after
    /// destroy are dropped silently.
    pub async fn submit(&self, task: Task) -> SubmitResult {
        let (key, action) = task.into_parts();
        debug!(%key, "ConcurrencyTaskQueue::submit: called");
        let mut inner = self.shared.inner.lock().await;

        if inner.state.is_destroyed() {
            debug!(%key, "ConcurrencyTaskQueue::submit: destroyed, ignoring");
            return SubmitResult::Destroyed;
        }

        if self.shared.config.deduplicate && inner.active_keys.contains_key(&key) {
            debug!(%key, "ConcurrencyTaskQueue::submit: duplicate key, ignoring");
            inner.stats.total_deduplicated += 1;
            return SubmitResult::Duplicate;
        }

        let id = inner.next_task_id();
        inner.track_key(&key);
        inner.records.insert(id, TaskRecord::new(id, key, action));
        inner.waiting.push_back(id);
        inner.stats.total_submitted += 1;
        inner.stats.peak_waiting = inner.stats.peak_waiting.max(inner.waiting.len());
        let position = inner.waiting.len();
        debug!(%id, position, "ConcurrencyTaskQueue::submit: queued");

        self.shared.admit(&mut inner).await;
        SubmitResult::Queued { id, position }
    }

    /// Cancel every waiting task whose key is not in `keys`.
    ///
    /// Admitted tasks are never touched. Returns the cancelled keys in their
    /// former waiting order.
    pub async fn cancel_waiting_except<I, S>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keep: HashSet<String> = keys.into_iter().map(Into::into).collect();
        debug!(keep = keep.len(), "ConcurrencyTaskQueue::cancel_waiting_except: called");
        let mut inner = self.shared.inner.lock().await;

        if inner.state.is_destroyed() {
            debug!("ConcurrencyTaskQueue::cancel_waiting_except: destroyed, nothing to cancel");
            return Vec::new();
        }

        let QueueInner { waiting, records, .. } = &mut *inner;
        let mut removed = waiting.remove_by(|id| records.get(id).is_none_or(|r| !keep.contains(&r.key)));
        removed.reverse();

        let mut cancelled = Vec::with_capacity(removed.len());
        for id in removed {
            if let Some(mut record) = inner.records.remove(&id) {
                record.retire();
                inner.release_key(&record.key);
                cancelled.push(record.key);
            }
        }
        inner.stats.total_cancelled += cancelled.len() as u64;

        if inner.waiting.is_empty() && inner.escalation.is_some() {
            debug!("ConcurrencyTaskQueue::cancel_waiting_except: backlog gone, disarming escalation");
            inner.disarm_escalation();
        }

        debug!(?cancelled, "ConcurrencyTaskQueue::cancel_waiting_except: done");
        cancelled
    }

    /// Tear down the queue. Terminal.
    ///
    /// Drops all bookkeeping and cancels pending launches; actions already
    /// launched keep running but their completion no longer touches the queue.
    pub async fn destroy(&self) {
        debug!("ConcurrencyTaskQueue::destroy: called");
        let mut inner = self.shared.inner.lock().await;

        if inner.state.is_destroyed() {
            debug!("ConcurrencyTaskQueue::destroy: already destroyed");
            return;
        }

        inner.state = LifecycleState::Destroyed;
        let dropped_waiting = inner.waiting.len();
        let dropped_processing = inner.processing_len();
        inner.waiting.clear();
        inner.main.clear();
        inner.supplemental.clear();
        inner.records.clear();
        inner.active_keys.clear();
        inner.disarm_escalation();

        self.shared.throttle.destroy().await;

        info!(dropped_waiting, dropped_processing, "ConcurrencyTaskQueue destroyed");
    }

    /// Keys of retired tasks, oldest first
    pub async fn history_keys(&self) -> Vec<String> {
        self.shared.inner.lock().await.history.clone()
    }

    /// Supplemental tasks followed by main tasks, each in admission order
    pub async fn all_processing_tasks(&self) -> Vec<TaskSnapshot> {
        let inner = self.shared.inner.lock().await;
        inner
            .snapshots(inner.supplemental.iter().chain(inner.main.iter()))
            .collect()
    }

    /// Keys waiting for admission, in FIFO order
    pub async fn waiting_keys(&self) -> Vec<String> {
        let inner = self.shared.inner.lock().await;
        inner.snapshots(inner.waiting.iter()).map(|s| s.key).collect()
    }

    /// Get current queue state
    pub async fn queue_state(&self) -> QueueState {
        let inner = self.shared.inner.lock().await;
        QueueState {
            waiting: inner.waiting.len(),
            main: inner.main.len(),
            supplemental: inner.supplemental.len(),
            escalation_armed: inner.escalation.is_some(),
            destroyed: inner.state.is_destroyed(),
            stats: inner.stats.clone(),
        }
    }

    /// Get the queue statistics
    pub async fn stats(&self) -> QueueStats {
        self.shared.inner.lock().await.stats.clone()
    }

    pub async fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().await.state.is_destroyed()
    }
}

impl Shared {
    /// Admission step: fill free main slots from the head of `waiting`.
    ///
    /// Runs after every submit, retirement and escalation, always under the
    /// queue lock, so launch order into the throttle follows admission order.
    async fn admit(self: &Arc<Self>, inner: &mut QueueInner) {
        if inner.state.is_destroyed() || inner.waiting.is_empty() {
            debug!("admit: nothing to admit");
            return;
        }

        let capacity = self.config.concurrency_capacity;
        let mut admitted = Vec::new();
        while inner.main.len() < capacity {
            let Some(id) = inner.waiting.pop_front() else {
                break;
            };
            let Some(record) = inner.records.get_mut(&id) else {
                debug!(%id, "admit: no record for waiting id, skipping");
                continue;
            };
            let key = record.key.clone();
            match record.admit() {
                Some(action) => {
                    inner.main.push_back(id);
                    admitted.push((id, key, action));
                }
                None => warn!(%id, %key, "admit: task has no action, dropping"),
            }
        }

        if !admitted.is_empty() {
            inner.stats.total_admitted += admitted.len() as u64;
            inner.stats.peak_processing = inner.stats.peak_processing.max(inner.processing_len());
            if inner.escalation.is_some() {
                debug!("admit: slot freed, disarming escalation");
                inner.disarm_escalation();
            }
        }

        if !inner.waiting.is_empty() && inner.main.len() >= capacity {
            self.arm_escalation(inner);
        }

        for (id, key, action) in admitted {
            debug!(%id, %key, "admit: handing to throttle");
            let flow = completion_flow(Arc::clone(self), id, key, action);
            let queued = self
                .throttle
                .enqueue(move || {
                    tokio::spawn(flow);
                    Ok(())
                })
                .await;
            if !queued {
                debug!(%id, "admit: throttle destroyed, launch dropped");
            }
        }
    }

    fn arm_escalation(self: &Arc<Self>, inner: &mut QueueInner) {
        if inner.escalation.is_some() {
            debug!("arm_escalation: already armed");
            return;
        }
        inner.escalation_generation += 1;
        let generation = inner.escalation_generation;
        let on_fire = escalation_flow(Arc::downgrade(self), generation);
        inner.escalation = Some(EscalationTimer::arm(
            generation,
            self.config.supplemental_wait(),
            on_fire,
        ));
    }

    /// Escalation timer fired: move the oldest main task aside if the
    /// supplemental set has room, then admit into the freed slot.
    async fn escalate(self: &Arc<Self>, generation: u64) {
        debug!(generation, "escalate: called");
        let mut inner = self.inner.lock().await;

        if inner.state.is_destroyed() {
            return;
        }

        // Disarm. The timer's own task is running this, so drop it without aborting.
        match inner.escalation.take() {
            Some(timer) if timer.generation() == generation => {}
            other => {
                debug!(generation, "escalate: stale timer, ignoring");
                inner.escalation = other;
                return;
            }
        }

        if inner.supplemental.len() >= self.config.supplemental_capacity {
            debug!(
                supplemental = inner.supplemental.len(),
                "escalate: supplemental full, timer expires"
            );
            return;
        }

        let Some(id) = inner.main.pop_front() else {
            debug!("escalate: main empty, nothing to move");
            return;
        };
        if let Some(record) = inner.records.get_mut(&id) {
            record.relocate();
            info!(%id, key = %record.key, "Escalated task into supplemental capacity");
        }
        inner.supplemental.push_back(id);
        inner.stats.total_escalations += 1;

        self.admit(&mut inner).await;
    }

    /// Completion observed: drop the task from whichever set holds it, record
    /// its key and admit the next waiting task.
    async fn retire(self: &Arc<Self>, id: TaskId, key: String, succeeded: bool) {
        debug!(%id, %key, succeeded, "retire: called");
        let mut inner = self.inner.lock().await;

        if inner.state.is_destroyed() {
            debug!(%id, "retire: destroyed, ignoring");
            return;
        }

        let from = inner.records.get_mut(&id).map(TaskRecord::retire);
        match from {
            Some(TaskLocation::Main) => {
                inner.main.retain(|m| *m != id);
            }
            Some(TaskLocation::Supplemental) => {
                inner.supplemental.retain(|s| *s != id);
            }
            other => {
                debug!(%id, ?other, "retire: unexpected location");
            }
        }
        inner.records.remove(&id);
        inner.release_key(&key);

        if succeeded {
            inner.stats.total_completed += 1;
        } else {
            inner.stats.total_failed += 1;
        }
        inner.history.push(key);

        self.admit(&mut inner).await;
    }
}

/// Completion-tracking flow for one launched task: await the action, then
/// retire it. Runs independently of the throttle's pacing loop.
fn completion_flow(shared: Arc<Shared>, id: TaskId, key: String, action: TaskAction) -> BoxFuture<'static, ()> {
    async move {
        debug!(%id, %key, "completion_flow: launched");
        let outcome = run_action(&key, action).await;
        if let Err(e) = &outcome {
            warn!(%id, error = %e, "Task failed; retiring");
        }
        shared.retire(id, key, outcome.is_ok()).await;
    }
    .boxed()
}

fn escalation_flow(shared: Weak<Shared>, generation: u64) -> BoxFuture<'static, ()> {
    async move {
        match shared.upgrade() {
            Some(shared) => shared.escalate(generation).await,
            None => debug!(generation, "escalation_flow: queue dropped"),
        }
    }
    .boxed()
}

/// Run a task action, turning errors and panics into `TaskError`
async fn run_action(key: &str, action: TaskAction) -> Result<(), TaskError> {
    match AssertUnwindSafe(async move { action().await }).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(TaskError::failed(key, &e)),
        Err(payload) => Err(TaskError::panicked(key, payload)),
    }
}
