//! Queue types for the scheduler

use std::fmt;
use std::future::Future;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time::Instant;

/// Future produced by a task action
pub type TaskFuture = BoxFuture<'static, eyre::Result<()>>;

/// Boxed task action, invoked once at launch
pub type TaskAction = Box<dyn FnOnce() -> TaskFuture + Send + 'static>;

/// A keyed unit of asynchronous work
pub struct Task {
    key: String,
    action: TaskAction,
}

impl Task {
    /// Create a task from a key and an async action
    pub fn new<F, Fut>(key: impl Into<String>, action: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        Self {
            key: key.into(),
            action: Box::new(move || action().boxed()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn into_parts(self) -> (String, TaskAction) {
        (self.key, self.action)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Identity of one accepted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Where a task currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskLocation {
    Waiting,
    Main,
    Supplemental,
    Retired,
}

/// Bookkeeping for one task.
///
/// Location changes only through the transition methods below; the queue's
/// ordered sets hold `TaskId`s and mirror these transitions.
pub(crate) struct TaskRecord {
    pub id: TaskId,
    pub key: String,
    pub location: TaskLocation,
    action: Option<TaskAction>,
    pub submitted_at: Instant,
    pub admitted_at: Option<Instant>,
}

impl TaskRecord {
    pub fn new(id: TaskId, key: String, action: TaskAction) -> Self {
        Self {
            id,
            key,
            location: TaskLocation::Waiting,
            action: Some(action),
            submitted_at: Instant::now(),
            admitted_at: None,
        }
    }

    /// Waiting -> Main. Hands out the action for launch.
    pub fn admit(&mut self) -> Option<TaskAction> {
        self.location = TaskLocation::Main;
        self.admitted_at = Some(Instant::now());
        self.action.take()
    }

    /// Main -> Supplemental
    pub fn relocate(&mut self) {
        self.location = TaskLocation::Supplemental;
    }

    /// Any -> Retired. Returns the location it was retired from.
    pub fn retire(&mut self) -> TaskLocation {
        std::mem::replace(&mut self.location, TaskLocation::Retired)
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            key: self.key.clone(),
            location: self.location,
            submitted_at: self.submitted_at,
            admitted_at: self.admitted_at,
        }
    }
}

/// Read-only view of a task
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub key: String,
    pub location: TaskLocation,
    pub submitted_at: Instant,
    pub admitted_at: Option<Instant>,
}

/// Result of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResult {
    /// Appended to the waiting set (1-based position before admission ran)
    Queued { id: TaskId, position: usize },

    /// Key already waiting or processing; dropped
    Duplicate,

    /// Queue destroyed; dropped
    Destroyed,
}

impl SubmitResult {
    pub fn is_queued(&self) -> bool {
        matches!(self, SubmitResult::Queued { .. })
    }

    pub fn id(&self) -> Option<TaskId> {
        match self {
            SubmitResult::Queued { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Statistics for the queue
#[derive(Debug, Default, Clone)]
pub struct QueueStats {
    pub total_submitted: u64,
    pub total_deduplicated: u64,
    pub total_admitted: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    pub total_cancelled: u64,
    pub total_escalations: u64,
    pub peak_waiting: usize,
    pub peak_processing: usize,
}

/// Point-in-time view of the queue
#[derive(Debug, Clone)]
pub struct QueueState {
    pub waiting: usize,
    pub main: usize,
    pub supplemental: usize,
    pub escalation_armed: bool,
    pub destroyed: bool,
    pub stats: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> TaskRecord {
        let (key, action) = Task::new("k", || async { Ok(()) }).into_parts();
        TaskRecord::new(TaskId(1), key, action)
    }

    #[tokio::test]
    async fn test_record_transitions() {
        let mut rec = record();
        assert_eq!(rec.location, TaskLocation::Waiting);
        assert!(rec.admitted_at.is_none());

        let action = rec.admit();
        assert!(action.is_some());
        assert_eq!(rec.location, TaskLocation::Main);
        assert!(rec.admitted_at.is_some());
        // action handed out once
        assert!(rec.admit().is_none());

        rec.relocate();
        assert_eq!(rec.location, TaskLocation::Supplemental);
        assert_eq!(rec.retire(), TaskLocation::Supplemental);
        assert_eq!(rec.location, TaskLocation::Retired);
    }

    #[tokio::test]
    async fn test_task_action_runs() {
        let (_, action) = Task::new("k", || async { Err(eyre::eyre!("nope")) }).into_parts();
        assert!(action().await.is_err());
    }

    #[test]
    fn test_task_debug_shows_key() {
        let task = Task::new("fetch-1", || async { Ok(()) });
        assert_eq!(task.key(), "fetch-1");
        assert!(format!("{task:?}").contains("fetch-1"));
    }

    #[test]
    fn test_submit_result_accessors() {
        let queued = SubmitResult::Queued {
            id: TaskId(3),
            position: 1,
        };
        assert!(queued.is_queued());
        assert_eq!(queued.id(), Some(TaskId(3)));
        assert!(!SubmitResult::Duplicate.is_queued());
        assert_eq!(SubmitResult::Destroyed.id(), None);
        assert_eq!(TaskId(3).to_string(), "task-3");
    }
}
