//! TaskPace - concurrency-capped async task queue
//!
//! Bounds how many background operations (fetches, animations, syncs) run at
//! once while avoiding request storms.
//!
//! # Core Concepts
//!
//! - **Admission**: tasks wait in FIFO order until a main slot is free
//! - **Deduplication**: a key already waiting or processing is not queued twice
//! - **Escalation**: a backlog that persists moves the oldest running task's
//!   slot into supplemental capacity so the next waiting task can start
//! - **Launch pacing**: consecutive launches are spaced by a minimum interval;
//!   completions are not paced
//!
//! # Lifecycle
//!
//! ```text
//! submit ──► waiting ──► main ──► LaunchThrottleQueue ──► launch
//!                         │                                  │
//!                         └─(escalation)─► supplemental      │
//!                                                            ▼
//!                         history ◄── retire ◄── completion (ok or failed)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use taskpace::{ConcurrencyTaskQueue, QueueConfig, Task};
//!
//! let queue = ConcurrencyTaskQueue::new(QueueConfig::default())?;
//! queue.submit(Task::new("avatar-42", || async { fetch_avatar(42).await })).await;
//! ```
//!
//! # Modules
//!
//! - [`scheduler`] - the concurrency task queue
//! - [`throttle`] - launch pacing
//! - [`primitives`] - delay, remove-by-predicate, resettable signal
//! - [`lifecycle`] - queue lifecycle state
//! - [`error`] - error types

pub mod error;
pub mod lifecycle;
pub mod primitives;
pub mod scheduler;
pub mod throttle;

// Re-export commonly used types
pub use error::{QueueError, TaskError};
pub use lifecycle::LifecycleState;
pub use primitives::{RemoveBy, ResettableSignal, wait};
pub use scheduler::{
    ConcurrencyTaskQueue, QueueConfig, QueueState, QueueStats, SubmitResult, Task, TaskFuture, TaskId, TaskLocation,
    TaskSnapshot,
};
pub use throttle::{DEFAULT_MIN_INTERVAL, Launch, LaunchThrottleQueue, ThrottleStats};
