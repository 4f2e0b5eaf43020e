//! Concurrency task queue
//!
//! Admits keyed tasks under a concurrency cap, deduplicates by key, escalates
//! capacity when a backlog persists, and paces launches through a
//! [`LaunchThrottleQueue`](crate::throttle::LaunchThrottleQueue).

mod config;
mod core;
mod escalation;
mod queue;

pub use config::QueueConfig;
pub use self::core::ConcurrencyTaskQueue;
pub use queue::{QueueState, QueueStats, SubmitResult, Task, TaskFuture, TaskId, TaskLocation, TaskSnapshot};
