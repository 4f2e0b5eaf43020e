//! Error types

use std::any::Any;

use thiserror::Error;

/// Errors from building or configuring a queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a submitted task's action.
///
/// Never returned to the submitter; the queue logs it and retires the task.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task {key} failed: {message}")]
    Failed { key: String, message: String },

    #[error("Task {key} panicked: {message}")]
    Panicked { key: String, message: String },
}

impl TaskError {
    /// Build from an action's error
    pub fn failed(key: &str, error: &eyre::Report) -> Self {
        TaskError::Failed {
            key: key.to_string(),
            message: format!("{error:#}"),
        }
    }

    /// Build from a caught panic payload
    pub fn panicked(key: &str, payload: Box<dyn Any + Send>) -> Self {
        TaskError::Panicked {
            key: key.to_string(),
            message: panic_message(payload.as_ref()),
        }
    }

    /// Key of the task that failed
    pub fn key(&self) -> &str {
        match self {
            TaskError::Failed { key, .. } | TaskError::Panicked { key, .. } => key,
        }
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_message_includes_cause_chain() {
        let report = eyre::eyre!("connection reset").wrap_err("fetch avatar");
        let err = TaskError::failed("avatar-1", &report);
        assert_eq!(err.key(), "avatar-1");
        let msg = err.to_string();
        assert!(msg.contains("avatar-1"));
        assert!(msg.contains("fetch avatar"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_panicked_extracts_payload() {
        let err = TaskError::panicked("k", Box::new("boom"));
        assert!(matches!(&err, TaskError::Panicked { message, .. } if message == "boom"));

        let err = TaskError::panicked("k", Box::new(String::from("owned boom")));
        assert!(matches!(&err, TaskError::Panicked { message, .. } if message == "owned boom"));

        let err = TaskError::panicked("k", Box::new(42u8));
        assert!(matches!(&err, TaskError::Panicked { message, .. } if message == "unknown panic payload"));
    }

    #[test]
    fn test_invalid_config_display() {
        let err = QueueError::InvalidConfig("concurrency_capacity must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: concurrency_capacity must be at least 1"
        );
    }
}
