//! Queue lifecycle state

use serde::{Deserialize, Serialize};

/// Lifecycle of a queue.
///
/// One-way: once `Destroyed`, a queue never returns to `Normal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Accepting and running work
    #[default]
    Normal,

    /// Torn down; all further work is dropped
    Destroyed,
}

impl LifecycleState {
    pub fn is_destroyed(self) -> bool {
        matches!(self, LifecycleState::Destroyed)
    }
}
