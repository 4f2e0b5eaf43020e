//! One-shot, resettable signal
//!
//! A value that is set once and read many times. Readers that arrive before
//! the value is set wait for it; readers that arrive afterwards get it
//! immediately. `reset` re-arms the signal so later readers wait for the next
//! `set`.

use tokio::sync::watch;
use tracing::debug;

/// Set-once, read-many, re-armable value.
///
/// A reset does not strand readers: a `get` that was already waiting when
/// `reset` ran keeps waiting and resolves with the value of the next `set`.
pub struct ResettableSignal<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> ResettableSignal<T>
where
    T: Clone + Send + Sync,
{
    /// Create an unset signal
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Set the value. Ignored (returns false) if already set since the last reset.
    pub fn set(&self, value: T) -> bool {
        let accepted = self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(value);
                true
            } else {
                false
            }
        });
        debug!(accepted, "ResettableSignal::set: called");
        accepted
    }

    /// Wait for the value
    pub async fn get(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            // `self` owns the sender, so the channel cannot close while we wait.
            let _ = rx.changed().await;
        }
    }

    /// Re-arm: later `get` calls wait for a new `set`
    pub fn reset(&self) {
        debug!("ResettableSignal::reset: called");
        self.tx.send_replace(None);
    }

    /// Whether a value is currently available
    pub fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl<T> Default for ResettableSignal<T>
where
    T: Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_after_set() {
        let signal = ResettableSignal::new();
        assert!(signal.set(true));
        assert!(signal.is_set());
        assert!(signal.get().await);
        // still readable
        assert!(signal.get().await);
    }

    #[tokio::test]
    async fn test_waiter_before_set_receives_value() {
        let signal = Arc::new(ResettableSignal::new());
        let reader = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.get().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.set(7u32);

        assert_eq!(reader.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_second_set_ignored_until_reset() {
        let signal = ResettableSignal::new();
        assert!(signal.set(1u32));
        assert!(!signal.set(2));
        assert_eq!(signal.get().await, 1);

        signal.reset();
        assert!(!signal.is_set());
        assert!(signal.set(3));
        assert_eq!(signal.get().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_makes_readers_wait() {
        let signal = Arc::new(ResettableSignal::new());
        signal.set("first".to_string());
        signal.reset();

        let pending = tokio::time::timeout(Duration::from_millis(50), signal.get()).await;
        assert!(pending.is_err(), "get should wait after reset");

        let reader = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.get().await })
        };
        tokio::task::yield_now().await;
        signal.set("second".to_string());
        assert_eq!(reader.await.unwrap(), "second");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reader_waiting_across_reset_gets_next_value() {
        let signal = Arc::new(ResettableSignal::new());
        let reader = {
            let signal = Arc::clone(&signal);
            tokio::spawn(async move { signal.get().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        signal.reset();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!reader.is_finished());

        signal.set(9u32);
        assert_eq!(reader.await.unwrap(), 9);
    }
}
