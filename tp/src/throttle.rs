//! Launch throttling
//!
//! Serializes launch moments of queued actions so that consecutive launches
//! are at least `min_interval` apart. Only launches are paced: the drain loop
//! invokes an action and moves on after the interval, it never waits for the
//! work the action started.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::panic_message;
use crate::lifecycle::LifecycleState;
use crate::primitives::wait;

/// Default spacing between launches
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(300);

/// A launch action.
///
/// Invoked exactly once by the drain loop. An `Err` or a panic is a
/// launch-time failure: it is logged and the loop keeps going.
pub type Launch = Box<dyn FnOnce() -> eyre::Result<()> + Send + 'static>;

/// Launch statistics
#[derive(Debug, Default, Clone)]
pub struct ThrottleStats {
    pub total_launched: u64,
    pub total_launch_failures: u64,
    pub last_launch_at: Option<Instant>,
}

struct ThrottleInner {
    items: VecDeque<Launch>,
    state: LifecycleState,
    /// Present while a drain loop is running
    drain: Option<JoinHandle<()>>,
    stats: ThrottleStats,
}

struct ThrottleShared {
    min_interval: Duration,
    inner: Mutex<ThrottleInner>,
}

/// Single-lane queue that spaces out launches
pub struct LaunchThrottleQueue {
    shared: Arc<ThrottleShared>,
}

impl LaunchThrottleQueue {
    /// Create a queue that keeps launches at least `min_interval` apart
    pub fn new(min_interval: Duration) -> Self {
        debug!(?min_interval, "LaunchThrottleQueue::new: called");
        Self {
            shared: Arc::new(ThrottleShared {
                min_interval,
                inner: Mutex::new(ThrottleInner {
                    items: VecDeque::new(),
                    state: LifecycleState::Normal,
                    drain: None,
                    stats: ThrottleStats::default(),
                }),
            }),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.shared.min_interval
    }

    /// Queue a launch action, starting the drain loop if it is idle.
    ///
    /// Returns false (dropping the action) once the queue is destroyed.
    pub async fn enqueue<F>(&self, launch: F) -> bool
    where
        F: FnOnce() -> eyre::Result<()> + Send + 'static,
    {
        let mut inner = self.shared.inner.lock().await;

        if inner.state.is_destroyed() {
            debug!("LaunchThrottleQueue::enqueue: destroyed, dropping launch");
            return false;
        }

        inner.items.push_back(Box::new(launch));
        debug!(pending = inner.items.len(), "LaunchThrottleQueue::enqueue: queued");

        if inner.drain.as_ref().is_none_or(JoinHandle::is_finished) {
            debug!("LaunchThrottleQueue::enqueue: starting drain loop");
            inner.drain = Some(tokio::spawn(drain_loop(Arc::clone(&self.shared))));
        }
        true
    }

    /// Queue an async action.
    ///
    /// At launch the action's future is spawned; a failure it reports later is
    /// logged here, so standalone callers never lose asynchronous failures.
    pub async fn enqueue_future<F, Fut>(&self, action: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = eyre::Result<()>> + Send + 'static,
    {
        self.enqueue(move || {
            let fut = action();
            tokio::spawn(async move {
                if let Err(e) = fut.await {
                    warn!(error = %e, "LaunchThrottleQueue: launched action failed");
                }
            });
            Ok(())
        })
        .await
    }

    /// Tear down: drop queued launches and stop the drain loop. Terminal.
    pub async fn destroy(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.state.is_destroyed() {
            debug!("LaunchThrottleQueue::destroy: already destroyed");
            return;
        }

        inner.state = LifecycleState::Destroyed;
        let dropped = inner.items.len();
        inner.items.clear();
        if let Some(handle) = inner.drain.take() {
            debug!("LaunchThrottleQueue::destroy: aborting drain loop");
            handle.abort();
        }
        info!(dropped, "LaunchThrottleQueue destroyed");
    }

    /// Number of launches waiting their turn
    pub async fn pending(&self) -> usize {
        self.shared.inner.lock().await.items.len()
    }

    /// Whether a drain loop is currently running
    pub async fn is_draining(&self) -> bool {
        let inner = self.shared.inner.lock().await;
        inner.drain.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub async fn is_destroyed(&self) -> bool {
        self.shared.inner.lock().await.state.is_destroyed()
    }

    pub async fn stats(&self) -> ThrottleStats {
        self.shared.inner.lock().await.stats.clone()
    }
}

impl Default for LaunchThrottleQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

/// Launch queued actions one at a time, `min_interval` apart, until the queue
/// is empty or destroyed.
async fn drain_loop(shared: Arc<ThrottleShared>) {
    debug!("drain_loop: started");
    loop {
        let launch = {
            let mut inner = shared.inner.lock().await;
            if inner.state.is_destroyed() {
                debug!("drain_loop: destroyed, exiting");
                return;
            }
            match inner.items.pop_front() {
                Some(launch) => {
                    inner.stats.total_launched += 1;
                    inner.stats.last_launch_at = Some(Instant::now());
                    launch
                }
                None => {
                    debug!("drain_loop: queue empty, going idle");
                    inner.drain = None;
                    return;
                }
            }
        };

        let failed = match panic::catch_unwind(AssertUnwindSafe(launch)) {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                warn!(error = %e, "drain_loop: launch failed");
                true
            }
            Err(payload) => {
                warn!(panic = %panic_message(payload.as_ref()), "drain_loop: launch panicked");
                true
            }
        };
        if failed {
            shared.inner.lock().await.stats.total_launch_failures += 1;
        }

        // Failed launches still count as launches for spacing purposes.
        wait(shared.min_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> Arc<StdMutex<Vec<(u32, Instant)>>> {
        Arc::new(StdMutex::new(Vec::new()))
    }

    async fn enqueue_recording(queue: &LaunchThrottleQueue, log: &Arc<StdMutex<Vec<(u32, Instant)>>>, n: u32) {
        let log = Arc::clone(log);
        queue
            .enqueue(move || {
                log.lock().unwrap().push((n, Instant::now()));
                Ok(())
            })
            .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_launches_are_spaced() {
        let queue = LaunchThrottleQueue::new(Duration::from_millis(100));
        let log = recorder();
        let start = Instant::now();

        for n in 0..5 {
            enqueue_recording(&queue, &log, n).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let log = log.lock().unwrap();
        assert_eq!(log.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert_eq!(log[0].1 - start, Duration::ZERO, "first launch is immediate");
        for pair in log.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_does_not_stop_loop() {
        let queue = LaunchThrottleQueue::new(Duration::from_millis(10));
        let log = recorder();

        queue.enqueue(|| Err(eyre::eyre!("bad launch"))).await;
        enqueue_recording(&queue, &log, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(log.lock().unwrap().len(), 1);
        let stats = queue.stats().await;
        assert_eq!(stats.total_launched, 2);
        assert_eq!(stats.total_launch_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_panic_does_not_stop_loop() {
        let queue = LaunchThrottleQueue::new(Duration::from_millis(10));
        let log = recorder();

        queue.enqueue(|| panic!("launch blew up")).await;
        for n in 1..=3 {
            enqueue_recording(&queue, &log, n).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let log = log.lock().unwrap();
        assert_eq!(log.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![1, 2, 3]);
        for pair in log.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(10));
        }
        assert_eq!(queue.pending().await, 0);
        let stats = queue.stats().await;
        assert_eq!(stats.total_launched, 4);
        assert_eq!(stats.total_launch_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_future_sync_panic_does_not_stop_loop() {
        let queue = LaunchThrottleQueue::new(Duration::ZERO);
        let log = recorder();

        queue
            .enqueue_future(|| -> std::future::Ready<eyre::Result<()>> { panic!("action constructor blew up") })
            .await;
        enqueue_recording(&queue, &log, 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(queue.stats().await.total_launch_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_does_not_wait_for_completion() {
        let queue = LaunchThrottleQueue::new(Duration::from_millis(10));
        let log = recorder();
        let start = Instant::now();

        queue
            .enqueue_future(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        enqueue_recording(&queue, &log, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].1 - start < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_failure_is_contained() {
        let queue = LaunchThrottleQueue::new(Duration::ZERO);
        let log = recorder();

        queue.enqueue_future(|| async { Err(eyre::eyre!("late failure")) }).await;
        enqueue_recording(&queue, &log, 1).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(queue.stats().await.total_launch_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_pending_launches() {
        let queue = LaunchThrottleQueue::new(Duration::from_millis(100));
        let log = recorder();

        for n in 0..3 {
            enqueue_recording(&queue, &log, n).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.destroy().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(log.lock().unwrap().len(), 1);
        assert!(queue.is_destroyed().await);
        assert_eq!(queue.pending().await, 0);
        assert!(!queue.is_draining().await);
        assert!(!queue.enqueue(|| Ok(())).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_restarts_after_idle() {
        let queue = LaunchThrottleQueue::new(Duration::from_millis(20));
        let log = recorder();

        enqueue_recording(&queue, &log, 0).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!queue.is_draining().await);

        enqueue_recording(&queue, &log, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(queue.stats().await.total_launched, 2);
    }

    #[test]
    fn test_default_interval() {
        assert_eq!(LaunchThrottleQueue::default().min_interval(), DEFAULT_MIN_INTERVAL);
    }
}
