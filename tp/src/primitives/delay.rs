//! Delay primitive

use std::time::Duration;

/// Resume the caller after `duration`.
///
/// A zero duration still yields once, so a pacing loop configured with no
/// interval gives other tasks a turn between steps.
pub async fn wait(duration: Duration) {
    if duration.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(duration).await;
    }
}
