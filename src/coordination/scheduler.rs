//! Interval refresh timer.
//!
//! Owns at most one timer task. Toggling auto-refresh aborts the current
//! timer and optionally spawns a fresh one; a refresh already in flight in
//! the aggregator is not affected.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::RefreshCause;
use crate::gateway::RefreshRequester;

/// Counts timer tasks that are still alive
struct LiveTimer(Arc<AtomicUsize>);

impl LiveTimer {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LiveTimer {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RefreshScheduler {
    requester: Arc<dyn RefreshRequester>,
    interval_tx: watch::Sender<Duration>,
    timer: Option<JoinHandle<()>>,
    live_timers: Arc<AtomicUsize>,
}

impl RefreshScheduler {
    pub fn new(requester: Arc<dyn RefreshRequester>, interval: Duration) -> Self {
        let (interval_tx, _) = watch::channel(interval);
        Self {
            requester,
            interval_tx,
            timer: None,
            live_timers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Applies from the next scheduling decision; the pending sleep is kept.
    pub fn set_interval(&self, interval: Duration) {
        info!("Auto-refresh interval set to {:?}", interval);
        self.interval_tx.send_replace(interval);
    }

    pub fn is_enabled(&self) -> bool {
        self.timer.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Cancel the pending timer, then reschedule if `enabled`.
    pub fn set_enabled(&mut self, enabled: bool) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if enabled {
            let requester = Arc::clone(&self.requester);
            let interval_rx = self.interval_tx.subscribe();
            let guard = LiveTimer::new(&self.live_timers);
            self.timer = Some(tokio::spawn(run_timer(requester, interval_rx, guard)));
        }
        info!("Auto-refresh {}", if enabled { "enabled" } else { "paused" });
    }

    /// Timer tasks not yet torn down. Aborted timers drop out asynchronously.
    pub fn live_timer_count(&self) -> usize {
        self.live_timers.load(Ordering::SeqCst)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

async fn run_timer(
    requester: Arc<dyn RefreshRequester>,
    mut interval_rx: watch::Receiver<Duration>,
    _guard: LiveTimer,
) {
    loop {
        let period = *interval_rx.borrow_and_update();
        tokio::time::sleep(period).await;
        if !requester.request_refresh(RefreshCause::Timer) {
            debug!("Refresh target gone, stopping timer");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockRefreshRequester;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_toggle_leaves_exactly_one_timer() {
        let mut requester = MockRefreshRequester::new();
        requester.expect_request_refresh().return_const(true);
        let mut scheduler = RefreshScheduler::new(Arc::new(requester), Duration::from_secs(30));

        scheduler.set_enabled(true);
        scheduler.set_enabled(false);
        scheduler.set_enabled(true);
        settle().await;

        assert!(scheduler.is_enabled());
        assert_eq!(scheduler.live_timer_count(), 1);

        scheduler.set_enabled(true);
        scheduler.set_enabled(true);
        settle().await;
        assert_eq!(scheduler.live_timer_count(), 1);

        scheduler.set_enabled(false);
        settle().await;
        assert!(!scheduler.is_enabled());
        assert_eq!(scheduler.live_timer_count(), 0);
    }

    #[tokio::test]
    async fn test_timer_fires_with_timer_cause() {
        let mut requester = MockRefreshRequester::new();
        requester
            .expect_request_refresh()
            .withf(|cause| *cause == RefreshCause::Timer)
            .times(1..)
            .return_const(true);
        let mut scheduler = RefreshScheduler::new(Arc::new(requester), Duration::from_millis(10));

        scheduler.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(60)).await;
        scheduler.set_enabled(false);
    }

    #[tokio::test]
    async fn test_timer_stops_when_target_gone() {
        let mut requester = MockRefreshRequester::new();
        requester.expect_request_refresh().times(1).return_const(false);
        let mut scheduler = RefreshScheduler::new(Arc::new(requester), Duration::from_millis(5));

        scheduler.set_enabled(true);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!scheduler.is_enabled());
        assert_eq!(scheduler.live_timer_count(), 0);
    }

    #[test]
    fn test_interval_update_is_visible() {
        let scheduler = RefreshScheduler::new(
            Arc::new(MockRefreshRequester::new()),
            Duration::from_secs(30),
        );
        scheduler.set_interval(Duration::from_secs(5));
        assert_eq!(scheduler.interval(), Duration::from_secs(5));
    }
}
