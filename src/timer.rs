use crate::model::ContentKey;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Fired when a countdown reaches zero. The generation lets a consumer
/// discard an expiry that raced with a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerExpired {
    pub key: ContentKey,
    pub generation: u64,
}

/// Single-owner countdown clock for the current content unit.
///
/// Starting a new countdown implicitly stops any running one; the expiry
/// for a given `start` fires exactly once, and never after `stop` or a
/// subsequent `start`. The countdown value is advisory display state; the
/// authoritative end-of-unit decision always comes from the server.
pub struct ContentTimer {
    generation: u64,
    task: Option<JoinHandle<()>>,
    remaining_tx: watch::Sender<u64>,
    last: Option<(ContentKey, u64, UnboundedSender<TimerExpired>)>,
}

impl ContentTimer {
    pub fn new() -> Self {
        let (remaining_tx, _) = watch::channel(0);
        Self {
            generation: 0,
            task: None,
            remaining_tx,
            last: None,
        }
    }

    /// Start a countdown of `duration_secs` for the given content unit,
    /// ticking once per second. Stops any running countdown first.
    pub fn start(
        &mut self,
        key: ContentKey,
        duration_secs: u64,
        expiry: UnboundedSender<TimerExpired>,
    ) {
        self.abort_task();
        self.generation += 1;
        let generation = self.generation;
        self.last = Some((key.clone(), duration_secs, expiry.clone()));

        debug!(activity = %key.activity_id, index = key.index, duration_secs, "starting countdown");
        let remaining_tx = self.remaining_tx.clone();
        self.task = Some(tokio::spawn(async move {
            let mut left = duration_secs;
            let _ = remaining_tx.send(left);
            while left > 0 {
                tokio::time::sleep(Duration::from_secs(1)).await;
                left -= 1;
                let _ = remaining_tx.send(left);
            }
            let _ = expiry.send(TimerExpired { key, generation });
        }));
    }

    /// Cancel without firing.
    pub fn stop(&mut self) {
        self.abort_task();
        self.last = None;
        let _ = self.remaining_tx.send(0);
    }

    /// Restart the countdown for the same content unit from its full
    /// duration. No-op when nothing was started.
    pub fn reset(&mut self) {
        if let Some((key, duration_secs, expiry)) = self.last.clone() {
            self.start(key, duration_secs, expiry);
        }
    }

    /// Seconds left, for display.
    pub fn remaining(&self) -> watch::Receiver<u64> {
        self.remaining_tx.subscribe()
    }

    /// The generation of the most recent `start`; expiries from older
    /// generations are stale.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Default for ContentTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ContentTimer {
    fn drop(&mut self) {
        self.abort_task();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn key(index: usize) -> ContentKey {
        ContentKey::new("a1", index)
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_fires_exactly_once_at_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ContentTimer::new();
        timer.start(key(0), 5, tx);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.key, key(0));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_silences_the_previous_owner() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ContentTimer::new();
        timer.start(key(0), 3, tx.clone());
        tokio::time::sleep(Duration::from_secs(2)).await;

        // Second start before the first expiry: first must never fire.
        timer.start(key(1), 3, tx);
        tokio::time::sleep(Duration::from_secs(4)).await;

        let fired = rx.try_recv().unwrap();
        assert_eq!(fired.key, key(1));
        assert_eq!(fired.generation, timer.generation());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_expiry_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ContentTimer::new();
        timer.start(key(0), 2, tx);
        tokio::time::sleep(Duration::from_secs(1)).await;
        timer.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_full_duration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = ContentTimer::new();
        timer.start(key(0), 5, tx);
        tokio::time::sleep(Duration::from_secs(4)).await;

        timer.reset();
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_counts_down() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut timer = ContentTimer::new();
        timer.start(key(0), 3, tx);
        let remaining = timer.remaining();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*remaining.borrow(), 3);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(*remaining.borrow(), 2);
    }
}
