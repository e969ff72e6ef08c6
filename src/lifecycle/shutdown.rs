//! Shutdown coordination for driven streams.

use std::time::Duration;

use tokio::sync::broadcast;

use crate::stream::StreamTracker;

/// Coordinator for graceful shutdown.
///
/// Every [`StreamDriver`](crate::driver::StreamDriver) built with
/// `with_shutdown` subscribes here and resets its stream when triggered.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Tell every subscribed stream to stop.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Number of streams still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Trigger shutdown and wait for `tracker` to drain. Returns false if
    /// streams were still live when `grace` ran out.
    pub async fn drain(&self, tracker: &StreamTracker, grace: Duration) -> bool {
        tracing::info!(
            active_streams = tracker.active_count(),
            grace_secs = grace.as_secs(),
            "Draining streams"
        );
        self.trigger();
        match tokio::time::timeout(grace, tracker.wait_for_drain()).await {
            Ok(()) => {
                tracing::info!("All streams drained");
                true
            }
            Err(_) => {
                tracing::warn!(
                    active_streams = tracker.active_count(),
                    "Shutdown grace period expired with live streams"
                );
                false
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamId;

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_streams() {
        let shutdown = Shutdown::new();
        let tracker = StreamTracker::new();
        let guard = tracker.track(StreamId::new());
        let mut rx = shutdown.subscribe();

        let release = tokio::spawn(async move {
            let _ = rx.recv().await;
            tokio::time::sleep(Duration::from_millis(250)).await;
            drop(guard);
        });

        assert!(shutdown.drain(&tracker, Duration::from_secs(5)).await);
        release.await.unwrap();
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_gives_up_after_grace() {
        let shutdown = Shutdown::new();
        let tracker = StreamTracker::new();
        let _guard = tracker.track(StreamId::new());

        assert!(!shutdown.drain(&tracker, Duration::from_secs(1)).await);
        assert_eq!(tracker.active_count(), 1);
    }
}
