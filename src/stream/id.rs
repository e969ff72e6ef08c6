//! Stream identity and live-stream tracking.
//!
//! # Responsibilities
//! - Generate unique stream IDs for tracing
//! - Count live streams so owners can wait for them to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::observability::metrics;

/// Global atomic counter for stream IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static STREAM_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    /// Generate a new unique stream ID.
    pub fn new() -> Self {
        Self(STREAM_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Tracks live streams for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct StreamTracker {
    active_count: Arc<AtomicU64>,
}

impl StreamTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live stream. Returns a guard that decrements on drop.
    pub fn track(&self, id: StreamId) -> StreamGuard {
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_active_streams(active);
        StreamGuard {
            active_count: Arc::clone(&self.active_count),
            id,
        }
    }

    /// Get current live stream count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all tracked streams are gone.
    pub async fn wait_for_drain(&self) {
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Guard that tracks a stream's lifetime.
/// Decrements the live count when dropped.
#[derive(Debug)]
pub struct StreamGuard {
    active_count: Arc<AtomicU64>,
    id: StreamId,
}

impl StreamGuard {
    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_active_streams(active);
        tracing::trace!(stream_id = %self.id, "Stream released");
    }
}
