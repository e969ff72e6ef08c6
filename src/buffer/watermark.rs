//! A byte buffer that tracks a high/low watermark pair.
//!
//! # State Transitions
//! ```text
//! below ── len > high ──▶ above   (AboveHighWatermark)
//! above ── len <= low ──▶ below   (BelowLowWatermark)
//! ```
//! The low watermark is half the high watermark, so a buffer hovering around
//! the limit does not flap.

use bytes::{Bytes, BytesMut};

/// A watermark crossing observed after a buffer mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatermarkEvent {
    AboveHighWatermark,
    BelowLowWatermark,
}

/// Body buffer with watermark tracking.
#[derive(Debug, Default)]
pub struct WatermarkBuffer {
    data: BytesMut,
    high_watermark: usize,
    low_watermark: usize,
    above_high_watermark: bool,
}

impl WatermarkBuffer {
    /// Create an empty buffer whose high watermark is `limit`.
    pub fn new(limit: u32) -> Self {
        let mut buffer = Self::default();
        buffer.set_limits(limit);
        buffer
    }

    /// Change the limit. May report a crossing if the current length already
    /// sits on the other side of the new marks.
    pub fn set_watermarks(&mut self, limit: u32) -> Option<WatermarkEvent> {
        self.set_limits(limit);
        self.check_watermarks()
    }

    fn set_limits(&mut self, limit: u32) {
        self.high_watermark = limit as usize;
        self.low_watermark = (limit / 2) as usize;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn high_watermark(&self) -> usize {
        self.high_watermark
    }

    pub fn above_high_watermark(&self) -> bool {
        self.above_high_watermark
    }

    /// Append a copy of `bytes`.
    pub fn add(&mut self, bytes: &[u8]) -> Option<WatermarkEvent> {
        self.data.extend_from_slice(bytes);
        self.check_watermarks()
    }

    /// Move the contents of `other` to the end of this buffer, leaving
    /// `other` empty.
    pub fn move_from(&mut self, other: &mut BytesMut) -> Option<WatermarkEvent> {
        if self.data.is_empty() {
            std::mem::swap(&mut self.data, other);
        } else {
            self.data.unsplit(other.split());
        }
        self.check_watermarks()
    }

    /// Append another buffer of the same stream direction. A crossing
    /// already reported by `other` carries over, so it is not reported twice.
    /// If both buffers had reported a high watermark, the merged buffer owns
    /// one crossing and the other is released with a `BelowLowWatermark`.
    pub fn absorb(&mut self, mut other: WatermarkBuffer) -> Vec<WatermarkEvent> {
        let mut events = Vec::new();
        if self.above_high_watermark && other.above_high_watermark {
            events.push(WatermarkEvent::BelowLowWatermark);
        }
        self.above_high_watermark |= other.above_high_watermark;
        if self.data.is_empty() {
            std::mem::swap(&mut self.data, &mut other.data);
        } else {
            self.data.unsplit(other.data);
        }
        events.extend(self.check_watermarks());
        events
    }

    /// Take everything out of the buffer.
    pub fn drain_all(&mut self) -> (Bytes, Option<WatermarkEvent>) {
        let bytes = self.data.split().freeze();
        (bytes, self.check_watermarks())
    }

    /// Mutable access to the raw bytes. Callers that change the length must
    /// call [`WatermarkBuffer::check_watermarks`] afterwards.
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    pub fn bytes(&self) -> &BytesMut {
        &self.data
    }

    /// Re-evaluate the marks against the current length.
    pub fn check_watermarks(&mut self) -> Option<WatermarkEvent> {
        if self.high_watermark == 0 {
            return None;
        }
        let len = self.data.len();
        if !self.above_high_watermark && len > self.high_watermark {
            self.above_high_watermark = true;
            return Some(WatermarkEvent::AboveHighWatermark);
        }
        if self.above_high_watermark && len <= self.low_watermark {
            self.above_high_watermark = false;
            return Some(WatermarkEvent::BelowLowWatermark);
        }
        None
    }
}
