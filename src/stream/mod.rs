//! Per-stream identity, bookkeeping and the wire-facing collaborator.
//!
//! # Data Flow
//! ```text
//! codec (out of scope)
//!     → FilterManager dispatch
//!     → callbacks.rs (StreamCallbacks: filtered frames, upgrade, reset,
//!                     watermark and timeout notifications)
//!     → codec (out of scope)
//!
//! info.rs records what happened to the stream (route, response code, flags)
//! id.rs hands out stream ids and counts live streams
//! ```
//!
//! # Design Decisions
//! - The filter chain never writes to the wire itself; everything crosses
//!   the `StreamCallbacks` seam
//! - Stream ids only need uniqueness, so a relaxed atomic counter suffices

pub mod callbacks;
pub mod id;
pub mod info;

pub use callbacks::StreamCallbacks;
pub use id::{StreamGuard, StreamId, StreamTracker};
pub use info::{RequestId, ResponseFlag, StreamInfo};

use std::fmt;

/// Direction of frame flow through a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Inbound request frames, walked through decoder filters.
    Decode,
    /// Outbound response frames, walked through encoder filters.
    Encode,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Decode => "decode",
            Direction::Encode => "encode",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
