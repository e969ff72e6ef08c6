//! Body buffering with watermark accounting.
//!
//! # Responsibilities
//! - Own the per-direction buffered body of a stream
//! - Report high/low watermark crossings as events
//!
//! # Design Decisions
//! - Crossings are returned to the caller instead of invoking callbacks, so
//!   the stream decides what backpressure means for each direction
//! - A limit of zero disables watermarks entirely

pub mod watermark;

pub use watermark::{WatermarkBuffer, WatermarkEvent};
