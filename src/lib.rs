//! Per-stream HTTP filter chain execution.
//!
//! A stream's request frames run through an ordered list of decoder
//! filters and its response frames through an ordered list of encoder
//! filters. Filters may hold, buffer, rewrite, inject or answer frames;
//! the [`FilterManager`] keeps iteration, buffering, backpressure and
//! local replies consistent while they do.

pub mod buffer;
pub mod cluster;
pub mod config;
pub mod driver;
pub mod filter;
pub mod http;
pub mod lifecycle;
pub mod manager;
pub mod observability;
pub mod routing;
pub mod stream;

pub use config::FilterChainConfig;
pub use driver::{ContinuationHandle, StreamDriver, StreamEvent, StreamHandle};
pub use filter::{
    FilterChainFactory, FilterDataStatus, FilterHeadersStatus, FilterMetadataStatus,
    FilterTrailersStatus, StreamDecoderFilter, StreamEncoderFilter,
};
pub use lifecycle::Shutdown;
pub use manager::{FilterChainError, FilterManager};
pub use stream::{Direction, StreamCallbacks};
