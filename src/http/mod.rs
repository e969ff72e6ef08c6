//! Protocol-neutral HTTP frame types.
//!
//! # Data Flow
//! ```text
//! codec (out of scope)
//!     → request.rs (RequestHeaderMap, trailers)
//!     → decoder filter chain
//!     → encoder filter chain
//!     → response.rs (ResponseHeaderMap, local replies)
//!     → codec (out of scope)
//! ```
//!
//! # Design Decisions
//! - Headers carry typed method/path/status instead of pseudo-header entries
//! - Trailers are plain `http::HeaderMap`
//! - Metadata is an ordered string map and never carries end-of-stream

pub mod metadata;
pub mod request;
pub mod response;

pub use metadata::MetadataMap;
pub use request::RequestHeaderMap;
pub use response::{LocalReply, ResponseHeaderMap};

/// Trailers for either direction.
pub type TrailerMap = http::HeaderMap;
