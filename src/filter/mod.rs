//! Filter-facing API.
//!
//! # Responsibilities
//! - Define what a decoder or encoder filter can do (traits.rs)
//! - Define how a filter steers iteration (status.rs)
//! - Build a stream's ordered filter lists (factory.rs)
//!
//! # Design Decisions
//! - Filters are trait objects held by the stream; the stream addresses them
//!   by list index, never by back-pointer
//! - A filter reaches the stream only through the callbacks handle it is
//!   given for the duration of a call
//! - Filters that act on both directions are registered as two filters

pub mod factory;
pub mod status;
pub mod traits;

pub use factory::{FilterChainBuilder, FilterChainFactory, FilterFactoryFn, StaticFilterChainFactory};
pub use status::{FilterDataStatus, FilterHeadersStatus, FilterMetadataStatus, FilterTrailersStatus};
pub use traits::{DownstreamWatermarkCallbacks, StreamDecoderFilter, StreamEncoderFilter};

pub use crate::manager::{DecoderFilterCallbacks, EncoderFilterCallbacks};
