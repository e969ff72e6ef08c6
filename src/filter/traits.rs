//! The capability set a filter implements.

use bytes::BytesMut;

use crate::http::MetadataMap;
use crate::manager::{DecoderFilterCallbacks, EncoderFilterCallbacks};

use super::status::{
    FilterDataStatus, FilterHeadersStatus, FilterMetadataStatus, FilterTrailersStatus,
};

/// A filter on the request path.
///
/// Request headers and trailers live on the stream and are reached through
/// `callbacks`; body and metadata frames are lent for the call. Every method
/// except `decode_headers` defaults to passing the frame on untouched.
pub trait StreamDecoderFilter: Send {
    fn decode_headers(
        &mut self,
        callbacks: &mut DecoderFilterCallbacks<'_>,
        end_stream: bool,
    ) -> FilterHeadersStatus;

    fn decode_data(
        &mut self,
        _data: &mut BytesMut,
        _end_stream: bool,
        _callbacks: &mut DecoderFilterCallbacks<'_>,
    ) -> FilterDataStatus {
        FilterDataStatus::Continue
    }

    fn decode_trailers(&mut self, _callbacks: &mut DecoderFilterCallbacks<'_>) -> FilterTrailersStatus {
        FilterTrailersStatus::Continue
    }

    fn decode_metadata(
        &mut self,
        _metadata: &mut MetadataMap,
        _callbacks: &mut DecoderFilterCallbacks<'_>,
    ) -> FilterMetadataStatus {
        FilterMetadataStatus::Continue
    }

    /// The last request frame was delivered to this filter. Called once.
    fn decode_complete(&mut self, _callbacks: &mut DecoderFilterCallbacks<'_>) {}

    /// The stream is going away. No further callbacks follow.
    fn on_destroy(&mut self) {}

    /// Name used in log lines.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A filter on the response path.
pub trait StreamEncoderFilter: Send {
    /// Informational `100 Continue` headers. Only `Continue` and
    /// `StopIteration` are meaningful here.
    fn encode_100_continue_headers(
        &mut self,
        _callbacks: &mut EncoderFilterCallbacks<'_>,
    ) -> FilterHeadersStatus {
        FilterHeadersStatus::Continue
    }

    fn encode_headers(
        &mut self,
        callbacks: &mut EncoderFilterCallbacks<'_>,
        end_stream: bool,
    ) -> FilterHeadersStatus;

    fn encode_data(
        &mut self,
        _data: &mut BytesMut,
        _end_stream: bool,
        _callbacks: &mut EncoderFilterCallbacks<'_>,
    ) -> FilterDataStatus {
        FilterDataStatus::Continue
    }

    fn encode_trailers(&mut self, _callbacks: &mut EncoderFilterCallbacks<'_>) -> FilterTrailersStatus {
        FilterTrailersStatus::Continue
    }

    fn encode_metadata(
        &mut self,
        _metadata: &mut MetadataMap,
        _callbacks: &mut EncoderFilterCallbacks<'_>,
    ) -> FilterMetadataStatus {
        FilterMetadataStatus::Continue
    }

    /// The last response frame was delivered to this filter. Called once.
    fn encode_complete(&mut self, _callbacks: &mut EncoderFilterCallbacks<'_>) {}

    fn on_destroy(&mut self) {}

    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Observer of downstream backpressure, typically the upstream request
/// path. Paused while at least one high watermark is outstanding.
pub trait DownstreamWatermarkCallbacks: Send {
    fn on_above_write_buffer_high_watermark(&mut self);
    fn on_below_write_buffer_low_watermark(&mut self);
}
