//! The wire-facing collaborator of a stream.

use std::sync::Arc;

use bytes::Bytes;

use crate::buffer::WatermarkEvent;
use crate::http::{MetadataMap, RequestHeaderMap, ResponseHeaderMap, TrailerMap};
use crate::routing::Route;

use super::info::StreamInfo;
use super::Direction;

/// Everything the filter chain needs from the codec/connection layer.
///
/// Frames that survive the decoder chain are handed to the `decode_filtered_*`
/// methods (towards upstream); frames that survive the encoder chain are
/// handed to the `encode_filtered_*` methods (towards the client).
pub trait StreamCallbacks: Send {
    fn encode_filtered_100_continue_headers(&mut self, headers: &ResponseHeaderMap);
    fn encode_filtered_headers(&mut self, headers: &ResponseHeaderMap, end_stream: bool);
    fn encode_filtered_data(&mut self, data: Bytes, end_stream: bool);
    fn encode_filtered_trailers(&mut self, trailers: &TrailerMap);
    fn encode_filtered_metadata(&mut self, metadata: Vec<MetadataMap>);

    fn decode_filtered_headers(&mut self, _headers: &RequestHeaderMap, _end_stream: bool) {}
    fn decode_filtered_data(&mut self, _data: Bytes, _end_stream: bool) {}
    fn decode_filtered_trailers(&mut self, _trailers: &TrailerMap) {}
    fn decode_filtered_metadata(&mut self, _metadata: MetadataMap) {}

    /// Select a route for the request. Called lazily and cached by the stream.
    fn evaluate_route(&mut self, _headers: &RequestHeaderMap, _info: &StreamInfo) -> Option<Arc<Route>> {
        None
    }

    /// The stream switched to an upgrade filter chain.
    fn on_upgrade(&mut self) {}

    /// A filter asked for the stream to be reset.
    fn on_local_reset(&mut self) {}

    /// Backpressure for a direction was asserted or released.
    fn notify_watermark(&mut self, _direction: Direction, _event: WatermarkEvent) {}

    /// The buffered request body exceeded the limit without streaming.
    fn request_too_large(&mut self) {}

    /// The buffered response body exceeded the limit without streaming.
    fn response_data_too_large(&mut self) {}

    fn on_idle_timeout(&mut self) {}
    fn on_request_timeout(&mut self) {}
    fn on_stream_max_duration_reached(&mut self) {}

    /// The response is complete on the wire, or the stream should be closed.
    fn end_stream(&mut self) {}

    /// Start a new stream with `headers`. Returns the headers back if the
    /// layer cannot do so.
    fn new_stream(&mut self, headers: RequestHeaderMap) -> Result<(), RequestHeaderMap> {
        Err(headers)
    }
}
