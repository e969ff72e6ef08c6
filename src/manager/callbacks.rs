//! The handle a filter gets for the length of one callback.
//!
//! # Design Decisions
//! - The handle borrows the whole manager plus the calling filter's index,
//!   so every operation knows "who is asking" without back-pointers
//! - Operations that would re-enter the caller's own dispatch are rejected
//!   by the call-state guard, not by the type system
//! - To resume later from outside the callback, take a
//!   [`ContinuationHandle`](crate::driver::ContinuationHandle)

use std::sync::Arc;

use bytes::BytesMut;
use http::StatusCode;

use crate::cluster::ClusterInfo;
use crate::driver::ContinuationHandle;
use crate::filter::DownstreamWatermarkCallbacks;
use crate::http::{MetadataMap, RequestHeaderMap, ResponseHeaderMap, TrailerMap};
use crate::routing::Route;
use crate::stream::{Direction, StreamId, StreamInfo};

use super::{FilterManager, WatermarkObserverId};

/// Stream access for a decoder filter.
pub struct DecoderFilterCallbacks<'a> {
    manager: &'a mut FilterManager,
    index: usize,
}

impl<'a> DecoderFilterCallbacks<'a> {
    pub(super) fn new(manager: &'a mut FilterManager, index: usize) -> Self {
        Self { manager, index }
    }

    /// Position of the calling filter in the decoder chain.
    pub fn filter_index(&self) -> usize {
        self.index
    }

    pub fn stream_id(&self) -> StreamId {
        self.manager.stream_id
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.manager.stream_info
    }

    pub fn stream_info_mut(&mut self) -> &mut StreamInfo {
        &mut self.manager.stream_info
    }

    pub fn request_headers(&self) -> Option<&RequestHeaderMap> {
        self.manager.request_headers.as_ref()
    }

    pub fn request_headers_mut(&mut self) -> Option<&mut RequestHeaderMap> {
        self.manager.request_headers.as_mut()
    }

    pub fn request_trailers(&self) -> Option<&TrailerMap> {
        self.manager.request_trailers.as_ref()
    }

    pub fn request_trailers_mut(&mut self) -> Option<&mut TrailerMap> {
        self.manager.request_trailers.as_mut()
    }

    /// Add body bytes on behalf of this filter.
    ///
    /// During a headers or data callback the bytes join the stream buffer
    /// and travel with the current frame. During a trailers callback they
    /// are dispatched to later filters right away.
    pub fn add_decoded_data(&mut self, data: BytesMut, streaming: bool) {
        self.manager.add_decoded_data(self.index, data, streaming);
    }

    /// Dispatch body bytes to the filters after this one, outside any frame
    /// callback. Held headers are released first.
    pub fn inject_decoded_data_to_filter_chain(&mut self, data: BytesMut, end_stream: bool) {
        self.manager.inject_decoded_data(self.index, data, end_stream);
    }

    /// Create request trailers. Only legal while handling the last data
    /// frame, and only once.
    pub fn add_decoded_trailers(&mut self) -> &mut TrailerMap {
        self.manager.add_decoded_trailers()
    }

    pub fn add_decoded_metadata(&mut self, metadata: MetadataMap) {
        self.manager.add_decoded_metadata(self.index, metadata);
    }

    /// Resume iteration after this filter stopped.
    pub fn continue_decoding(&mut self) {
        self.manager.continue_decoding(self.index);
    }

    /// The buffered request body, if any.
    pub fn decoding_buffer(&self) -> Option<&BytesMut> {
        self.manager.buffered_request_data.as_ref().map(|buffer| buffer.bytes())
    }

    /// Edit the buffered request body. Only the filter that most recently
    /// received request data may do this.
    pub fn modify_decoding_buffer(&mut self, modify: impl FnOnce(&mut BytesMut)) {
        self.manager.modify_decoding_buffer(self.index, modify);
    }

    pub fn buffer_limit(&self) -> u32 {
        self.manager.buffer_limit
    }

    pub fn set_buffer_limit(&mut self, limit: u32) {
        self.manager.set_buffer_limit(limit);
    }

    pub fn encode_100_continue_headers(&mut self, headers: ResponseHeaderMap) {
        self.manager.encode_100_continue_headers(headers);
    }

    /// Start a response from this filter. It runs through every encoder
    /// filter.
    pub fn encode_headers(&mut self, headers: ResponseHeaderMap, end_stream: bool) {
        self.manager.encode_headers(headers, end_stream);
    }

    pub fn encode_data(&mut self, data: BytesMut, end_stream: bool) {
        self.manager.encode_data(data, end_stream);
    }

    pub fn encode_trailers(&mut self, trailers: TrailerMap) {
        self.manager.encode_trailers(trailers);
    }

    pub fn encode_metadata(&mut self, metadata: MetadataMap) {
        self.manager.encode_metadata(metadata);
    }

    pub fn send_local_reply(&mut self, code: StatusCode, body: &str, details: &'static str) {
        self.manager.send_local_reply(code, body, details);
    }

    pub fn reset_stream(&mut self) {
        self.manager.reset_stream();
    }

    pub fn route(&mut self) -> Option<Arc<Route>> {
        self.manager.route()
    }

    pub fn cluster_info(&mut self) -> Option<Arc<ClusterInfo>> {
        self.manager.cluster_info()
    }

    pub fn tracing_tags(&self) -> &[(String, String)] {
        self.manager.tracing_tags()
    }

    pub fn clear_route_cache(&mut self) {
        self.manager.clear_route_cache();
    }

    pub fn add_downstream_watermark_callbacks(
        &mut self,
        observer: Box<dyn DownstreamWatermarkCallbacks>,
    ) -> WatermarkObserverId {
        self.manager.add_downstream_watermark_callbacks(observer)
    }

    pub fn remove_downstream_watermark_callbacks(
        &mut self,
        id: WatermarkObserverId,
    ) -> Option<Box<dyn DownstreamWatermarkCallbacks>> {
        self.manager.remove_downstream_watermark_callbacks(id)
    }

    /// This filter cannot take more request data for now. Reading from the
    /// client pauses until the matching low watermark call.
    pub fn on_decoder_filter_above_write_buffer_high_watermark(&mut self) {
        self.manager.decoder_above_high_watermark();
    }

    pub fn on_decoder_filter_below_write_buffer_low_watermark(&mut self) {
        self.manager.decoder_below_low_watermark();
    }

    /// Hand the request headers to a brand new stream. Only possible once
    /// the request is complete and carried no body. Returns whether the
    /// hand-off happened.
    pub fn recreate_stream(&mut self) -> bool {
        self.manager.recreate_stream()
    }

    /// A handle that resumes this filter from another task. `None` when the
    /// stream is not run by a [`StreamDriver`](crate::driver::StreamDriver).
    pub fn continuation(&self) -> Option<ContinuationHandle> {
        self.manager
            .events
            .as_ref()
            .and_then(|events| events.upgrade())
            .map(|events| ContinuationHandle::new(events, Direction::Decode, self.index))
    }
}

/// Stream access for an encoder filter.
pub struct EncoderFilterCallbacks<'a> {
    manager: &'a mut FilterManager,
    index: usize,
}

impl<'a> EncoderFilterCallbacks<'a> {
    pub(super) fn new(manager: &'a mut FilterManager, index: usize) -> Self {
        Self { manager, index }
    }

    pub fn filter_index(&self) -> usize {
        self.index
    }

    pub fn stream_id(&self) -> StreamId {
        self.manager.stream_id
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.manager.stream_info
    }

    pub fn stream_info_mut(&mut self) -> &mut StreamInfo {
        &mut self.manager.stream_info
    }

    pub fn request_headers(&self) -> Option<&RequestHeaderMap> {
        self.manager.request_headers.as_ref()
    }

    pub fn informational_headers_mut(&mut self) -> Option<&mut ResponseHeaderMap> {
        self.manager.informational_headers.as_mut()
    }

    pub fn response_headers(&self) -> Option<&ResponseHeaderMap> {
        self.manager.response_headers.as_ref()
    }

    pub fn response_headers_mut(&mut self) -> Option<&mut ResponseHeaderMap> {
        self.manager.response_headers.as_mut()
    }

    pub fn response_trailers(&self) -> Option<&TrailerMap> {
        self.manager.response_trailers.as_ref()
    }

    pub fn response_trailers_mut(&mut self) -> Option<&mut TrailerMap> {
        self.manager.response_trailers.as_mut()
    }

    pub fn add_encoded_data(&mut self, data: BytesMut, streaming: bool) {
        self.manager.add_encoded_data(self.index, data, streaming);
    }

    pub fn inject_encoded_data_to_filter_chain(&mut self, data: BytesMut, end_stream: bool) {
        self.manager.inject_encoded_data(self.index, data, end_stream);
    }

    pub fn add_encoded_trailers(&mut self) -> &mut TrailerMap {
        self.manager.add_encoded_trailers()
    }

    pub fn add_encoded_metadata(&mut self, metadata: MetadataMap) {
        self.manager.add_encoded_metadata(self.index, metadata);
    }

    pub fn continue_encoding(&mut self) {
        self.manager.continue_encoding(self.index);
    }

    pub fn encoding_buffer(&self) -> Option<&BytesMut> {
        self.manager.buffered_response_data.as_ref().map(|buffer| buffer.bytes())
    }

    pub fn modify_encoding_buffer(&mut self, modify: impl FnOnce(&mut BytesMut)) {
        self.manager.modify_encoding_buffer(self.index, modify);
    }

    pub fn buffer_limit(&self) -> u32 {
        self.manager.buffer_limit
    }

    pub fn set_buffer_limit(&mut self, limit: u32) {
        self.manager.set_buffer_limit(limit);
    }

    pub fn reset_stream(&mut self) {
        self.manager.reset_stream();
    }

    pub fn route(&mut self) -> Option<Arc<Route>> {
        self.manager.route()
    }

    pub fn cluster_info(&mut self) -> Option<Arc<ClusterInfo>> {
        self.manager.cluster_info()
    }

    pub fn tracing_tags(&self) -> &[(String, String)] {
        self.manager.tracing_tags()
    }

    pub fn clear_route_cache(&mut self) {
        self.manager.clear_route_cache();
    }

    /// This filter cannot take more response data for now. Upstream
    /// observers pause until the matching low watermark call.
    pub fn on_encoder_filter_above_write_buffer_high_watermark(&mut self) {
        tracing::debug!(stream_id = %self.manager.stream_id, "disabling upstream stream due to filter callbacks");
        self.manager.call_high_watermark_callbacks();
    }

    pub fn on_encoder_filter_below_write_buffer_low_watermark(&mut self) {
        tracing::debug!(stream_id = %self.manager.stream_id, "enabling upstream stream due to filter callbacks");
        self.manager.call_low_watermark_callbacks();
    }

    pub fn continuation(&self) -> Option<ContinuationHandle> {
        self.manager
            .events
            .as_ref()
            .and_then(|events| events.upgrade())
            .map(|events| ContinuationHandle::new(events, Direction::Encode, self.index))
    }
}
