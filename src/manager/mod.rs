//! Per-stream filter chain execution.
//!
//! # Responsibilities
//! - Walk request frames through decoder filters and response frames
//!   through encoder filters, in configured order
//! - Suspend and resume iteration on behalf of filters, replaying held
//!   frames exactly once each
//! - Own the per-direction body buffers and turn watermark crossings into
//!   backpressure or local replies
//! - Cache the stream's route and cluster
//! - Synthesize local replies and handle stream timeouts
//!
//! # Data Flow
//! ```text
//! codec ──decode_*──▶ decoder.rs ──▶ filter 0..n ──▶ StreamCallbacks::decode_filtered_*
//!                                        │
//!                       callbacks.rs (add/inject/continue/encode_*)
//!                                        │
//! upstream ──encode_*──▶ encoder.rs ──▶ filter 0..n ──▶ StreamCallbacks::encode_filtered_*
//! ```
//!
//! # Design Decisions
//! - Filters are addressed by index into owned lists; "current position"
//!   is an index, never an iterator
//! - A filter's handle is lifted out of its slot while it runs, so the
//!   callbacks handle can borrow the whole manager; finding the slot empty
//!   means a filter re-entered itself
//! - Contract violations by filters are fatal: logged, then panic
//! - The manager is driven by exactly one execution context at a time and
//!   holds no locks

mod active_filter;
pub mod callbacks;
mod decoder;
mod encoder;
pub mod state;

pub use callbacks::{DecoderFilterCallbacks, EncoderFilterCallbacks};
pub use state::{
    record_latest_data_filter, FilterCall, FilterCallState, FilterIterationStartState,
    IterationState, StreamState,
};

use std::sync::Arc;

use bytes::BytesMut;
use http::StatusCode;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::buffer::{WatermarkBuffer, WatermarkEvent};
use crate::cluster::{ClusterInfo, ClusterLookup};
use crate::config::StreamConfig;
use crate::driver::StreamEvent;
use crate::filter::{
    DownstreamWatermarkCallbacks, FilterChainBuilder, FilterChainFactory, StreamDecoderFilter,
    StreamEncoderFilter,
};
use crate::http::{LocalReply, MetadataMap, RequestHeaderMap, ResponseHeaderMap, TrailerMap};
use crate::observability::metrics;
use crate::routing::Route;
use crate::stream::{Direction, ResponseFlag, StreamCallbacks, StreamId, StreamInfo};

use active_filter::{ActiveFilter, DataFrame};

/// Recoverable failures of chain construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterChainError {
    /// The request asked for an upgrade the factory or route refused. The
    /// default chain was built instead.
    #[error("upgrade to '{protocol}' rejected")]
    UpgradeRejected { protocol: String },
}

/// Outcome of [`FilterManager::create_filter_chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterChainCreated {
    Created,
    Upgraded,
    AlreadyCreated,
}

/// Handle for removing a downstream watermark observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatermarkObserverId(u64);

#[derive(Debug, Default)]
struct CachedRoute {
    route: Option<Arc<Route>>,
    cluster: Option<Arc<ClusterInfo>>,
    tracing_tags: Vec<(String, String)>,
}

#[derive(Default)]
struct WatermarkState {
    decoder_high_count: u32,
    encoder_high_count: u32,
    observers: Vec<(WatermarkObserverId, Box<dyn DownstreamWatermarkCallbacks>)>,
    next_observer_id: u64,
}

/// Drives the decoder and encoder filter chains of one HTTP stream.
pub struct FilterManager {
    stream_id: StreamId,
    callbacks: Box<dyn StreamCallbacks>,
    factory: Arc<dyn FilterChainFactory>,
    clusters: Option<Arc<dyn ClusterLookup>>,
    decoder_filters: Vec<ActiveFilter<dyn StreamDecoderFilter>>,
    encoder_filters: Vec<ActiveFilter<dyn StreamEncoderFilter>>,
    state: StreamState,
    request_headers: Option<RequestHeaderMap>,
    request_trailers: Option<TrailerMap>,
    informational_headers: Option<ResponseHeaderMap>,
    response_headers: Option<ResponseHeaderMap>,
    response_trailers: Option<TrailerMap>,
    buffered_request_data: Option<WatermarkBuffer>,
    buffered_response_data: Option<WatermarkBuffer>,
    /// Encoder filter whose stop created the response buffer.
    response_buffer_owner: Option<usize>,
    buffer_limit: u32,
    proxy_100_continue: bool,
    /// Metadata added by a filter during a callback, dispatched once the
    /// callback returns.
    staged_request_metadata: Vec<MetadataMap>,
    staged_response_metadata: Vec<MetadataMap>,
    /// Metadata that finished its chain before that direction's headers
    /// reached the wire.
    pending_decoded_metadata: Vec<MetadataMap>,
    pending_encoded_metadata: Vec<MetadataMap>,
    cached_route: Option<CachedRoute>,
    watermarks: WatermarkState,
    stream_info: StreamInfo,
    events: Option<mpsc::WeakUnboundedSender<StreamEvent>>,
}

impl FilterManager {
    pub fn new(
        callbacks: Box<dyn StreamCallbacks>,
        factory: Arc<dyn FilterChainFactory>,
        config: &StreamConfig,
    ) -> Self {
        let stream_id = StreamId::new();
        Self {
            stream_id,
            callbacks,
            factory,
            clusters: None,
            decoder_filters: Vec::new(),
            encoder_filters: Vec::new(),
            state: StreamState::default(),
            request_headers: None,
            request_trailers: None,
            informational_headers: None,
            response_headers: None,
            response_trailers: None,
            buffered_request_data: None,
            buffered_response_data: None,
            response_buffer_owner: None,
            buffer_limit: config.buffer_limit_bytes,
            proxy_100_continue: config.proxy_100_continue,
            staged_request_metadata: Vec::new(),
            staged_response_metadata: Vec::new(),
            pending_decoded_metadata: Vec::new(),
            pending_encoded_metadata: Vec::new(),
            cached_route: None,
            watermarks: WatermarkState::default(),
            stream_info: StreamInfo::new(stream_id),
            events: None,
        }
    }

    /// Resolve clusters for cached routes through `clusters`.
    pub fn with_cluster_lookup(mut self, clusters: Arc<dyn ClusterLookup>) -> Self {
        self.clusters = Some(clusters);
        self
    }

    pub(crate) fn set_event_sender(&mut self, events: mpsc::WeakUnboundedSender<StreamEvent>) {
        self.events = Some(events);
    }

    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn request_headers(&self) -> Option<&RequestHeaderMap> {
        self.request_headers.as_ref()
    }

    pub fn request_trailers(&self) -> Option<&TrailerMap> {
        self.request_trailers.as_ref()
    }

    pub fn response_headers(&self) -> Option<&ResponseHeaderMap> {
        self.response_headers.as_ref()
    }

    pub fn response_trailers(&self) -> Option<&TrailerMap> {
        self.response_trailers.as_ref()
    }

    pub fn decoder_filter_count(&self) -> usize {
        self.decoder_filters.len()
    }

    pub fn encoder_filter_count(&self) -> usize {
        self.encoder_filters.len()
    }

    /// Iteration state of a decoder filter, for inspection.
    pub fn decoder_iteration_state(&self, index: usize) -> Option<IterationState> {
        self.decoder_filters.get(index).map(|f| f.iteration_state)
    }

    pub fn encoder_iteration_state(&self, index: usize) -> Option<IterationState> {
        self.encoder_filters.get(index).map(|f| f.iteration_state)
    }

    pub fn buffered_request_len(&self) -> usize {
        self.buffered_request_data.as_ref().map_or(0, WatermarkBuffer::len)
    }

    pub fn buffered_response_len(&self) -> usize {
        self.buffered_response_data.as_ref().map_or(0, WatermarkBuffer::len)
    }

    /// Outstanding high watermarks for a direction.
    pub fn high_watermark_count(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Decode => self.watermarks.decoder_high_count,
            Direction::Encode => self.watermarks.encoder_high_count,
        }
    }

    /// Nothing more will happen on this stream.
    pub fn is_finished(&self) -> bool {
        self.state.destroyed || self.state.reset || self.state.recreated || self.state.encode_complete
    }

    /// The request timer no longer applies: the request is complete or a
    /// response has started.
    pub fn request_timer_disarmed(&self) -> bool {
        self.state.remote_complete || self.response_headers.is_some()
    }

    // --- codec entry points -------------------------------------------------

    /// Request headers from the codec. Builds the filter chain on first use.
    pub fn decode_headers(&mut self, headers: RequestHeaderMap, end_stream: bool) {
        if self.dropping_frames("request headers") {
            return;
        }
        if self.request_headers.is_some() {
            self.contract_violation("request headers delivered twice");
        }
        self.maybe_end_decode(end_stream);
        self.state.is_head_request = headers.is_head_request();
        self.state.is_grpc_request = headers.is_grpc();
        tracing::debug!(
            stream_id = %self.stream_id,
            method = %headers.method(),
            path = %headers.path(),
            end_stream,
            "request headers"
        );
        self.request_headers = Some(headers);

        self.refresh_cached_route();
        if let Err(err) = self.create_filter_chain() {
            tracing::debug!(stream_id = %self.stream_id, error = %err, "sending upgrade failure reply");
            self.stream_info.set_response_flag(ResponseFlag::UpgradeFailed);
            self.send_local_reply(StatusCode::FORBIDDEN, "", "upgrade_failed");
            return;
        }

        self.decode_headers_internal(None, end_stream);
    }

    pub fn decode_data(&mut self, data: BytesMut, end_stream: bool) {
        if self.dropping_frames("request data") {
            return;
        }
        self.maybe_end_decode(end_stream);
        self.stream_info.bytes_received += data.len() as u64;
        self.decode_data_internal(
            None,
            DataFrame::Fresh(data),
            end_stream,
            FilterIterationStartState::CanStartFromCurrent,
        );
    }

    pub fn decode_trailers(&mut self, trailers: TrailerMap) {
        if self.dropping_frames("request trailers") {
            return;
        }
        self.maybe_end_decode(true);
        self.request_trailers = Some(trailers);
        self.decode_trailers_internal(None);
    }

    pub fn decode_metadata(&mut self, metadata: MetadataMap) {
        if self.dropping_frames("request metadata") {
            return;
        }
        self.decode_metadata_internal(None, metadata, FilterIterationStartState::CanStartFromCurrent);
    }

    // --- response entry points ------------------------------------------------

    /// Informational headers from upstream or a decoder filter. Swallowed
    /// unless 100-continue proxying is enabled.
    pub fn encode_100_continue_headers(&mut self, headers: ResponseHeaderMap) {
        if self.dropping_response_frames("100-continue headers") {
            return;
        }
        if !self.proxy_100_continue {
            tracing::debug!(stream_id = %self.stream_id, "100-continue proxying disabled, dropping");
            return;
        }
        if self.state.has_continue_headers || self.response_headers.is_some() {
            tracing::debug!(stream_id = %self.stream_id, "duplicate 100-continue dropped");
            return;
        }
        self.informational_headers = Some(headers);
        self.encode_100_continue_internal(None);
    }

    pub fn encode_headers(&mut self, headers: ResponseHeaderMap, end_stream: bool) {
        if self.dropping_response_frames("response headers") {
            return;
        }
        if self.response_headers.is_some() {
            tracing::debug!(stream_id = %self.stream_id, "response already started, dropping headers");
            return;
        }
        self.response_headers = Some(headers);
        self.supersede_held_100_continue();
        self.encode_headers_internal(None, end_stream);
    }

    pub fn encode_data(&mut self, data: BytesMut, end_stream: bool) {
        if self.dropping_response_frames("response data") {
            return;
        }
        self.encode_data_internal(
            None,
            DataFrame::Fresh(data),
            end_stream,
            FilterIterationStartState::CanStartFromCurrent,
        );
    }

    pub fn encode_trailers(&mut self, trailers: TrailerMap) {
        if self.dropping_response_frames("response trailers") {
            return;
        }
        self.response_trailers = Some(trailers);
        self.encode_trailers_internal(None);
    }

    pub fn encode_metadata(&mut self, metadata: MetadataMap) {
        if self.dropping_frames("response metadata") {
            return;
        }
        self.encode_metadata_internal(None, metadata, FilterIterationStartState::CanStartFromCurrent);
    }

    fn dropping_frames(&self, what: &'static str) -> bool {
        let dropping = self.state.destroyed || self.state.reset || self.state.recreated;
        if dropping {
            tracing::trace!(stream_id = %self.stream_id, frame = what, "stream gone, dropping frame");
        }
        dropping
    }

    fn dropping_response_frames(&self, what: &'static str) -> bool {
        if self.dropping_frames(what) {
            return true;
        }
        if self.state.local_complete || self.state.encode_complete {
            tracing::debug!(stream_id = %self.stream_id, frame = what, "response already complete, dropping frame");
            return true;
        }
        false
    }

    // --- chain construction ---------------------------------------------------

    /// Build the stream's filter chain. Idempotent.
    ///
    /// An upgrade request is offered to the factory's upgrade chain first,
    /// with the cached route's upgrade map. On rejection the default chain
    /// is built and `UpgradeRejected` is returned; the caller replies.
    pub fn create_filter_chain(&mut self) -> Result<FilterChainCreated, FilterChainError> {
        if self.state.created_filter_chain {
            return Ok(FilterChainCreated::AlreadyCreated);
        }
        self.state.created_filter_chain = true;

        let upgrade = self
            .request_headers
            .as_ref()
            .and_then(RequestHeaderMap::upgrade)
            .map(str::to_owned);

        let mut builder = FilterChainBuilder::new();
        let mut rejected = None;
        if let Some(protocol) = upgrade {
            // Only a route that is already cached is consulted; a local reply
            // may build the chain before routing happened.
            let route = self.cached_route.as_ref().and_then(|c| c.route.clone());
            let upgrade_map = route.as_deref().map(Route::upgrade_map);
            if self
                .factory
                .create_upgrade_filter_chain(&protocol, upgrade_map, &mut builder)
            {
                self.install_filters(builder);
                self.state.successful_upgrade = true;
                metrics::record_upgrade(true);
                tracing::debug!(stream_id = %self.stream_id, protocol = %protocol, "upgrade accepted");
                self.callbacks.on_upgrade();
                return Ok(FilterChainCreated::Upgraded);
            }
            metrics::record_upgrade(false);
            builder = FilterChainBuilder::new();
            rejected = Some(protocol);
        }

        self.factory.create_filter_chain(&mut builder);
        self.install_filters(builder);
        match rejected {
            Some(protocol) => Err(FilterChainError::UpgradeRejected { protocol }),
            None => Ok(FilterChainCreated::Created),
        }
    }

    fn install_filters(&mut self, builder: FilterChainBuilder) {
        let (decoders, encoders) = builder.into_parts();
        self.decoder_filters = decoders
            .into_iter()
            .map(|filter| {
                let name = filter.name();
                ActiveFilter::new(filter, name)
            })
            .collect();
        self.encoder_filters = encoders
            .into_iter()
            .map(|filter| {
                let name = filter.name();
                ActiveFilter::new(filter, name)
            })
            .collect();
        tracing::debug!(
            stream_id = %self.stream_id,
            decoders = self.decoder_filters.len(),
            encoders = self.encoder_filters.len(),
            "filter chain created"
        );
    }

    // --- filter invocation ----------------------------------------------------

    /// Run `call` against decoder filter `index` with a callbacks handle
    /// bound to that filter.
    fn with_decoder_filter<R>(
        &mut self,
        index: usize,
        call: impl FnOnce(&mut Box<dyn StreamDecoderFilter>, &mut DecoderFilterCallbacks<'_>) -> R,
    ) -> R {
        let Some(mut handle) = self.decoder_filters[index].handle.take() else {
            self.contract_violation("decoder filter re-entered from its own callback");
        };
        let result = {
            let mut callbacks = DecoderFilterCallbacks::new(self, index);
            call(&mut handle, &mut callbacks)
        };
        self.decoder_filters[index].handle = Some(handle);
        result
    }

    fn with_encoder_filter<R>(
        &mut self,
        index: usize,
        call: impl FnOnce(&mut Box<dyn StreamEncoderFilter>, &mut EncoderFilterCallbacks<'_>) -> R,
    ) -> R {
        let Some(mut handle) = self.encoder_filters[index].handle.take() else {
            self.contract_violation("encoder filter re-entered from its own callback");
        };
        let result = {
            let mut callbacks = EncoderFilterCallbacks::new(self, index);
            call(&mut handle, &mut callbacks)
        };
        self.encoder_filters[index].handle = Some(handle);
        result
    }

    fn enter_call(&mut self, call: FilterCall) {
        if !self.state.filter_call_state.enter(call) {
            self.contract_violation(&format!("re-entrant {} dispatch", call.as_str()));
        }
    }

    fn exit_call(&mut self, call: FilterCall) {
        self.state.filter_call_state.exit(call);
    }

    /// A filter broke the iteration contract. Not recoverable.
    #[track_caller]
    fn contract_violation(&self, rule: &str) -> ! {
        tracing::error!(stream_id = %self.stream_id, rule, "filter contract violation");
        panic!("filter contract violation on {}: {}", self.stream_id, rule);
    }

    /// A reply, reset or hand-off ended request iteration early.
    fn decoding_aborted(&self) -> bool {
        self.state.reset || self.state.destroyed || self.state.recreated || self.state.local_complete
    }

    fn encoding_aborted(&self) -> bool {
        self.state.reset || self.state.destroyed || self.state.encode_complete
    }

    fn maybe_end_decode(&mut self, end_stream: bool) {
        if self.state.remote_complete {
            self.contract_violation("request frame received after the request completed");
        }
        self.state.remote_complete = end_stream;
        if end_stream {
            self.stream_info.on_last_downstream_rx_byte_received();
            tracing::debug!(stream_id = %self.stream_id, "request end stream");
        }
    }

    fn maybe_end_encode(&mut self, end_stream: bool) {
        if end_stream && !self.state.encode_complete {
            self.state.encode_complete = true;
            tracing::debug!(stream_id = %self.stream_id, "response end stream");
            self.callbacks.end_stream();
        }
    }

    // --- wire emission ----------------------------------------------------------

    fn emit_request_headers(&mut self, end_stream: bool) {
        if let Some(headers) = self.request_headers.as_ref() {
            self.callbacks.decode_filtered_headers(headers, end_stream);
        }
        self.state.request_headers_emitted = true;
        for metadata in std::mem::take(&mut self.pending_decoded_metadata) {
            self.callbacks.decode_filtered_metadata(metadata);
        }
    }

    fn emit_decoded_metadata(&mut self, metadata: MetadataMap) {
        if metadata.is_empty() {
            return;
        }
        if !self.state.request_headers_emitted {
            self.pending_decoded_metadata.push(metadata);
            return;
        }
        self.callbacks.decode_filtered_metadata(metadata);
    }

    fn emit_decoded_data(&mut self, frame: DataFrame, end_stream: bool) {
        match frame {
            DataFrame::Fresh(bytes) => self.callbacks.decode_filtered_data(bytes.freeze(), end_stream),
            DataFrame::Buffered(mut buffer) => {
                let (bytes, event) = buffer.drain_all();
                self.callbacks.decode_filtered_data(bytes, end_stream);
                if let Some(event) = event {
                    self.on_request_watermark(event);
                }
                self.restore_request_frame(DataFrame::Buffered(buffer));
            }
        }
    }

    fn emit_response_headers(&mut self, end_stream: bool) {
        if let Some(headers) = self.response_headers.as_ref() {
            self.callbacks.encode_filtered_headers(headers, end_stream);
        }
        self.state.response_headers_emitted = true;
        let pending = std::mem::take(&mut self.pending_encoded_metadata);
        if !pending.is_empty() {
            self.callbacks.encode_filtered_metadata(pending);
        }
        self.maybe_end_encode(end_stream);
    }

    fn emit_encoded_metadata(&mut self, metadata: MetadataMap) {
        if metadata.is_empty() {
            return;
        }
        if !self.state.response_headers_emitted {
            self.pending_encoded_metadata.push(metadata);
            return;
        }
        tracing::debug!(stream_id = %self.stream_id, %metadata, "encoding metadata via codec");
        self.callbacks.encode_filtered_metadata(vec![metadata]);
    }

    fn emit_encoded_data(&mut self, frame: DataFrame, end_stream: bool) {
        if self.state.encode_complete {
            tracing::trace!(stream_id = %self.stream_id, "response already ended, dropping data");
            self.restore_response_frame(frame);
            return;
        }
        match frame {
            DataFrame::Fresh(bytes) => self.callbacks.encode_filtered_data(bytes.freeze(), end_stream),
            DataFrame::Buffered(mut buffer) => {
                let (bytes, event) = buffer.drain_all();
                self.callbacks.encode_filtered_data(bytes, end_stream);
                if let Some(event) = event {
                    self.on_response_watermark(event);
                }
                self.restore_response_frame(DataFrame::Buffered(buffer));
            }
        }
        self.maybe_end_encode(end_stream);
    }

    // --- body buffers -----------------------------------------------------------

    /// Append a fresh frame to the request buffer, creating it if needed. A
    /// buffered frame is the buffer itself and only goes back to its slot.
    fn buffer_request_frame(&mut self, frame: DataFrame) {
        match frame {
            DataFrame::Buffered(_) => self.restore_request_frame(frame),
            DataFrame::Fresh(mut bytes) => {
                let limit = self.buffer_limit;
                let event = self
                    .buffered_request_data
                    .get_or_insert_with(|| WatermarkBuffer::new(limit))
                    .move_from(&mut bytes);
                if let Some(event) = event {
                    self.on_request_watermark(event);
                }
            }
        }
    }

    /// Put a lifted request buffer back. Data added while it was out goes
    /// behind it.
    fn restore_request_frame(&mut self, frame: DataFrame) {
        let DataFrame::Buffered(mut buffer) = frame else {
            return;
        };
        let events = match self.buffered_request_data.take() {
            Some(newer) => buffer.absorb(newer),
            None => buffer.check_watermarks().into_iter().collect(),
        };
        self.buffered_request_data = Some(buffer);
        for event in events {
            self.on_request_watermark(event);
        }
    }

    fn create_empty_request_buffer(&mut self) {
        if self.buffered_request_data.is_none() {
            self.buffered_request_data = Some(WatermarkBuffer::new(self.buffer_limit));
        }
    }

    fn buffer_response_frame(&mut self, owner: usize, frame: DataFrame) {
        match frame {
            DataFrame::Buffered(_) => self.restore_response_frame(frame),
            DataFrame::Fresh(mut bytes) => {
                if self.buffered_response_data.is_none() {
                    self.buffered_response_data = Some(WatermarkBuffer::new(self.buffer_limit));
                    self.response_buffer_owner = Some(owner);
                }
                let event = self
                    .buffered_response_data
                    .as_mut()
                    .and_then(|buffer| buffer.move_from(&mut bytes));
                if let Some(event) = event {
                    self.on_response_watermark(event);
                }
            }
        }
    }

    fn restore_response_frame(&mut self, frame: DataFrame) {
        let DataFrame::Buffered(mut buffer) = frame else {
            return;
        };
        let events = match self.buffered_response_data.take() {
            Some(newer) => buffer.absorb(newer),
            None => buffer.check_watermarks().into_iter().collect(),
        };
        self.buffered_response_data = Some(buffer);
        for event in events {
            self.on_response_watermark(event);
        }
    }

    fn create_empty_response_buffer(&mut self, owner: usize) {
        if self.buffered_response_data.is_none() {
            self.buffered_response_data = Some(WatermarkBuffer::new(self.buffer_limit));
            self.response_buffer_owner = Some(owner);
        }
    }

    /// Change the body buffer limit for both directions, including buffers
    /// that already exist.
    pub fn set_buffer_limit(&mut self, limit: u32) {
        tracing::debug!(stream_id = %self.stream_id, limit, "setting buffer limit");
        self.buffer_limit = limit;
        let request_event = self
            .buffered_request_data
            .as_mut()
            .and_then(|buffer| buffer.set_watermarks(limit));
        if let Some(event) = request_event {
            self.on_request_watermark(event);
        }
        let response_event = self
            .buffered_response_data
            .as_mut()
            .and_then(|buffer| buffer.set_watermarks(limit));
        if let Some(event) = response_event {
            self.on_response_watermark(event);
        }
    }

    pub fn buffer_limit(&self) -> u32 {
        self.buffer_limit
    }

    // --- watermarks -------------------------------------------------------------

    fn on_request_watermark(&mut self, event: WatermarkEvent) {
        match event {
            WatermarkEvent::AboveHighWatermark => {
                tracing::debug!(stream_id = %self.stream_id, "request data too large watermark exceeded");
                if self.state.decoder_filters_streaming {
                    self.decoder_above_high_watermark();
                } else {
                    self.callbacks.request_too_large();
                    self.stream_info
                        .set_response_flag(ResponseFlag::DownstreamRequestTooLarge);
                    self.send_local_reply(
                        StatusCode::PAYLOAD_TOO_LARGE,
                        "Payload Too Large",
                        "request_payload_too_large",
                    );
                }
            }
            WatermarkEvent::BelowLowWatermark => self.decoder_below_low_watermark(),
        }
    }

    fn decoder_above_high_watermark(&mut self) {
        self.watermarks.decoder_high_count += 1;
        tracing::debug!(stream_id = %self.stream_id, "read-disabling downstream stream due to filter callbacks");
        metrics::record_watermark(Direction::Decode, WatermarkEvent::AboveHighWatermark);
        self.callbacks
            .notify_watermark(Direction::Decode, WatermarkEvent::AboveHighWatermark);
    }

    fn decoder_below_low_watermark(&mut self) {
        if self.watermarks.decoder_high_count == 0 {
            tracing::warn!(stream_id = %self.stream_id, "request low watermark without a matching high watermark");
            return;
        }
        self.watermarks.decoder_high_count -= 1;
        tracing::debug!(stream_id = %self.stream_id, "read-enabling downstream stream due to filter callbacks");
        metrics::record_watermark(Direction::Decode, WatermarkEvent::BelowLowWatermark);
        self.callbacks
            .notify_watermark(Direction::Decode, WatermarkEvent::BelowLowWatermark);
    }

    fn on_response_watermark(&mut self, event: WatermarkEvent) {
        match event {
            WatermarkEvent::AboveHighWatermark => {
                if self.state.encoder_filters_streaming {
                    tracing::debug!(stream_id = %self.stream_id, "disabling upstream stream due to filter callbacks");
                    self.call_high_watermark_callbacks();
                    self.callbacks
                        .notify_watermark(Direction::Encode, WatermarkEvent::AboveHighWatermark);
                } else {
                    self.response_data_too_large();
                }
            }
            WatermarkEvent::BelowLowWatermark => {
                tracing::debug!(stream_id = %self.stream_id, "enabling upstream stream due to filter callbacks");
                if self.call_low_watermark_callbacks() {
                    self.callbacks
                        .notify_watermark(Direction::Encode, WatermarkEvent::BelowLowWatermark);
                }
            }
        }
    }

    fn response_data_too_large(&mut self) {
        self.callbacks.response_data_too_large();
        self.stream_info
            .set_response_flag(ResponseFlag::UpstreamResponseTooLarge);

        let owner = self.response_buffer_owner;
        let headers_continued = owner
            .and_then(|index| self.encoder_filters.get(index))
            .map_or(false, |filter| filter.headers_continued);
        if headers_continued || self.state.response_headers_emitted {
            tracing::debug!(
                stream_id = %self.stream_id,
                "resetting stream: response data too large and headers have already been sent"
            );
            self.reset_stream();
            return;
        }

        // Later crossings on this buffer must not come back here.
        self.state.encoder_filters_streaming = true;
        if let Some(filter) = owner.and_then(|index| self.encoder_filters.get_mut(index)) {
            filter.allow_iteration();
        }
        // A second set of headers must not run through the encoder filters,
        // so the reply goes straight to the wire.
        let reply = LocalReply::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error",
            "response_payload_too_large",
        );
        self.send_direct_local_reply(&reply);
    }

    fn call_high_watermark_callbacks(&mut self) {
        self.watermarks.encoder_high_count += 1;
        metrics::record_watermark(Direction::Encode, WatermarkEvent::AboveHighWatermark);
        for (_, observer) in self.watermarks.observers.iter_mut() {
            observer.on_above_write_buffer_high_watermark();
        }
    }

    /// Returns false if the count was already zero.
    fn call_low_watermark_callbacks(&mut self) -> bool {
        if self.watermarks.encoder_high_count == 0 {
            tracing::warn!(stream_id = %self.stream_id, "low watermark without a matching high watermark");
            return false;
        }
        self.watermarks.encoder_high_count -= 1;
        metrics::record_watermark(Direction::Encode, WatermarkEvent::BelowLowWatermark);
        for (_, observer) in self.watermarks.observers.iter_mut() {
            observer.on_below_write_buffer_low_watermark();
        }
        true
    }

    /// The downstream connection backed up. Pauses every observer.
    pub fn on_above_write_buffer_high_watermark(&mut self) {
        if self.state.destroyed {
            return;
        }
        tracing::debug!(stream_id = %self.stream_id, "downstream connection above high watermark");
        self.call_high_watermark_callbacks();
    }

    pub fn on_below_write_buffer_low_watermark(&mut self) {
        if self.state.destroyed {
            return;
        }
        tracing::debug!(stream_id = %self.stream_id, "downstream connection below low watermark");
        self.call_low_watermark_callbacks();
    }

    /// Register an observer of downstream backpressure. If backpressure is
    /// already asserted the observer is told immediately, once per
    /// outstanding high watermark.
    pub fn add_downstream_watermark_callbacks(
        &mut self,
        mut observer: Box<dyn DownstreamWatermarkCallbacks>,
    ) -> WatermarkObserverId {
        for _ in 0..self.watermarks.encoder_high_count {
            observer.on_above_write_buffer_high_watermark();
        }
        let id = WatermarkObserverId(self.watermarks.next_observer_id);
        self.watermarks.next_observer_id += 1;
        self.watermarks.observers.push((id, observer));
        id
    }

    pub fn remove_downstream_watermark_callbacks(
        &mut self,
        id: WatermarkObserverId,
    ) -> Option<Box<dyn DownstreamWatermarkCallbacks>> {
        let position = self
            .watermarks
            .observers
            .iter()
            .position(|(observer_id, _)| *observer_id == id)?;
        Some(self.watermarks.observers.remove(position).1)
    }

    // --- route cache --------------------------------------------------------------

    fn refresh_cached_route(&mut self) {
        let route = match self.request_headers.as_ref() {
            Some(headers) => self.callbacks.evaluate_route(headers, &self.stream_info),
            None => None,
        };
        self.stream_info.route_name = route.as_ref().map(|r| r.name().to_string());
        let cluster = match (route.as_ref(), self.clusters.as_ref()) {
            (Some(route), Some(clusters)) => clusters.get(route.cluster()),
            _ => None,
        };
        let tracing_tags = route
            .as_ref()
            .map(|r| r.tracing_tags().to_vec())
            .unwrap_or_default();
        tracing::debug!(
            stream_id = %self.stream_id,
            route = ?self.stream_info.route_name,
            cluster = ?cluster.as_ref().map(|c| c.name.as_str()),
            "route cache refreshed"
        );
        self.cached_route = Some(CachedRoute {
            route,
            cluster,
            tracing_tags,
        });
    }

    fn ensure_cached_route(&mut self) -> &CachedRoute {
        if self.cached_route.is_none() {
            self.refresh_cached_route();
        }
        self.cached_route.get_or_insert_with(CachedRoute::default)
    }

    /// The stream's route, evaluated on first use and cached.
    pub fn route(&mut self) -> Option<Arc<Route>> {
        self.ensure_cached_route().route.clone()
    }

    pub fn cluster_info(&mut self) -> Option<Arc<ClusterInfo>> {
        self.ensure_cached_route().cluster.clone()
    }

    /// Tracing tags derived from the cached route. Empty while no route is
    /// cached.
    pub fn tracing_tags(&self) -> &[(String, String)] {
        self.cached_route
            .as_ref()
            .map(|cached| cached.tracing_tags.as_slice())
            .unwrap_or(&[])
    }

    /// Forget the cached route, cluster and tracing tags. The next lookup
    /// re-evaluates.
    pub fn clear_route_cache(&mut self) {
        tracing::debug!(stream_id = %self.stream_id, "route cache cleared");
        self.cached_route = None;
    }

    // --- local replies, resets, timeouts ---------------------------------------

    /// Reply to the client from the stream itself.
    ///
    /// Before any response started, the reply runs through the encoder
    /// filters like an upstream response. If a response started but its
    /// headers have not reached the wire, the reply replaces it directly on
    /// the wire. Once headers are on the wire, the stream is reset instead.
    pub fn send_local_reply(&mut self, code: StatusCode, body: &str, details: &'static str) {
        if self.state.destroyed || self.state.reset {
            return;
        }
        let reply = LocalReply::new(code, body, details);
        self.stream_info.set_response_code_details(details);

        if self.response_headers.is_none() {
            if let Err(err) = self.create_filter_chain() {
                tracing::debug!(stream_id = %self.stream_id, error = %err, "local reply on default chain");
            }
            let (headers, body) = reply.render(self.state.is_grpc_request, self.state.is_head_request);
            tracing::debug!(
                stream_id = %self.stream_id,
                status = headers.status().as_u16(),
                details,
                "sending local reply"
            );
            metrics::record_local_reply(code.as_u16());
            self.stream_info.response_code = Some(headers.status());
            self.response_headers = Some(headers);
            self.supersede_held_100_continue();
            self.encode_headers_internal(None, body.is_none());
            if let Some(body) = body {
                if !self.state.reset && !self.state.destroyed {
                    self.encode_data_internal(
                        None,
                        DataFrame::Fresh(BytesMut::from(&body[..])),
                        true,
                        FilterIterationStartState::AlwaysStartFromNext,
                    );
                }
            }
        } else if !self.state.response_headers_emitted {
            self.send_direct_local_reply(&reply);
        } else {
            tracing::debug!(
                stream_id = %self.stream_id,
                details,
                "response already started, resetting instead of local reply"
            );
            self.reset_stream();
        }
    }

    /// Write a local reply straight to the wire, bypassing encoder filters.
    fn send_direct_local_reply(&mut self, reply: &LocalReply) {
        let (headers, body) = reply.render(self.state.is_grpc_request, self.state.is_head_request);
        tracing::debug!(
            stream_id = %self.stream_id,
            status = headers.status().as_u16(),
            details = reply.details,
            "sending local reply directly"
        );
        metrics::record_local_reply(reply.code.as_u16());
        self.stream_info.set_response_code_details(reply.details);
        self.stream_info.response_code = Some(headers.status());
        self.state.local_complete = true;
        self.response_headers = Some(headers);
        self.emit_response_headers(body.is_none());
        if let Some(body) = body {
            self.callbacks.encode_filtered_data(body, true);
            self.maybe_end_encode(true);
        }
    }

    /// Reset the stream. Later frames in either direction are dropped.
    pub fn reset_stream(&mut self) {
        if self.state.reset || self.state.destroyed {
            return;
        }
        self.state.reset = true;
        self.stream_info.set_response_flag(ResponseFlag::LocalReset);
        metrics::record_reset();
        tracing::debug!(stream_id = %self.stream_id, "resetting stream");
        self.callbacks.on_local_reset();
    }

    pub fn on_idle_timeout(&mut self) {
        if self.is_finished() {
            return;
        }
        metrics::record_timeout("idle");
        self.callbacks.on_idle_timeout();
        if self.response_headers.is_some() {
            self.maybe_end_encode(true);
        } else {
            self.stream_info.set_response_flag(ResponseFlag::StreamIdleTimeout);
            self.send_local_reply(StatusCode::REQUEST_TIMEOUT, "stream timeout", "stream_idle_timeout");
        }
    }

    pub fn on_request_timeout(&mut self) {
        if self.is_finished() {
            return;
        }
        metrics::record_timeout("request");
        self.callbacks.on_request_timeout();
        self.stream_info.set_response_flag(ResponseFlag::RequestTimeout);
        self.send_local_reply(StatusCode::REQUEST_TIMEOUT, "request timeout", "request_overall_timeout");
    }

    pub fn on_stream_max_duration_reached(&mut self) {
        if self.is_finished() {
            return;
        }
        tracing::debug!(stream_id = %self.stream_id, "stream max duration time reached");
        metrics::record_timeout("max_duration");
        self.callbacks.on_stream_max_duration_reached();
        self.stream_info.set_response_flag(ResponseFlag::MaxDurationTimeout);
        if self.response_headers.is_some() {
            self.maybe_end_encode(true);
        } else {
            self.send_local_reply(
                StatusCode::REQUEST_TIMEOUT,
                "downstream duration timeout",
                "max_duration_timeout",
            );
        }
    }

    /// Tell every filter the stream is going away. Idempotent; all later
    /// frames are dropped.
    pub fn destroy(&mut self) {
        if self.state.destroyed {
            return;
        }
        self.state.destroyed = true;
        for filter in self.decoder_filters.iter_mut() {
            if let Some(handle) = filter.handle.as_mut() {
                handle.on_destroy();
            }
        }
        for filter in self.encoder_filters.iter_mut() {
            if let Some(handle) = filter.handle.as_mut() {
                handle.on_destroy();
            }
        }
        self.watermarks.observers.clear();
        tracing::debug!(stream_id = %self.stream_id, "stream destroyed");
    }
}

impl Drop for FilterManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for FilterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterManager")
            .field("stream_id", &self.stream_id)
            .field("decoder_filters", &self.decoder_filters.iter().map(|f| f.name).collect::<Vec<_>>())
            .field("encoder_filters", &self.encoder_filters.iter().map(|f| f.name).collect::<Vec<_>>())
            .field("state", &self.state)
            .finish()
    }
}
