//! Shared fixtures for filter chain tests.
//!
//! `Recorder` stands in for the codec: it records everything the chain
//! writes to the wire. `TestDecoder` / `TestEncoder` log every callback into
//! a shared `Log` and run an optional hook that decides the status.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use http::{Method, StatusCode};

use stream_filter_chain::buffer::WatermarkEvent;
use stream_filter_chain::config::StreamConfig;
use stream_filter_chain::filter::{
    DecoderFilterCallbacks, DownstreamWatermarkCallbacks, EncoderFilterCallbacks,
    FilterChainBuilder, FilterChainFactory, FilterDataStatus, FilterHeadersStatus,
    FilterMetadataStatus, FilterTrailersStatus, StreamDecoderFilter, StreamEncoderFilter,
};
use stream_filter_chain::http::{MetadataMap, RequestHeaderMap, ResponseHeaderMap, TrailerMap};
use stream_filter_chain::routing::Route;
use stream_filter_chain::stream::{Direction, StreamCallbacks, StreamInfo};
use stream_filter_chain::FilterManager;

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

pub fn count_entries(log: &Log, entry: &str) -> usize {
    log.lock().unwrap().iter().filter(|e| e.as_str() == entry).count()
}

/// What reached the wire, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Wire {
    RequestHeaders { end_stream: bool },
    RequestData { data: String, end_stream: bool },
    RequestTrailers,
    RequestMetadata(MetadataMap),
    Continue100,
    ResponseHeaders { status: u16, end_stream: bool },
    ResponseData { data: String, end_stream: bool },
    ResponseTrailers,
    ResponseMetadata(Vec<MetadataMap>),
    Upgrade,
    LocalReset,
    Watermark(Direction, WatermarkEvent),
    RequestTooLarge,
    ResponseTooLarge,
    IdleTimeout,
    RequestTimeout,
    MaxDuration,
    EndStream,
    NewStream,
}

impl Wire {
    pub fn is_request_frame(&self) -> bool {
        matches!(
            self,
            Wire::RequestHeaders { .. }
                | Wire::RequestData { .. }
                | Wire::RequestTrailers
                | Wire::RequestMetadata(_)
        )
    }

    pub fn is_response_frame(&self) -> bool {
        matches!(
            self,
            Wire::Continue100
                | Wire::ResponseHeaders { .. }
                | Wire::ResponseData { .. }
                | Wire::ResponseTrailers
                | Wire::ResponseMetadata(_)
        )
    }

    /// The frame closes its direction.
    pub fn ends_stream(&self) -> bool {
        match self {
            Wire::RequestHeaders { end_stream }
            | Wire::RequestData { end_stream, .. }
            | Wire::ResponseHeaders { end_stream, .. }
            | Wire::ResponseData { end_stream, .. } => *end_stream,
            Wire::RequestTrailers | Wire::ResponseTrailers => true,
            _ => false,
        }
    }
}

/// Recording stand-in for the codec.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Wire>>>,
    response_headers: Arc<Mutex<Vec<ResponseHeaderMap>>>,
    route: Arc<Mutex<Option<Arc<Route>>>>,
    route_evaluations: Arc<AtomicUsize>,
    accept_new_stream: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(self, route: Route) -> Self {
        self.set_route(Some(route));
        self
    }

    pub fn accepting_new_streams(mut self) -> Self {
        self.accept_new_stream = true;
        self
    }

    pub fn set_route(&self, route: Option<Route>) {
        *self.route.lock().unwrap() = route.map(Arc::new);
    }

    pub fn events(&self) -> Vec<Wire> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Wire) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == wanted).count()
    }

    pub fn route_evaluations(&self) -> usize {
        self.route_evaluations.load(Ordering::SeqCst)
    }

    pub fn last_response_headers(&self) -> Option<ResponseHeaderMap> {
        self.response_headers.lock().unwrap().last().cloned()
    }

    fn push(&self, event: Wire) {
        self.events.lock().unwrap().push(event);
    }
}

fn text(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}

impl StreamCallbacks for Recorder {
    fn encode_filtered_100_continue_headers(&mut self, _headers: &ResponseHeaderMap) {
        self.push(Wire::Continue100);
    }

    fn encode_filtered_headers(&mut self, headers: &ResponseHeaderMap, end_stream: bool) {
        self.response_headers.lock().unwrap().push(headers.clone());
        self.push(Wire::ResponseHeaders {
            status: headers.status().as_u16(),
            end_stream,
        });
    }

    fn encode_filtered_data(&mut self, data: Bytes, end_stream: bool) {
        self.push(Wire::ResponseData {
            data: text(&data),
            end_stream,
        });
    }

    fn encode_filtered_trailers(&mut self, _trailers: &TrailerMap) {
        self.push(Wire::ResponseTrailers);
    }

    fn encode_filtered_metadata(&mut self, metadata: Vec<MetadataMap>) {
        self.push(Wire::ResponseMetadata(metadata));
    }

    fn decode_filtered_headers(&mut self, _headers: &RequestHeaderMap, end_stream: bool) {
        self.push(Wire::RequestHeaders { end_stream });
    }

    fn decode_filtered_data(&mut self, data: Bytes, end_stream: bool) {
        self.push(Wire::RequestData {
            data: text(&data),
            end_stream,
        });
    }

    fn decode_filtered_trailers(&mut self, _trailers: &TrailerMap) {
        self.push(Wire::RequestTrailers);
    }

    fn decode_filtered_metadata(&mut self, metadata: MetadataMap) {
        self.push(Wire::RequestMetadata(metadata));
    }

    fn evaluate_route(&mut self, _headers: &RequestHeaderMap, _info: &StreamInfo) -> Option<Arc<Route>> {
        self.route_evaluations.fetch_add(1, Ordering::SeqCst);
        self.route.lock().unwrap().clone()
    }

    fn on_upgrade(&mut self) {
        self.push(Wire::Upgrade);
    }

    fn on_local_reset(&mut self) {
        self.push(Wire::LocalReset);
    }

    fn notify_watermark(&mut self, direction: Direction, event: WatermarkEvent) {
        self.push(Wire::Watermark(direction, event));
    }

    fn request_too_large(&mut self) {
        self.push(Wire::RequestTooLarge);
    }

    fn response_data_too_large(&mut self) {
        self.push(Wire::ResponseTooLarge);
    }

    fn on_idle_timeout(&mut self) {
        self.push(Wire::IdleTimeout);
    }

    fn on_request_timeout(&mut self) {
        self.push(Wire::RequestTimeout);
    }

    fn on_stream_max_duration_reached(&mut self) {
        self.push(Wire::MaxDuration);
    }

    fn end_stream(&mut self) {
        self.push(Wire::EndStream);
    }

    fn new_stream(&mut self, headers: RequestHeaderMap) -> Result<(), RequestHeaderMap> {
        if !self.accept_new_stream {
            return Err(headers);
        }
        self.push(Wire::NewStream);
        Ok(())
    }
}

type DecodeHeadersHook =
    Box<dyn FnMut(&mut DecoderFilterCallbacks<'_>, bool) -> FilterHeadersStatus + Send>;
type DecodeDataHook =
    Box<dyn FnMut(&mut BytesMut, bool, &mut DecoderFilterCallbacks<'_>) -> FilterDataStatus + Send>;
type DecodeTrailersHook = Box<dyn FnMut(&mut DecoderFilterCallbacks<'_>) -> FilterTrailersStatus + Send>;
type DecodeMetadataHook = Box<dyn FnMut(&mut MetadataMap, &mut DecoderFilterCallbacks<'_>) + Send>;

/// Decoder filter that logs every callback as `label:callback ...`.
pub struct TestDecoder {
    label: &'static str,
    log: Log,
    on_headers: Option<DecodeHeadersHook>,
    on_data: Option<DecodeDataHook>,
    on_trailers: Option<DecodeTrailersHook>,
    on_metadata: Option<DecodeMetadataHook>,
}

impl TestDecoder {
    pub fn new(label: &'static str, log: &Log) -> Self {
        Self {
            label,
            log: Arc::clone(log),
            on_headers: None,
            on_data: None,
            on_trailers: None,
            on_metadata: None,
        }
    }

    pub fn on_headers(
        mut self,
        hook: impl FnMut(&mut DecoderFilterCallbacks<'_>, bool) -> FilterHeadersStatus + Send + 'static,
    ) -> Self {
        self.on_headers = Some(Box::new(hook));
        self
    }

    pub fn on_data(
        mut self,
        hook: impl FnMut(&mut BytesMut, bool, &mut DecoderFilterCallbacks<'_>) -> FilterDataStatus
            + Send
            + 'static,
    ) -> Self {
        self.on_data = Some(Box::new(hook));
        self
    }

    pub fn on_trailers(
        mut self,
        hook: impl FnMut(&mut DecoderFilterCallbacks<'_>) -> FilterTrailersStatus + Send + 'static,
    ) -> Self {
        self.on_trailers = Some(Box::new(hook));
        self
    }

    pub fn on_metadata(
        mut self,
        hook: impl FnMut(&mut MetadataMap, &mut DecoderFilterCallbacks<'_>) + Send + 'static,
    ) -> Self {
        self.on_metadata = Some(Box::new(hook));
        self
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl StreamDecoderFilter for TestDecoder {
    fn decode_headers(
        &mut self,
        callbacks: &mut DecoderFilterCallbacks<'_>,
        end_stream: bool,
    ) -> FilterHeadersStatus {
        self.record(format!("{}:headers end={}", self.label, end_stream));
        match self.on_headers.as_mut() {
            Some(hook) => hook(callbacks, end_stream),
            None => FilterHeadersStatus::Continue,
        }
    }

    fn decode_data(
        &mut self,
        data: &mut BytesMut,
        end_stream: bool,
        callbacks: &mut DecoderFilterCallbacks<'_>,
    ) -> FilterDataStatus {
        self.record(format!("{}:data '{}' end={}", self.label, text(data), end_stream));
        match self.on_data.as_mut() {
            Some(hook) => hook(data, end_stream, callbacks),
            None => FilterDataStatus::Continue,
        }
    }

    fn decode_trailers(&mut self, callbacks: &mut DecoderFilterCallbacks<'_>) -> FilterTrailersStatus {
        self.record(format!("{}:trailers", self.label));
        match self.on_trailers.as_mut() {
            Some(hook) => hook(callbacks),
            None => FilterTrailersStatus::Continue,
        }
    }

    fn decode_metadata(
        &mut self,
        metadata: &mut MetadataMap,
        callbacks: &mut DecoderFilterCallbacks<'_>,
    ) -> FilterMetadataStatus {
        self.record(format!("{}:metadata {}", self.label, metadata));
        if let Some(hook) = self.on_metadata.as_mut() {
            hook(metadata, callbacks);
        }
        FilterMetadataStatus::Continue
    }

    fn decode_complete(&mut self, _callbacks: &mut DecoderFilterCallbacks<'_>) {
        self.record(format!("{}:complete", self.label));
    }

    fn on_destroy(&mut self) {
        self.record(format!("{}:destroy", self.label));
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

type Encode100Hook = Box<dyn FnMut(&mut EncoderFilterCallbacks<'_>) -> FilterHeadersStatus + Send>;
type EncodeHeadersHook =
    Box<dyn FnMut(&mut EncoderFilterCallbacks<'_>, bool) -> FilterHeadersStatus + Send>;
type EncodeDataHook =
    Box<dyn FnMut(&mut BytesMut, bool, &mut EncoderFilterCallbacks<'_>) -> FilterDataStatus + Send>;
type EncodeTrailersHook = Box<dyn FnMut(&mut EncoderFilterCallbacks<'_>) -> FilterTrailersStatus + Send>;

/// Encoder counterpart of [`TestDecoder`].
pub struct TestEncoder {
    label: &'static str,
    log: Log,
    on_100_continue: Option<Encode100Hook>,
    on_headers: Option<EncodeHeadersHook>,
    on_data: Option<EncodeDataHook>,
    on_trailers: Option<EncodeTrailersHook>,
}

impl TestEncoder {
    pub fn new(label: &'static str, log: &Log) -> Self {
        Self {
            label,
            log: Arc::clone(log),
            on_100_continue: None,
            on_headers: None,
            on_data: None,
            on_trailers: None,
        }
    }

    pub fn on_100_continue(
        mut self,
        hook: impl FnMut(&mut EncoderFilterCallbacks<'_>) -> FilterHeadersStatus + Send + 'static,
    ) -> Self {
        self.on_100_continue = Some(Box::new(hook));
        self
    }

    pub fn on_headers(
        mut self,
        hook: impl FnMut(&mut EncoderFilterCallbacks<'_>, bool) -> FilterHeadersStatus + Send + 'static,
    ) -> Self {
        self.on_headers = Some(Box::new(hook));
        self
    }

    pub fn on_data(
        mut self,
        hook: impl FnMut(&mut BytesMut, bool, &mut EncoderFilterCallbacks<'_>) -> FilterDataStatus
            + Send
            + 'static,
    ) -> Self {
        self.on_data = Some(Box::new(hook));
        self
    }

    pub fn on_trailers(
        mut self,
        hook: impl FnMut(&mut EncoderFilterCallbacks<'_>) -> FilterTrailersStatus + Send + 'static,
    ) -> Self {
        self.on_trailers = Some(Box::new(hook));
        self
    }

    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

impl StreamEncoderFilter for TestEncoder {
    fn encode_100_continue_headers(
        &mut self,
        callbacks: &mut EncoderFilterCallbacks<'_>,
    ) -> FilterHeadersStatus {
        self.record(format!("{}:100-continue", self.label));
        match self.on_100_continue.as_mut() {
            Some(hook) => hook(callbacks),
            None => FilterHeadersStatus::Continue,
        }
    }

    fn encode_headers(
        &mut self,
        callbacks: &mut EncoderFilterCallbacks<'_>,
        end_stream: bool,
    ) -> FilterHeadersStatus {
        self.record(format!("{}:headers end={}", self.label, end_stream));
        match self.on_headers.as_mut() {
            Some(hook) => hook(callbacks, end_stream),
            None => FilterHeadersStatus::Continue,
        }
    }

    fn encode_data(
        &mut self,
        data: &mut BytesMut,
        end_stream: bool,
        callbacks: &mut EncoderFilterCallbacks<'_>,
    ) -> FilterDataStatus {
        self.record(format!("{}:data '{}' end={}", self.label, text(data), end_stream));
        match self.on_data.as_mut() {
            Some(hook) => hook(data, end_stream, callbacks),
            None => FilterDataStatus::Continue,
        }
    }

    fn encode_trailers(&mut self, callbacks: &mut EncoderFilterCallbacks<'_>) -> FilterTrailersStatus {
        self.record(format!("{}:trailers", self.label));
        match self.on_trailers.as_mut() {
            Some(hook) => hook(callbacks),
            None => FilterTrailersStatus::Continue,
        }
    }

    fn encode_metadata(
        &mut self,
        metadata: &mut MetadataMap,
        _callbacks: &mut EncoderFilterCallbacks<'_>,
    ) -> FilterMetadataStatus {
        self.record(format!("{}:metadata {}", self.label, metadata));
        FilterMetadataStatus::Continue
    }

    fn encode_complete(&mut self, _callbacks: &mut EncoderFilterCallbacks<'_>) {
        self.record(format!("{}:complete", self.label));
    }

    fn on_destroy(&mut self) {
        self.record(format!("{}:destroy", self.label));
    }

    fn name(&self) -> &'static str {
        self.label
    }
}

/// A factory that hands its filters to the first stream that asks.
#[derive(Default)]
pub struct Chain {
    decoders: Mutex<Vec<Box<dyn StreamDecoderFilter>>>,
    encoders: Mutex<Vec<Box<dyn StreamEncoderFilter>>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decoder(self, filter: impl StreamDecoderFilter + 'static) -> Self {
        self.decoders.lock().unwrap().push(Box::new(filter));
        self
    }

    pub fn encoder(self, filter: impl StreamEncoderFilter + 'static) -> Self {
        self.encoders.lock().unwrap().push(Box::new(filter));
        self
    }
}

impl FilterChainFactory for Chain {
    fn create_filter_chain(&self, builder: &mut FilterChainBuilder) {
        for filter in self.decoders.lock().unwrap().drain(..) {
            builder.add_decoder_filter(filter);
        }
        for filter in self.encoders.lock().unwrap().drain(..) {
            builder.add_encoder_filter(filter);
        }
    }
}

/// Counts downstream watermark notifications.
#[derive(Clone, Default)]
pub struct CountingObserver {
    pub above: Arc<AtomicUsize>,
    pub below: Arc<AtomicUsize>,
}

impl CountingObserver {
    pub fn above(&self) -> usize {
        self.above.load(Ordering::SeqCst)
    }

    pub fn below(&self) -> usize {
        self.below.load(Ordering::SeqCst)
    }
}

impl DownstreamWatermarkCallbacks for CountingObserver {
    fn on_above_write_buffer_high_watermark(&mut self) {
        self.above.fetch_add(1, Ordering::SeqCst);
    }

    fn on_below_write_buffer_low_watermark(&mut self) {
        self.below.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn stream(chain: Chain, recorder: &Recorder) -> FilterManager {
    stream_with(chain, recorder, StreamConfig::default())
}

pub fn stream_with(chain: Chain, recorder: &Recorder, config: StreamConfig) -> FilterManager {
    FilterManager::new(Box::new(recorder.clone()), Arc::new(chain), &config)
}

pub fn limited(buffer_limit_bytes: u32) -> StreamConfig {
    StreamConfig {
        buffer_limit_bytes,
        ..StreamConfig::default()
    }
}

pub fn get(path: &str) -> RequestHeaderMap {
    RequestHeaderMap::new(Method::GET, path).with_authority("example.com")
}

pub fn post(path: &str) -> RequestHeaderMap {
    RequestHeaderMap::new(Method::POST, path)
        .with_authority("example.com")
        .with_header("content-type", "application/json")
}

pub fn ok() -> ResponseHeaderMap {
    ResponseHeaderMap::new(StatusCode::OK)
}

pub fn body(data: &str) -> BytesMut {
    BytesMut::from(data)
}

pub fn trailers() -> TrailerMap {
    let mut trailers = TrailerMap::new();
    trailers.insert("x-checksum", "abc".parse().unwrap());
    trailers
}

pub fn request_frames(events: &[Wire]) -> Vec<Wire> {
    events.iter().filter(|e| e.is_request_frame()).cloned().collect()
}

pub fn response_frames(events: &[Wire]) -> Vec<Wire> {
    events.iter().filter(|e| e.is_response_frame()).cloned().collect()
}
