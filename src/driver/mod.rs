//! Async ownership of a stream.
//!
//! # Responsibilities
//! - Own one `FilterManager` inside a tokio task
//! - Serialize codec frames, filter continuations, downstream watermark
//!   events and resets through one queue
//! - Fire idle, request and max-duration timeouts
//! - Reset the stream on process shutdown
//!
//! # Data Flow
//! ```text
//! codec ──StreamHandle──┐
//!                       ├──▶ mpsc queue ──▶ StreamDriver::run ──▶ FilterManager
//! filter task ──ContinuationHandle──┘              ▲
//!                                    timers ───────┤
//!                                    Shutdown ─────┘
//! ```
//!
//! # Design Decisions
//! - The manager keeps only a weak sender, so the queue closes once every
//!   handle and continuation is gone
//! - One event is dispatched to completion before the next is read

pub mod timers;

pub use timers::{StreamTimeout, StreamTimers};

use bytes::BytesMut;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::buffer::WatermarkEvent;
use crate::config::TimeoutConfig;
use crate::http::{MetadataMap, RequestHeaderMap, ResponseHeaderMap, TrailerMap};
use crate::lifecycle::Shutdown;
use crate::manager::FilterManager;
use crate::stream::{Direction, StreamGuard, StreamTracker};

/// Everything that can happen to a driven stream.
#[derive(Debug)]
pub enum StreamEvent {
    RequestHeaders { headers: RequestHeaderMap, end_stream: bool },
    RequestData { data: BytesMut, end_stream: bool },
    RequestTrailers(TrailerMap),
    RequestMetadata(MetadataMap),
    Response100Continue(ResponseHeaderMap),
    ResponseHeaders { headers: ResponseHeaderMap, end_stream: bool },
    ResponseData { data: BytesMut, end_stream: bool },
    ResponseTrailers(TrailerMap),
    ResponseMetadata(MetadataMap),
    /// A stopped filter asked to resume.
    Continue { direction: Direction, index: usize },
    /// A filter produced body bytes outside its callbacks.
    Inject {
        direction: Direction,
        index: usize,
        data: BytesMut,
        end_stream: bool,
    },
    /// The downstream connection crossed a write watermark.
    DownstreamWatermark(WatermarkEvent),
    /// The peer reset the stream.
    Reset,
}

/// The stream's task has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("stream is closed")]
pub struct StreamClosed;

/// Sending side of a driven stream, held by the codec.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    events: mpsc::UnboundedSender<StreamEvent>,
}

impl StreamHandle {
    pub fn send(&self, event: StreamEvent) -> Result<(), StreamClosed> {
        self.events.send(event).map_err(|_| StreamClosed)
    }

    pub fn request_headers(&self, headers: RequestHeaderMap, end_stream: bool) -> Result<(), StreamClosed> {
        self.send(StreamEvent::RequestHeaders { headers, end_stream })
    }

    pub fn request_data(&self, data: impl Into<BytesMut>, end_stream: bool) -> Result<(), StreamClosed> {
        self.send(StreamEvent::RequestData {
            data: data.into(),
            end_stream,
        })
    }

    pub fn request_trailers(&self, trailers: TrailerMap) -> Result<(), StreamClosed> {
        self.send(StreamEvent::RequestTrailers(trailers))
    }

    pub fn response_headers(&self, headers: ResponseHeaderMap, end_stream: bool) -> Result<(), StreamClosed> {
        self.send(StreamEvent::ResponseHeaders { headers, end_stream })
    }

    pub fn response_data(&self, data: impl Into<BytesMut>, end_stream: bool) -> Result<(), StreamClosed> {
        self.send(StreamEvent::ResponseData {
            data: data.into(),
            end_stream,
        })
    }

    pub fn response_trailers(&self, trailers: TrailerMap) -> Result<(), StreamClosed> {
        self.send(StreamEvent::ResponseTrailers(trailers))
    }

    pub fn reset(&self) -> Result<(), StreamClosed> {
        self.send(StreamEvent::Reset)
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

/// Resumes one stopped filter, or injects body bytes for it, from outside
/// its callbacks.
#[derive(Debug, Clone)]
pub struct ContinuationHandle {
    events: mpsc::UnboundedSender<StreamEvent>,
    direction: Direction,
    index: usize,
}

impl ContinuationHandle {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<StreamEvent>,
        direction: Direction,
        index: usize,
    ) -> Self {
        Self {
            events,
            direction,
            index,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Queue the resumption. Fails if the stream is gone.
    pub fn resume(&self) -> Result<(), StreamClosed> {
        self.events
            .send(StreamEvent::Continue {
                direction: self.direction,
                index: self.index,
            })
            .map_err(|_| StreamClosed)
    }

    /// Queue body bytes to continue the chain after this filter.
    pub fn inject(&self, data: impl Into<BytesMut>, end_stream: bool) -> Result<(), StreamClosed> {
        self.events
            .send(StreamEvent::Inject {
                direction: self.direction,
                index: self.index,
                data: data.into(),
                end_stream,
            })
            .map_err(|_| StreamClosed)
    }
}

/// Runs one stream to completion.
pub struct StreamDriver {
    manager: FilterManager,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    timers: StreamTimers,
    shutdown: Option<broadcast::Receiver<()>>,
    _guard: Option<StreamGuard>,
}

impl StreamDriver {
    /// Wrap `manager` and arm its timers. The returned handle feeds it.
    pub fn new(mut manager: FilterManager, timeouts: &TimeoutConfig) -> (Self, StreamHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        manager.set_event_sender(tx.downgrade());
        let driver = Self {
            manager,
            events: rx,
            timers: StreamTimers::new(timeouts, Instant::now()),
            shutdown: None,
            _guard: None,
        };
        (driver, StreamHandle { events: tx })
    }

    /// Reset the stream when `shutdown` fires.
    pub fn with_shutdown(mut self, shutdown: &Shutdown) -> Self {
        self.shutdown = Some(shutdown.subscribe());
        self
    }

    /// Count the stream as live in `tracker` until the driver finishes.
    pub fn with_tracker(mut self, tracker: &StreamTracker) -> Self {
        self._guard = Some(tracker.track(self.manager.stream_id()));
        self
    }

    pub fn manager(&self) -> &FilterManager {
        &self.manager
    }

    pub fn spawn(self) -> JoinHandle<FilterManager> {
        tokio::spawn(self.run())
    }

    /// Dispatch events until the stream finishes, then destroy it and hand
    /// the manager back for inspection.
    pub async fn run(mut self) -> FilterManager {
        let stream_id = self.manager.stream_id();
        tracing::debug!(stream_id = %stream_id, "stream driver started");

        let mut peer_reset = false;
        while !peer_reset && !self.manager.is_finished() {
            if self.manager.request_timer_disarmed() {
                self.timers.disarm_request();
            }
            let deadline = self.timers.next_deadline();

            tokio::select! {
                event = self.events.recv() => match event {
                    Some(StreamEvent::Reset) => {
                        tracing::debug!(stream_id = %stream_id, "stream reset by peer");
                        peer_reset = true;
                    }
                    Some(event) => {
                        self.timers.on_activity(Instant::now());
                        self.dispatch(event);
                    }
                    None => {
                        tracing::debug!(stream_id = %stream_id, "all stream handles dropped, resetting");
                        self.manager.reset_stream();
                    }
                },
                _ = sleep_until(deadline) => self.fire_timers(Instant::now()),
                triggered = shutdown_signal(&mut self.shutdown) => {
                    if triggered {
                        tracing::info!(stream_id = %stream_id, "shutdown signal received, resetting stream");
                        self.manager.reset_stream();
                    } else {
                        self.shutdown = None;
                    }
                }
            }
        }

        self.manager.destroy();
        tracing::debug!(stream_id = %stream_id, "stream driver finished");
        self.manager
    }

    fn dispatch(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::RequestHeaders { headers, end_stream } => {
                self.manager.decode_headers(headers, end_stream)
            }
            StreamEvent::RequestData { data, end_stream } => self.manager.decode_data(data, end_stream),
            StreamEvent::RequestTrailers(trailers) => self.manager.decode_trailers(trailers),
            StreamEvent::RequestMetadata(metadata) => self.manager.decode_metadata(metadata),
            StreamEvent::Response100Continue(headers) => self.manager.encode_100_continue_headers(headers),
            StreamEvent::ResponseHeaders { headers, end_stream } => {
                self.manager.encode_headers(headers, end_stream)
            }
            StreamEvent::ResponseData { data, end_stream } => self.manager.encode_data(data, end_stream),
            StreamEvent::ResponseTrailers(trailers) => self.manager.encode_trailers(trailers),
            StreamEvent::ResponseMetadata(metadata) => self.manager.encode_metadata(metadata),
            StreamEvent::Continue {
                direction: Direction::Decode,
                index,
            } => self.manager.continue_decoding(index),
            StreamEvent::Continue {
                direction: Direction::Encode,
                index,
            } => self.manager.continue_encoding(index),
            StreamEvent::Inject {
                direction: Direction::Decode,
                index,
                data,
                end_stream,
            } => self.manager.inject_decoded_data(index, data, end_stream),
            StreamEvent::Inject {
                direction: Direction::Encode,
                index,
                data,
                end_stream,
            } => self.manager.inject_encoded_data(index, data, end_stream),
            StreamEvent::DownstreamWatermark(WatermarkEvent::AboveHighWatermark) => {
                self.manager.on_above_write_buffer_high_watermark()
            }
            StreamEvent::DownstreamWatermark(WatermarkEvent::BelowLowWatermark) => {
                self.manager.on_below_write_buffer_low_watermark()
            }
            StreamEvent::Reset => self.manager.reset_stream(),
        }
    }

    fn fire_timers(&mut self, now: Instant) {
        if self.manager.request_timer_disarmed() {
            self.timers.disarm_request();
        }
        while let Some(timeout) = self.timers.take_expired(now) {
            if self.manager.is_finished() {
                return;
            }
            tracing::debug!(
                stream_id = %self.manager.stream_id(),
                timeout = timeout.as_str(),
                "stream timer fired"
            );
            match timeout {
                StreamTimeout::Idle => self.manager.on_idle_timeout(),
                StreamTimeout::Request => self.manager.on_request_timeout(),
                StreamTimeout::MaxDuration => self.manager.on_stream_max_duration_reached(),
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolves true when shutdown fires, false if the coordinator is gone.
async fn shutdown_signal(shutdown: &mut Option<broadcast::Receiver<()>>) -> bool {
    match shutdown {
        Some(rx) => match rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => false,
        },
        None => std::future::pending().await,
    }
}
