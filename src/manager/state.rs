//! Stream-wide and per-filter iteration state.
//!
//! # State Transitions (per filter)
//! ```text
//! Continue ── StopIteration ─────────────────▶ StopSingleIteration
//! Continue ── StopAllIterationAndBuffer ─────▶ StopAllBuffer
//! Continue ── StopAllIterationAndWatermark ──▶ StopAllWatermark
//! any stop ── continue_decoding/encoding ────▶ Continue
//! ```

use crate::filter::FilterHeadersStatus;

/// Where a filter stands with respect to frame iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IterationState {
    #[default]
    Continue,
    /// Only the frame type that stopped is held; later frame types still
    /// reach this filter.
    StopSingleIteration,
    /// Every frame type is held and buffered, without backpressure.
    StopAllBuffer,
    /// Every frame type is held and buffered, counting toward the watermark.
    StopAllWatermark,
}

impl IterationState {
    pub fn can_iterate(self) -> bool {
        self == IterationState::Continue
    }

    pub fn stopped_all(self) -> bool {
        matches!(self, IterationState::StopAllBuffer | IterationState::StopAllWatermark)
    }

    /// The state a stop status moves a filter into. `None` for statuses that
    /// keep iterating.
    pub fn from_headers_status(status: FilterHeadersStatus) -> Option<Self> {
        match status {
            FilterHeadersStatus::StopIteration => Some(IterationState::StopSingleIteration),
            FilterHeadersStatus::StopAllIterationAndBuffer => Some(IterationState::StopAllBuffer),
            FilterHeadersStatus::StopAllIterationAndWatermark => {
                Some(IterationState::StopAllWatermark)
            }
            FilterHeadersStatus::Continue | FilterHeadersStatus::ContinueAndEndStream => None,
        }
    }
}

/// Where a dispatch starts relative to the filter that produced the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterIterationStartState {
    AlwaysStartFromNext,
    /// Honors the filter's `iterate_from_current_filter` flag.
    CanStartFromCurrent,
}

/// A frame callback that may be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterCall {
    DecodeHeaders,
    DecodeData,
    DecodeTrailers,
    Encode100ContinueHeaders,
    EncodeHeaders,
    EncodeData,
    EncodeTrailers,
}

impl FilterCall {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterCall::DecodeHeaders => "decode_headers",
            FilterCall::DecodeData => "decode_data",
            FilterCall::DecodeTrailers => "decode_trailers",
            FilterCall::Encode100ContinueHeaders => "encode_100_continue_headers",
            FilterCall::EncodeHeaders => "encode_headers",
            FilterCall::EncodeData => "encode_data",
            FilterCall::EncodeTrailers => "encode_trailers",
        }
    }
}

/// Which frame callbacks are currently executing. Each flag is set on entry
/// to the callback and cleared on return; a flag that is already set on
/// entry means a filter re-entered the same dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterCallState {
    pub decode_headers: bool,
    pub decode_data: bool,
    pub decode_trailers: bool,
    pub encode_100_continue_headers: bool,
    pub encode_headers: bool,
    pub encode_data: bool,
    pub encode_trailers: bool,
    /// The decode data call in flight carries the final request data frame.
    pub last_decode_data_frame: bool,
    /// The encode data call in flight carries the final response data frame.
    pub last_encode_data_frame: bool,
}

impl FilterCallState {
    fn flag(&mut self, call: FilterCall) -> &mut bool {
        match call {
            FilterCall::DecodeHeaders => &mut self.decode_headers,
            FilterCall::DecodeData => &mut self.decode_data,
            FilterCall::DecodeTrailers => &mut self.decode_trailers,
            FilterCall::Encode100ContinueHeaders => &mut self.encode_100_continue_headers,
            FilterCall::EncodeHeaders => &mut self.encode_headers,
            FilterCall::EncodeData => &mut self.encode_data,
            FilterCall::EncodeTrailers => &mut self.encode_trailers,
        }
    }

    pub fn is_set(&self, call: FilterCall) -> bool {
        let mut copy = *self;
        *copy.flag(call)
    }

    /// Mark `call` as in flight. Returns false if it already was.
    #[must_use]
    pub fn enter(&mut self, call: FilterCall) -> bool {
        let flag = self.flag(call);
        if *flag {
            return false;
        }
        *flag = true;
        true
    }

    pub fn exit(&mut self, call: FilterCall) {
        *self.flag(call) = false;
    }

    /// No frame callback of either direction is executing.
    pub fn is_idle(&self) -> bool {
        !self.in_decode() && !self.in_encode()
    }

    pub fn in_decode(&self) -> bool {
        self.decode_headers || self.decode_data || self.decode_trailers
    }

    pub fn in_encode(&self) -> bool {
        self.encode_100_continue_headers
            || self.encode_headers
            || self.encode_data
            || self.encode_trailers
    }
}

/// Stream-wide flags.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub filter_call_state: FilterCallState,
    /// The encoder side was handed its final frame.
    pub local_complete: bool,
    /// The decoder side was handed its final frame.
    pub remote_complete: bool,
    /// The final response frame reached the wire.
    pub encode_complete: bool,
    pub decoding_headers_only: bool,
    pub encoding_headers_only: bool,
    /// A `100 Continue` entered the encoder chain.
    pub has_continue_headers: bool,
    /// A `100 Continue` reached the wire.
    pub continue_headers_emitted: bool,
    pub request_headers_emitted: bool,
    pub response_headers_emitted: bool,
    pub created_filter_chain: bool,
    pub successful_upgrade: bool,
    /// Buffer overflow means backpressure rather than an error.
    pub decoder_filters_streaming: bool,
    pub encoder_filters_streaming: bool,
    pub latest_data_decoding_filter: Option<usize>,
    pub latest_data_encoding_filter: Option<usize>,
    pub is_head_request: bool,
    pub is_grpc_request: bool,
    pub reset: bool,
    /// The request was handed to a fresh stream; this one is done.
    pub recreated: bool,
    pub destroyed: bool,
}

/// Track which filter most recently received data.
///
/// The first data callback of a stream always records its filter. After
/// that, a filter is recorded only when it directly follows the recorded
/// one, so a later pass that starts again at the front of the list cannot
/// move ownership back to an earlier filter.
pub fn record_latest_data_filter(latest: Option<usize>, current: usize) -> Option<usize> {
    match latest {
        None => Some(current),
        Some(recorded) if current != 0 && recorded == current - 1 => Some(current),
        _ => latest,
    }
}
