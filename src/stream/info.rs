//! What happened to a stream, for logging and access records.

use std::fmt;
use std::time::Instant;

use http::StatusCode;
use uuid::Uuid;

use super::id::StreamId;

/// Request identifier, generated once per stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Notable conditions recorded against a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFlag {
    StreamIdleTimeout,
    RequestTimeout,
    MaxDurationTimeout,
    LocalReset,
    UpgradeFailed,
    DownstreamRequestTooLarge,
    UpstreamResponseTooLarge,
}

/// Per-stream record.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    pub stream_id: StreamId,
    pub request_id: RequestId,
    pub start_time: Instant,
    /// Name of the route the stream was matched to, if any.
    pub route_name: Option<String>,
    pub response_code: Option<StatusCode>,
    pub response_code_details: Option<&'static str>,
    pub response_flags: Vec<ResponseFlag>,
    /// Request body bytes handed to the decoder chain by the codec.
    pub bytes_received: u64,
    pub last_downstream_rx_byte_received: Option<Instant>,
}

impl StreamInfo {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            request_id: RequestId::new(),
            start_time: Instant::now(),
            route_name: None,
            response_code: None,
            response_code_details: None,
            response_flags: Vec::new(),
            bytes_received: 0,
            last_downstream_rx_byte_received: None,
        }
    }

    pub fn set_response_flag(&mut self, flag: ResponseFlag) {
        if !self.response_flags.contains(&flag) {
            self.response_flags.push(flag);
        }
    }

    pub fn has_response_flag(&self, flag: ResponseFlag) -> bool {
        self.response_flags.contains(&flag)
    }

    pub fn set_response_code_details(&mut self, details: &'static str) {
        self.response_code_details = Some(details);
    }

    pub fn on_last_downstream_rx_byte_received(&mut self) {
        self.last_downstream_rx_byte_received = Some(Instant::now());
    }
}
