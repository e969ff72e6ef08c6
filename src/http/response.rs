//! Response headers and locally generated replies.
//!
//! # Responsibilities
//! - Hold the response status next to the regular header block
//! - Build local replies (timeouts, payload too large, upgrade failures)
//! - Map HTTP status codes onto gRPC status codes for gRPC callers
//!
//! # Design Decisions
//! - gRPC callers get a trailers-only reply: `:status 200` plus grpc-status
//! - HEAD requests never get a body
//! - Plain replies are `text/plain` with an explicit content-length

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

/// Outbound response headers as seen by encoder filters.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeaderMap {
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseHeaderMap {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
        }
    }

    /// Builder-style header insertion. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: &str) -> bool {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

/// A response synthesized by the stream itself rather than by upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalReply {
    pub code: StatusCode,
    pub body: String,
    /// Short machine-readable reason recorded in stream info.
    pub details: &'static str,
}

impl LocalReply {
    pub fn new(code: StatusCode, body: impl Into<String>, details: &'static str) -> Self {
        Self {
            code,
            body: body.into(),
            details,
        }
    }

    /// Render the reply into response headers and an optional body.
    ///
    /// A `None` body means the headers carry end-of-stream.
    pub fn render(&self, is_grpc: bool, is_head_request: bool) -> (ResponseHeaderMap, Option<Bytes>) {
        if is_grpc {
            let mut headers = ResponseHeaderMap::new(StatusCode::OK)
                .with_header("content-type", "application/grpc")
                .with_header("grpc-status", &grpc_status_for(self.code).to_string());
            if !self.body.is_empty() {
                headers.insert("grpc-message", &self.body);
            }
            return (headers, None);
        }

        let mut headers = ResponseHeaderMap::new(self.code);
        if self.body.is_empty() {
            return (headers, None);
        }
        headers
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        if is_head_request {
            return (headers, None);
        }
        (headers, Some(Bytes::from(self.body.clone())))
    }
}

/// Map an HTTP status onto the closest gRPC status code.
pub fn grpc_status_for(code: StatusCode) -> u32 {
    match code.as_u16() {
        400 => 13, // Internal
        401 => 16, // Unauthenticated
        403 => 7,  // PermissionDenied
        404 => 12, // Unimplemented
        429 | 502 | 503 | 504 => 14, // Unavailable
        _ => 2,    // Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_reply_has_body_and_length() {
        let reply = LocalReply::new(StatusCode::REQUEST_TIMEOUT, "stream timeout", "stream_idle_timeout");
        let (headers, body) = reply.render(false, false);
        assert_eq!(headers.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(headers.get("content-length"), Some("14"));
        assert_eq!(body.unwrap(), Bytes::from_static(b"stream timeout"));
    }

    #[test]
    fn test_head_reply_drops_body() {
        let reply = LocalReply::new(StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large", "request_payload_too_large");
        let (headers, body) = reply.render(false, true);
        assert_eq!(headers.get("content-length"), Some("17"));
        assert!(body.is_none());
    }

    #[test]
    fn test_grpc_reply_is_trailers_only() {
        let reply = LocalReply::new(StatusCode::SERVICE_UNAVAILABLE, "no healthy upstream", "no_healthy_upstream");
        let (headers, body) = reply.render(true, false);
        assert_eq!(headers.status(), StatusCode::OK);
        assert_eq!(headers.get("grpc-status"), Some("14"));
        assert_eq!(headers.get("grpc-message"), Some("no healthy upstream"));
        assert!(body.is_none());
    }
}
