//! Request headers.
//!
//! # Responsibilities
//! - Hold method, path and authority next to the regular header block
//! - Extract routing-relevant information (host, path)
//! - Detect protocol upgrades, HEAD and gRPC requests

use http::header::{CONNECTION, CONTENT_TYPE, HOST, UPGRADE};
use http::{HeaderMap, HeaderName, HeaderValue, Method};

/// Inbound request headers as seen by decoder filters.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestHeaderMap {
    method: Method,
    path: String,
    authority: Option<String>,
    headers: HeaderMap,
}

impl RequestHeaderMap {
    /// Create request headers for `method` and `path`.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            authority: None,
            headers: HeaderMap::new(),
        }
    }

    /// Builder-style authority setter.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    /// Builder-style header insertion. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a header, replacing any previous value. Returns false if the
    /// name or value is not a valid header token.
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

    /// Get a header value as a string.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<String>) {
        self.path = path.into();
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    /// The request host, taken from the authority or the `host` header.
    pub fn host(&self) -> Option<&str> {
        self.authority
            .as_deref()
            .or_else(|| self.headers.get(HOST).and_then(|h| h.to_str().ok()))
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The requested upgrade protocol, if the request asks for one.
    ///
    /// Requires both `connection: upgrade` and an `upgrade` header.
    pub fn upgrade(&self) -> Option<&str> {
        let wants_upgrade = self
            .headers
            .get_all(CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
        if !wants_upgrade {
            return None;
        }
        self.headers.get(UPGRADE).and_then(|v| v.to_str().ok())
    }

    pub fn is_head_request(&self) -> bool {
        self.method == Method::HEAD
    }

    /// True for `application/grpc` and its `+proto`/`+json` variants.
    pub fn is_grpc(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| {
                ct == "application/grpc"
                    || ct.starts_with("application/grpc+")
                    || ct.starts_with("application/grpc;")
            })
            .unwrap_or(false)
    }
}
