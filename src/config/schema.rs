//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for filter-chain streams.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct FilterChainConfig {
    /// Per-stream buffering and informational header settings.
    pub stream: StreamConfig,

    /// Stream timeouts.
    pub timeouts: TimeoutConfig,

    /// Route definitions mapping requests to clusters.
    pub routes: Vec<RouteConfig>,

    /// Upstream cluster definitions.
    pub clusters: Vec<ClusterConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Per-stream settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Body buffer limit in bytes. The high watermark is the limit, the low
    /// watermark half of it. 0 disables watermarks.
    pub buffer_limit_bytes: u32,

    /// Forward `100 Continue` produced by filters to the client.
    pub proxy_100_continue: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_limit_bytes: 1024 * 1024, // 1MB
            proxy_100_continue: false,
        }
    }
}

/// Timeout configuration. A value of 0 disables the timer.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time without any frame activity before the stream is timed out.
    pub idle_ms: u64,

    /// Time allowed for the whole request to be received.
    pub request_ms: u64,

    /// Upper bound on the life of a stream.
    pub max_stream_duration_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            idle_ms: 300_000, // 5 minutes
            request_ms: 0,
            max_stream_duration_ms: 0,
        }
    }
}

impl TimeoutConfig {
    pub fn idle(&self) -> Option<Duration> {
        non_zero_ms(self.idle_ms)
    }

    pub fn request(&self) -> Option<Duration> {
        non_zero_ms(self.request_ms)
    }

    pub fn max_stream_duration(&self) -> Option<Duration> {
        non_zero_ms(self.max_stream_duration_ms)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Route configuration mapping requests to a cluster.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host to match (exact match).
    pub host: Option<String>,

    /// Path prefix to match.
    pub path_prefix: Option<String>,

    /// Cluster name to forward to.
    pub cluster: String,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Upgrade protocols and whether they are allowed on this route.
    #[serde(default)]
    pub upgrades: BTreeMap<String, bool>,

    /// Tags attached to the stream's trace span.
    #[serde(default)]
    pub tracing_tags: BTreeMap<String, String>,
}

/// Upstream cluster configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ClusterConfig {
    /// Unique cluster identifier.
    pub name: String,

    /// Connection establishment timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Maximum concurrent requests to this cluster.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_requests() -> u32 {
    1024
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON instead of human-readable lines.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: FilterChainConfig = toml::from_str("").unwrap();
        assert_eq!(config, FilterChainConfig::default());
        assert_eq!(config.timeouts.idle(), Some(Duration::from_secs(300)));
        assert_eq!(config.timeouts.request(), None);
    }

    #[test]
    fn test_route_with_upgrades() {
        let config: FilterChainConfig = toml::from_str(
            r#"
            [[routes]]
            name = "chat"
            path_prefix = "/chat"
            cluster = "realtime"
            upgrades = { websocket = true }

            [[clusters]]
            name = "realtime"
            "#,
        )
        .unwrap();
        assert_eq!(config.routes[0].upgrades.get("websocket"), Some(&true));
        assert_eq!(config.clusters[0].connect_timeout_ms, 5_000);
    }
}
