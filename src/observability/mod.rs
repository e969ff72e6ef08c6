//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! FilterManager, StreamDriver, config reload:
//!     → logging.rs (structured log events, stream_id on every line)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Stream id flows through every filter-chain log line
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
