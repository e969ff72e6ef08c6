//! Metrics collection and exposition.
//!
//! # Metrics
//! - `filter_chain_active_streams` (gauge): live streams
//! - `filter_chain_local_replies_total` (counter): by status code
//! - `filter_chain_watermark_events_total` (counter): by direction and event
//! - `filter_chain_timeouts_total` (counter): by kind
//! - `filter_chain_upgrades_total` (counter): by result
//! - `filter_chain_resets_total` (counter): locally reset streams
//!
//! # Design Decisions
//! - Recording without an installed exporter is a no-op, so library users
//!   that never call `init_metrics` pay nothing

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::buffer::WatermarkEvent;
use crate::stream::Direction;

/// Install the Prometheus exporter with an HTTP scrape listener on `addr`.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_active_streams(count: u64) {
    ::metrics::gauge!("filter_chain_active_streams").set(count as f64);
}

pub fn record_local_reply(status: u16) {
    ::metrics::counter!("filter_chain_local_replies_total", "status" => status.to_string())
        .increment(1);
}

pub fn record_watermark(direction: Direction, event: WatermarkEvent) {
    let event = match event {
        WatermarkEvent::AboveHighWatermark => "above_high",
        WatermarkEvent::BelowLowWatermark => "below_low",
    };
    ::metrics::counter!(
        "filter_chain_watermark_events_total",
        "direction" => direction.as_str(),
        "event" => event
    )
    .increment(1);
}

pub fn record_timeout(kind: &'static str) {
    ::metrics::counter!("filter_chain_timeouts_total", "kind" => kind).increment(1);
}

pub fn record_upgrade(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    ::metrics::counter!("filter_chain_upgrades_total", "result" => result).increment(1);
}

pub fn record_reset() {
    ::metrics::counter!("filter_chain_resets_total").increment(1);
}
