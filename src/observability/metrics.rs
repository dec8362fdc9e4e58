//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gemini_requests_total` (counter): responses by status code
//! - `gemini_rate_limited_total` (counter): rate-limited connections by reason
//! - `gemini_active_connections` (gauge): connections being handled
//! - `gemini_backend_dispatch_total` (counter): CGI/SCGI dispatches by kind
//!
//! Recording is always on; the values are only exported when a Prometheus
//! listener is installed.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_response(code: u8) {
    counter!("gemini_requests_total", "status" => code.to_string()).increment(1);
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("gemini_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_dispatch(kind: &'static str) {
    counter!("gemini_backend_dispatch_total", "kind" => kind).increment(1);
}

pub fn connection_opened() {
    gauge!("gemini_active_connections").increment(1.0);
}

pub fn connection_closed() {
    gauge!("gemini_active_connections").decrement(1.0);
}
