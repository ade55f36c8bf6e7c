//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, method, status
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_backend_calls_total` (counter): backend calls by route, code
//! - `gateway_backend_call_duration_seconds` (histogram): backend latency
//! - `gateway_streams_cancelled_total` (counter): streams dropped by clients
//!
//! # Design Decisions
//! - Low-overhead metric updates through the `metrics` facade; with no
//!   recorder installed every call is a no-op
//! - Prometheus exporter is optional and listens on its own address

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::rpc::status::{code_name, Code};

/// Route label for requests that matched nothing.
pub const UNMATCHED: &str = "none";

/// Start the Prometheus scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, method: &str, status: u16, start: Instant) {
    let labels = [
        ("route", route.to_string()),
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_backend_call(route: &str, code: Code, start: Instant) {
    let labels = [("route", route.to_string()), ("code", code_name(code).to_string())];
    counter!("gateway_backend_calls_total", &labels).increment(1);
    histogram!("gateway_backend_call_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_stream_cancelled(route: &str) {
    counter!("gateway_streams_cancelled_total", "route" => route.to_string()).increment(1);
}
