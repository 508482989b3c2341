//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_routed_events_total` (counter): inbound events by route decision
//! - `proxy_bare_requests_total` (counter): relayed requests by outcome
//! - `proxy_bare_request_duration_seconds` (histogram): time to remote headers
//! - `proxy_wisp_streams_total` (counter): streams opened by type
//! - `proxy_wisp_stream_closes_total` (counter): stream closes by reason
//! - `proxy_active_sessions` (gauge): live tunnel sessions by kind
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - Exporter is optional and bound on its own address

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::routing::RouteDecision;

/// Install the Prometheus exporter.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_route(decision: RouteDecision) {
    metrics::counter!("proxy_routed_events_total", "decision" => decision.as_str()).increment(1);
}

pub fn record_bare_request(outcome: &'static str, start: Instant) {
    metrics::counter!("proxy_bare_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("proxy_bare_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_stream_opened(stream_type: &'static str) {
    metrics::counter!("proxy_wisp_streams_total", "type" => stream_type).increment(1);
}

pub fn record_stream_closed(reason: &'static str) {
    metrics::counter!("proxy_wisp_stream_closes_total", "reason" => reason).increment(1);
}

pub fn set_active_sessions(kind: &'static str, active: u64) {
    metrics::gauge!("proxy_active_sessions", "kind" => kind).set(active as f64);
}
