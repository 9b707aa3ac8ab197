//! Metrics collection and exposition.
//!
//! # Metrics
//! - `session_requests_total` (counter): requests by method, status
//! - `session_request_duration_seconds` (histogram): request latency
//! - `session_lock_wait_seconds` (histogram): time spent waiting for a session lock
//! - `session_lock_timeouts_total` (counter): waits that gave up
//! - `session_active` (gauge): sessions in the store
//! - `session_swept_total` (counter): sessions removed by the expiry sweep
//! - `pool_connections` (gauge): pooled connections by state (free, in_use)
//! - `pool_events_total` (counter): created, reused, reinitialized, discarded
//! - `backend_call_duration_seconds` (histogram): per procedure
//! - `backend_call_errors_total` (counter): per procedure
//! - `cache_lookups_total` (counter): hit, miss, refused
//! - `cache_bytes` (gauge): bytes held by the resource cache
//!
//! # Design Decisions
//! - The recorder is installed once at startup; before that every macro is a no-op
//! - Labels stay low-cardinality (no tokens, no resource codes)

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start: Instant) {
    let method = method.to_string();
    let status = status.to_string();
    metrics::counter!("session_requests_total", "method" => method.clone(), "status" => status.clone())
        .increment(1);
    metrics::histogram!("session_request_duration_seconds", "method" => method, "status" => status)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_lock_wait(waited_secs: f64, acquired: bool) {
    metrics::histogram!("session_lock_wait_seconds").record(waited_secs);
    if !acquired {
        metrics::counter!("session_lock_timeouts_total").increment(1);
    }
}

pub fn set_active_sessions(count: usize) {
    metrics::gauge!("session_active").set(count as f64);
}

pub fn record_swept(count: usize) {
    metrics::counter!("session_swept_total").increment(count as u64);
}

pub fn record_pool_event(event: &'static str) {
    metrics::counter!("pool_events_total", "event" => event).increment(1);
}

pub fn set_pool_connections(free: usize, in_use: usize) {
    metrics::gauge!("pool_connections", "state" => "free").set(free as f64);
    metrics::gauge!("pool_connections", "state" => "in_use").set(in_use as f64);
}

pub fn record_backend_call(procedure: &str, elapsed_secs: f64, ok: bool) {
    let procedure = procedure.to_string();
    metrics::histogram!("backend_call_duration_seconds", "procedure" => procedure.clone()).record(elapsed_secs);
    if !ok {
        metrics::counter!("backend_call_errors_total", "procedure" => procedure).increment(1);
    }
}

pub fn record_cache_lookup(outcome: &'static str) {
    metrics::counter!("cache_lookups_total", "outcome" => outcome).increment(1);
}

pub fn set_cache_bytes(bytes: usize) {
    metrics::gauge!("cache_bytes").set(bytes as f64);
}
