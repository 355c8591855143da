//! Metrics instrumentation and Prometheus exporter for vless-rs.
//!
//! Recording functions are cheap no-ops until [`init_prometheus`] installs
//! a recorder, so sessions call them unconditionally.

use std::net::SocketAddr;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve `/metrics` on `listen`.
pub fn init_prometheus(listen: &str) -> Result<(), String> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| format!("invalid metrics listen address: {e}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install prometheus exporter: {e}"))
}

// ============================================================================
// Metric Names
// ============================================================================

/// WebSocket upgrades accepted.
pub const SESSIONS_TOTAL: &str = "vless_sessions_total";
/// Sessions currently open.
pub const SESSIONS_ACTIVE: &str = "vless_sessions_active";
/// Session lifetime histogram (seconds).
pub const SESSION_DURATION_SECONDS: &str = "vless_session_duration_seconds";
/// Sessions rejected before the upgrade (reason label).
pub const SESSIONS_REJECTED_TOTAL: &str = "vless_sessions_rejected_total";
/// Handshakes carrying a token that did not match.
pub const IDENTITY_REJECTED_TOTAL: &str = "vless_identity_rejected_total";
/// Destination connects that went to the fallback relay.
pub const FALLBACK_TOTAL: &str = "vless_fallback_total";
/// Time spent resolving the destination, fallback included (seconds).
pub const RESOLVE_DURATION_SECONDS: &str = "vless_resolve_duration_seconds";
/// Bytes forwarded from tunnel clients to destinations.
pub const BYTES_UPSTREAM_TOTAL: &str = "vless_bytes_upstream_total";
/// Bytes returned from destinations to tunnel clients.
pub const BYTES_DOWNSTREAM_TOTAL: &str = "vless_bytes_downstream_total";
/// Session errors by type.
pub const ERRORS_TOTAL: &str = "vless_errors_total";

// ============================================================================
// Metric Recording Functions
// ============================================================================

#[inline]
pub fn record_session_opened() {
    counter!(SESSIONS_TOTAL).increment(1);
    gauge!(SESSIONS_ACTIVE).increment(1.0);
}

#[inline]
pub fn record_session_closed(duration_secs: f64) {
    gauge!(SESSIONS_ACTIVE).decrement(1.0);
    histogram!(SESSION_DURATION_SECONDS).record(duration_secs);
}

/// Record a connection turned away (reason: "max_connections", "not_upgrade").
#[inline]
pub fn record_session_rejected(reason: &'static str) {
    counter!(SESSIONS_REJECTED_TOTAL, "reason" => reason).increment(1);
}

#[inline]
pub fn record_identity_rejected() {
    counter!(IDENTITY_REJECTED_TOTAL).increment(1);
}

#[inline]
pub fn record_fallback() {
    counter!(FALLBACK_TOTAL).increment(1);
}

#[inline]
pub fn record_resolve_duration(duration_secs: f64) {
    histogram!(RESOLVE_DURATION_SECONDS).record(duration_secs);
}

#[inline]
pub fn record_bytes_upstream(bytes: u64) {
    counter!(BYTES_UPSTREAM_TOTAL).increment(bytes);
}

#[inline]
pub fn record_bytes_downstream(bytes: u64) {
    counter!(BYTES_DOWNSTREAM_TOTAL).increment(bytes);
}

/// Record an error by type label from [`vless_core::errors`].
#[inline]
pub fn record_error(error_type: &'static str) {
    counter!(ERRORS_TOTAL, "type" => error_type).increment(1);
}

pub use vless_core::{
    ERROR_CONFIG, ERROR_IDENTITY, ERROR_IO, ERROR_PROTOCOL, ERROR_QUEUE, ERROR_RESOLVE,
    ERROR_TIMEOUT, ERROR_WEBSOCKET,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_listen_address() {
        let err = init_prometheus("not-an-address").unwrap_err();
        assert!(err.contains("invalid metrics listen address"));
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_session_opened();
        record_bytes_upstream(42);
        record_error(ERROR_RESOLVE);
        record_session_closed(0.5);
    }
}
