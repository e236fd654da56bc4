//! Metrics definitions for the gateway.
//!
//! All metrics follow Prometheus naming conventions:
//! - `gw_` prefix for the gateway
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `method`: 7 values max (GET, POST, PATCH, DELETE, PUT, HEAD, OPTIONS)
//! - `endpoint`: known paths, everything else is `/other`
//! - `outcome`, `status`, `kind`: bounded by `AuthError::kind` plus `success`
//! - `stage`: the guard's five states

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("gw_http_request".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
            ],
        )
        .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
        // Validation is CPU-bound on a cache hit; a miss adds one key-set fetch
        .set_buckets_for_metric(
            Matcher::Prefix("gw_token_validation".to_string()),
            &[
                0.0005, 0.001, 0.002, 0.005, 0.010, 0.050, 0.100, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set token validation buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gw_jwks_refresh".to_string()),
            &[0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000],
        )
        .map_err(|e| format!("Failed to set key-set refresh buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gw_directory_request".to_string()),
            &[
                0.002, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set directory request buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// HTTP Request Metrics
// ============================================================================

/// Record HTTP request completion
///
/// Metric: `gw_http_requests_total`, `gw_http_request_duration_seconds`
/// Labels: `method`, `endpoint`, `status`
///
/// This captures ALL HTTP responses, including framework-level 404/405s.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let normalized_endpoint = normalize_endpoint(endpoint);
    let status = categorize_status_code(status_code);

    histogram!("gw_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("gw_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => normalized_endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Categorize HTTP status code into success/error/timeout
fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Map a request path to a bounded label value.
fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/" => "/",
        "/health" => "/health",
        "/ready" => "/ready",
        "/metrics" => "/metrics",
        "/api/v1/me" => "/api/v1/me",
        _ => "/other",
    }
}

// ============================================================================
// Token Validation Metrics
// ============================================================================

/// Record a token validation.
///
/// Metric: `gw_token_validations_total`, `gw_token_validation_duration_seconds`
/// Labels: `outcome` ("success" or an `AuthError` kind)
pub fn record_token_validation(outcome: &'static str, duration: Duration) {
    histogram!("gw_token_validation_duration_seconds").record(duration.as_secs_f64());

    counter!("gw_token_validations_total",
        "outcome" => outcome
    )
    .increment(1);
}

// ============================================================================
// Key-Set Metrics
// ============================================================================

/// Record a key-set cache lookup.
///
/// Metric: `gw_jwks_cache_lookups_total`
/// Labels: `result` ("hit" or "miss")
pub fn record_jwks_lookup(result: &'static str) {
    counter!("gw_jwks_cache_lookups_total",
        "result" => result
    )
    .increment(1);
}

/// Record a key-set refresh attempt.
///
/// Metric: `gw_jwks_refresh_total`, `gw_jwks_refresh_duration_seconds`
/// Labels: `status` ("success", "error", "rate_limited")
///
/// Rate-limited attempts never reach the network and record no duration.
pub fn record_jwks_refresh(status: &'static str, duration: Duration) {
    if status != "rate_limited" {
        histogram!("gw_jwks_refresh_duration_seconds").record(duration.as_secs_f64());
    }

    counter!("gw_jwks_refresh_total",
        "status" => status
    )
    .increment(1);
}

/// Set the number of signing keys currently cached.
///
/// Metric: `gw_jwks_cached_keys`
pub fn set_jwks_cached_keys(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("gw_jwks_cached_keys").set(count as f64);
}

// ============================================================================
// User Directory Metrics
// ============================================================================

/// Record a user-directory lookup.
///
/// Metric: `gw_directory_requests_total`, `gw_directory_request_duration_seconds`
/// Labels: `status` ("success", "not_found", "upstream_timeout", "upstream_error")
pub fn record_directory_request(status: &'static str, duration: Duration) {
    histogram!("gw_directory_request_duration_seconds",
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("gw_directory_requests_total",
        "status" => status
    )
    .increment(1);
}

// ============================================================================
// Request Guard Metrics
// ============================================================================

/// Record a request rejected by the guard.
///
/// Metric: `gw_auth_rejections_total`
/// Labels: `stage` (guard state the failure happened in), `kind` (`AuthError` kind)
pub fn record_guard_rejection(stage: &'static str, kind: &'static str) {
    counter!("gw_auth_rejections_total",
        "stage" => stage,
        "kind" => kind
    )
    .increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_status_code() {
        assert_eq!(categorize_status_code(200), "success");
        assert_eq!(categorize_status_code(204), "success");
        assert_eq!(categorize_status_code(401), "error");
        assert_eq!(categorize_status_code(503), "error");
        assert_eq!(categorize_status_code(408), "timeout");
        assert_eq!(categorize_status_code(504), "timeout");
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("/api/v1/me"), "/api/v1/me");
        assert_eq!(normalize_endpoint("/ready"), "/ready");
        assert_eq!(normalize_endpoint("/api/v1/users/123"), "/other");
        assert_eq!(normalize_endpoint("/../../etc/passwd"), "/other");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        // No recorder installed in unit tests; these must not panic
        record_http_request("GET", "/api/v1/me", 200, Duration::from_millis(5));
        record_token_validation("success", Duration::from_micros(300));
        record_jwks_lookup("hit");
        record_jwks_refresh("rate_limited", Duration::ZERO);
        set_jwks_cached_keys(2);
        record_directory_request("not_found", Duration::from_millis(3));
        record_guard_rejection("validated", "token_expired");
    }
}
