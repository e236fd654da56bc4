//! Health check handlers.
//!
//! - `/health`: liveness, returns OK while the process is running
//! - `/ready`: readiness, requires a loaded signing key set

use crate::errors::GatewayError;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Readiness check response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// "ready" when the gateway can validate tokens.
    pub status: &'static str,

    /// Number of signing keys currently cached.
    pub signing_keys: usize,

    /// Seconds since the key set was last fetched.
    pub signing_keys_age_seconds: u64,
}

/// Liveness check handler.
///
/// Does not check dependencies.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness check handler.
///
/// Returns 503 until the signing key set has been fetched at least once.
/// Without keys every token would be rejected, so the instance should not
/// receive traffic yet.
#[tracing::instrument(skip_all, name = "gw.health.readiness")]
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReadinessResponse>, GatewayError> {
    if !state.key_cache.is_loaded().await {
        return Err(GatewayError::ServiceUnavailable(
            "signing key set not loaded".to_string(),
        ));
    }

    let age = state.key_cache.age().await.unwrap_or_default();

    Ok(Json(ReadinessResponse {
        status: "ready",
        signing_keys: state.key_cache.key_count().await,
        signing_keys_age_seconds: age.as_secs(),
    }))
}
