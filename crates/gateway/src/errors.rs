//! Gateway error types.
//!
//! `AuthError` is the identity pipeline's taxonomy: every way a request can fail
//! to become an authenticated request. `GatewayError` is what handlers and
//! middleware return; it maps to HTTP status codes via `IntoResponse`.
//!
//! Error messages returned to clients are intentionally generic. The specific
//! `AuthError` kind is logged server-side and recorded in metrics.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Identity verification and resolution failures.
///
/// All variants are recoverable at the request boundary: they reject the
/// current request and never affect the process or other requests.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No `Authorization: Bearer <token>` header, or an empty token.
    #[error("missing credentials")]
    MissingCredentials,

    /// Token is not a structurally valid JWT, or required claims are absent.
    #[error("malformed token")]
    MalformedToken,

    /// No key with the token's `kid` exists, even after a key-set refresh.
    #[error("unknown signing key")]
    UnknownSigningKey,

    /// The remote key set could not be fetched or parsed.
    #[error("key set fetch failed: {0}")]
    KeyFetchError(String),

    /// A key-set refresh was needed but the refresh budget is exhausted.
    #[error("key set refresh rate limited")]
    RateLimited,

    /// Signature did not verify against the resolved key.
    #[error("invalid signature")]
    InvalidSignature,

    /// `iss` claim does not match the expected issuer.
    #[error("issuer mismatch")]
    IssuerMismatch,

    /// `aud` claim does not match the configured audience.
    #[error("audience mismatch")]
    AudienceMismatch,

    /// Token is outside its validity window.
    #[error("token expired")]
    TokenExpired,

    /// One or more required scopes are missing.
    #[error("insufficient scope")]
    InsufficientScope,

    /// The user directory did not answer within the configured timeout.
    #[error("user directory timed out")]
    UpstreamTimeout,

    /// Transport-level failure talking to the user directory.
    #[error("user directory error: {0}")]
    UpstreamError(String),

    /// The user directory explicitly reported no such user.
    #[error("user not found")]
    NotFound,
}

impl AuthError {
    /// Stable, low-cardinality name for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing_credentials",
            AuthError::MalformedToken => "malformed_token",
            AuthError::UnknownSigningKey => "unknown_signing_key",
            AuthError::KeyFetchError(_) => "key_fetch_error",
            AuthError::RateLimited => "rate_limited",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::IssuerMismatch => "issuer_mismatch",
            AuthError::AudienceMismatch => "audience_mismatch",
            AuthError::TokenExpired => "token_expired",
            AuthError::InsufficientScope => "insufficient_scope",
            AuthError::UpstreamTimeout => "upstream_timeout",
            AuthError::UpstreamError(_) => "upstream_error",
            AuthError::NotFound => "not_found",
        }
    }
}

/// Gateway error type.
///
/// Maps to appropriate HTTP status codes:
/// - Unauthorized: 401 Unauthorized (every identity pipeline rejection)
/// - ServiceUnavailable: 503 Service Unavailable
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::Unauthorized(_) => (
                // Uniform rejection; the specific kind was already logged by the guard
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "The access token is invalid or the user is unknown".to_string(),
            ),
            GatewayError::ServiceUnavailable(reason) => {
                tracing::warn!(target: "gw.availability", reason = %reason, "Service unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Service temporarily unavailable".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"volunteerx-api\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}
