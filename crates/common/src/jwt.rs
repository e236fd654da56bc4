//! JWT utilities shared across VolunteerX services.
//!
//! This module provides the pre-verification checks every service runs on an
//! inbound bearer token:
//! - Size limits for DoS prevention
//! - Clock skew constants for `iat` validation
//! - Unverified header inspection (`kid` and `alg`) for key lookup
//! - `iat` validation logic
//! - Decoding of Ed25519 JWK public keys
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Header values are used only to look a key up in a trusted key set; the
//!   token MUST still be verified against that key
//! - Error messages are generic to prevent information leakage
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::{extract_header, validate_iat, DEFAULT_CLOCK_SKEW};
//!
//! // Size check + header parse, no signature work yet
//! let header = extract_header(token)?;
//!
//! // Look the key up by kid, verify, then check iat
//! validate_iat(claims.iat, DEFAULT_CLOCK_SKEW)?;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// JWTs larger than this size are rejected BEFORE any parsing or cryptographic
/// operations.
///
/// - Typical identity-provider access tokens are 700-1500 bytes (RS256 signature)
/// - 8KB leaves room for large custom claim namespaces
/// - Checked BEFORE base64 decode and signature verification
pub const MAX_JWT_SIZE_BYTES: usize = 8192; // 8KB

/// Default JWT clock skew tolerance (5 minutes per NIST SP 800-63B).
///
/// Applied as leeway to `exp`/`nbf` and as the maximum allowed amount an `iat`
/// may lie in the future.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Maximum allowed JWT clock skew tolerance (10 minutes).
///
/// Configuration above this bound is rejected at start-up.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(600);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during pre-verification JWT checks.
///
/// Note: Error messages are intentionally generic to prevent information leakage.
/// Detailed information is logged at debug level for troubleshooting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token is missing required `kid` header.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token is missing the `alg` header.
    #[error("The access token is invalid or expired")]
    MissingAlg,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

// =============================================================================
// Header Types
// =============================================================================

/// The parts of a JWT header needed to select a verification key.
///
/// Both values are attacker-controlled until the signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Key identifier, used to look the signing key up in the key set.
    pub kid: String,

    /// Declared signature algorithm (e.g. `RS256`, `EdDSA`).
    pub alg: String,
}

// =============================================================================
// Functions
// =============================================================================

/// Extract `kid` and `alg` from a JWT header without verifying the signature.
///
/// # Security
///
/// - Token size is checked BEFORE any parsing (denial-of-service prevention)
/// - This function does NOT validate the token signature
/// - The returned values should only be used for key lookup in a trusted key set
///
/// # Errors
///
/// Returns `JwtValidationError` variants:
/// - `TokenTooLarge` - Token exceeds size limit (denial-of-service protection)
/// - `MalformedToken` - Token format invalid (wrong structure, bad base64, invalid JSON)
/// - `MissingKid` - Header missing `kid`, `kid` not a string, or `kid` empty
/// - `MissingAlg` - Header missing `alg`, `alg` not a string, or `alg` empty
pub fn extract_header(token: &str) -> Result<TokenHeader, JwtValidationError> {
    // Check token size first (DoS prevention)
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    // JWT format: header.payload.signature
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        tracing::debug!(
            target: "common.jwt",
            parts = parts.len(),
            "Token rejected: invalid JWT format"
        );
        return Err(JwtValidationError::MalformedToken);
    }

    let header_part = parts.first().ok_or(JwtValidationError::MalformedToken)?;
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let header: serde_json::Value = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    let kid = non_empty_str(&header, "kid").ok_or(JwtValidationError::MissingKid)?;
    let alg = non_empty_str(&header, "alg").ok_or(JwtValidationError::MissingAlg)?;

    Ok(TokenHeader { kid, alg })
}

/// Extract the `kid` (key ID) from a JWT header without verifying the signature.
///
/// Convenience wrapper over [`extract_header`] for callers that only need the key ID.
///
/// # Errors
///
/// Same as [`extract_header`].
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    extract_header(token).map(|header| header.kid)
}

fn non_empty_str(header: &serde_json::Value, field: &str) -> Option<String> {
    header
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Validate the `iat` (issued-at) claim with clock skew tolerance.
///
/// Rejects tokens with `iat` too far in the future, which could indicate
/// token pre-generation or clock synchronization issues.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` if the iat timestamp is more than
/// `clock_skew` in the future.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    let now = chrono::Utc::now().timestamp();
    validate_iat_at(iat, clock_skew, now)
}

/// Deterministic `iat` validation against an explicit `now` timestamp.
///
/// Prefer [`validate_iat`] in production code. This variant exists so that
/// boundary conditions can be unit-tested without wall-clock dependence.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // Safe cast: clock_skew is bounded to MAX_CLOCK_SKEW (600 seconds), well within i64 range
    #[allow(clippy::cast_possible_wrap)]
    let clock_skew_secs = clock_skew.as_secs() as i64;
    let max_iat = now + clock_skew_secs;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            clock_skew_secs = clock_skew_secs,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

/// Decode an Ed25519 public key from JWK `x` field (base64url format).
///
/// The `x` field in an OKP (Octet Key Pair) JWK contains the raw 32-byte public
/// key in base64url encoding without padding.
///
/// # Errors
///
/// Returns `base64::DecodeError` if the base64url content cannot be decoded.
pub fn decode_ed25519_public_key_jwk(x_b64url: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(x_b64url)
}

// =============================================================================
// Tests
// =============================================================================
