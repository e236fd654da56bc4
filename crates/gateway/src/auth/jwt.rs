//! Bearer token validation.
//!
//! Verifies access tokens issued by the identity provider against keys from the
//! [`KeySetCache`], then checks issuer, validity window, audience, and scopes.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only `RS256` and `EdDSA` are accepted, and the header's `alg` must match
//!   the algorithm of the key it names
//! - `exp`/`nbf` are validated with clock skew leeway; `iat` may not lie
//!   further in the future than the skew
//! - Failure detail is logged at debug level only

use crate::auth::claims::{RawClaims, RequiredScopes, TokenClaims};
use crate::auth::jwks::{KeyAlgorithm, KeySetCache};
use crate::config::Config;
use crate::errors::AuthError;
use crate::observability::metrics::record_token_validation;
use common::jwt::{extract_header, validate_iat};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Validation};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Settings fixed at start-up.
#[derive(Debug, Clone)]
pub struct ValidatorSettings {
    pub issuer: String,
    pub audience: Option<String>,
    pub required_scopes: RequiredScopes,
    pub email_claim: String,
    pub clock_skew: Duration,
}

impl ValidatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            required_scopes: config.required_scopes.clone(),
            email_claim: config.email_claim.clone(),
            clock_skew: Duration::from_secs(config.jwt_clock_skew_seconds),
        }
    }
}

/// Validates bearer tokens against the issuer's key set.
pub struct TokenValidator {
    key_cache: KeySetCache,
    settings: ValidatorSettings,
}

impl TokenValidator {
    pub fn new(key_cache: KeySetCache, settings: ValidatorSettings) -> Self {
        Self {
            key_cache,
            settings,
        }
    }

    /// Validate with the configured required scopes and issuer.
    pub async fn validate(&self, token: &str) -> Result<TokenClaims, AuthError> {
        self.validate_against(token, &self.settings.required_scopes, &self.settings.issuer)
            .await
    }

    /// Validate a token and return its claims.
    ///
    /// # Checks, in order
    ///
    /// 1. Size and header (`kid`, `alg`) - `MalformedToken`
    /// 2. Key lookup - `UnknownSigningKey`, `KeyFetchError`, `RateLimited`
    /// 3. Signature - `InvalidSignature`
    /// 4. Validity window - `TokenExpired`
    /// 5. Issuer and audience - `IssuerMismatch`, `AudienceMismatch`
    /// 6. Scope superset - `InsufficientScope`
    /// 7. Email claim present - `MalformedToken`
    #[instrument(skip_all)]
    pub async fn validate_against(
        &self,
        token: &str,
        required_scopes: &RequiredScopes,
        expected_issuer: &str,
    ) -> Result<TokenClaims, AuthError> {
        let start = Instant::now();
        let result = self
            .check(token, required_scopes, expected_issuer)
            .await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        record_token_validation(outcome, start.elapsed());

        result
    }

    async fn check(
        &self,
        token: &str,
        required_scopes: &RequiredScopes,
        expected_issuer: &str,
    ) -> Result<TokenClaims, AuthError> {
        let header = extract_header(token).map_err(|e| {
            tracing::debug!(target: "gw.auth.jwt", error = ?e, "Token header rejected");
            AuthError::MalformedToken
        })?;

        let algorithm = KeyAlgorithm::from_jose(&header.alg).ok_or_else(|| {
            tracing::debug!(target: "gw.auth.jwt", alg = %header.alg, "Token algorithm not allowed");
            AuthError::MalformedToken
        })?;

        let key = self.key_cache.get_key(&header.kid).await?;

        if key.algorithm != algorithm {
            tracing::debug!(
                target: "gw.auth.jwt",
                kid = %header.kid,
                token_alg = %algorithm,
                key_alg = %key.algorithm,
                "Token algorithm does not match key"
            );
            return Err(AuthError::InvalidSignature);
        }

        let validation = self.validation_for(algorithm, expected_issuer);
        let raw = decode::<RawClaims>(token, key.decoding_key(), &validation)
            .map_err(|e| {
                tracing::debug!(target: "gw.auth.jwt", error = %e, "Token verification failed");
                map_jwt_error(e.kind())
            })?
            .claims;

        if let Some(iat) = raw.iat {
            validate_iat(iat, self.settings.clock_skew).map_err(|e| {
                tracing::debug!(target: "gw.auth.jwt", error = ?e, "Token iat rejected");
                AuthError::MalformedToken
            })?;
        }

        required_scopes.check(&raw.scope).map_err(|missing| {
            tracing::debug!(target: "gw.auth.jwt", missing = ?missing, "Token lacks required scopes");
            AuthError::InsufficientScope
        })?;

        let email = raw
            .string_claim(&self.settings.email_claim)
            .filter(|email| !email.is_empty())
            .ok_or_else(|| {
                tracing::debug!(target: "gw.auth.jwt", claim = %self.settings.email_claim, "Token missing email claim");
                AuthError::MalformedToken
            })?
            .to_string();

        tracing::debug!(target: "gw.auth.jwt", kid = %header.kid, "Token validated successfully");

        Ok(TokenClaims {
            subject: raw.sub,
            email,
            scope: raw.scope,
            issuer: raw.iss,
            expires_at: raw.exp,
            key_id: key.key_id.clone(),
        })
    }

    fn validation_for(&self, algorithm: KeyAlgorithm, expected_issuer: &str) -> Validation {
        let mut validation = Validation::new(algorithm.jwt_algorithm());
        validation.leeway = self.settings.clock_skew.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[expected_issuer]);

        match &self.settings.audience {
            Some(audience) => {
                validation.set_required_spec_claims(&["exp", "iss", "aud"]);
                validation.set_audience(&[audience]);
            }
            None => {
                validation.set_required_spec_claims(&["exp", "iss"]);
                validation.validate_aud = false;
            }
        }

        validation
    }
}

fn map_jwt_error(kind: &ErrorKind) -> AuthError {
    match kind {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthError::TokenExpired,
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::MissingRequiredClaim(claim) if claim == "iss" => AuthError::IssuerMismatch,
        ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => AuthError::AudienceMismatch,
        _ => AuthError::MalformedToken,
    }
}
