//! Builder patterns for test data construction
//!
//! Provides a fluent API for identity-provider style access-token claims.

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};

/// Issuer used by test configurations.
pub const TEST_ISSUER: &str = "https://volunteerx-test.auth0.com/";

/// Namespaced email claim used by test configurations.
pub const TEST_EMAIL_CLAIM: &str = "https://api.volunteerX.module/email";

/// Scopes every gateway request needs by default.
pub const FULL_SCOPE: &str = "openid profile email";

/// Builder for test JWT claims
///
/// Defaults produce claims the gateway accepts: test issuer, full scope,
/// one hour of validity, and an email claim for `alice@example.com`.
///
/// # Example
/// ```rust,ignore
/// let claims = TokenClaimsBuilder::new()
///     .email("bob@example.com")
///     .scope("openid email")
///     .expires_in(60)
///     .build();
/// ```
pub struct TokenClaimsBuilder {
    iss: String,
    sub: String,
    email: Option<String>,
    scope: String,
    exp: i64,
    iat: i64,
    nbf: Option<i64>,
    aud: Option<Value>,
}

impl TokenClaimsBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            iss: TEST_ISSUER.to_string(),
            sub: "auth0|test-subject".to_string(),
            email: Some("alice@example.com".to_string()),
            scope: FULL_SCOPE.to_string(),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            nbf: None,
            aud: None,
        }
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.iss = issuer.to_string();
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    /// Omit the email claim entirely.
    pub fn without_email(mut self) -> Self {
        self.email = None;
        self
    }

    /// Set the scope (space-separated)
    pub fn scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    /// Set expiration in seconds from now; negative values are in the past.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Set not-before in seconds from now.
    pub fn not_before_in(mut self, seconds: i64) -> Self {
        self.nbf = Some((Utc::now() + Duration::seconds(seconds)).timestamp());
        self
    }

    pub fn audience(mut self, audience: &str) -> Self {
        self.aud = Some(json!([audience, format!("{}userinfo", self.iss)]));
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> Value {
        let mut claims = Map::new();
        claims.insert("iss".to_string(), json!(self.iss));
        claims.insert("sub".to_string(), json!(self.sub));
        claims.insert("scope".to_string(), json!(self.scope));
        claims.insert("exp".to_string(), json!(self.exp));
        claims.insert("iat".to_string(), json!(self.iat));

        if let Some(nbf) = self.nbf {
            claims.insert("nbf".to_string(), json!(nbf));
        }
        if let Some(aud) = self.aud {
            claims.insert("aud".to_string(), aud);
        }
        if let Some(email) = self.email {
            claims.insert(TEST_EMAIL_CLAIM.to_string(), json!(email));
        }

        Value::Object(claims)
    }
}

impl Default for TokenClaimsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_acceptable_claims() {
        let claims = TokenClaimsBuilder::new().build();

        assert_eq!(claims["iss"], TEST_ISSUER);
        assert_eq!(claims["scope"], FULL_SCOPE);
        assert_eq!(claims[TEST_EMAIL_CLAIM], "alice@example.com");
        assert!(claims["exp"].as_i64().unwrap() > Utc::now().timestamp());
        assert!(claims.get("nbf").is_none());
        assert!(claims.get("aud").is_none());
    }

    #[test]
    fn test_without_email() {
        let claims = TokenClaimsBuilder::new().without_email().build();
        assert!(claims.get(TEST_EMAIL_CLAIM).is_none());
    }

    #[test]
    fn test_expired() {
        let claims = TokenClaimsBuilder::new().expires_in(-3600).build();
        assert!(claims["exp"].as_i64().unwrap() < Utc::now().timestamp());
    }

    #[test]
    fn test_audience_is_array() {
        let claims = TokenClaimsBuilder::new()
            .audience("https://api.volunteerx.module")
            .build();
        assert_eq!(claims["aud"][0], "https://api.volunteerx.module");
    }
}
