//! JWT claims structures.
//!
//! `RawClaims` is the payload as decoded from the token. `TokenClaims` is the
//! validated, request-scoped view handed to the rest of the gateway. Subject
//! and email are redacted in Debug output to keep them out of logs.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Scopes required by default: the OpenID Connect identity scopes.
pub const DEFAULT_REQUIRED_SCOPES: &str = "openid profile email";

/// Immutable set of scopes every accepted token must carry.
///
/// Tokens may carry extra scopes; the check is a superset check, so duplicate
/// entries in the token's scope claim can never stand in for a missing one.
#[derive(Clone, PartialEq, Eq)]
pub struct RequiredScopes(BTreeSet<String>);

impl RequiredScopes {
    /// Parse a whitespace-delimited scope list. Duplicates collapse.
    pub fn parse(scopes: &str) -> Self {
        Self(scopes.split_whitespace().map(str::to_string).collect())
    }

    /// Check a token's space-delimited scope claim.
    ///
    /// Returns the missing scopes on failure.
    pub fn check<'a>(&'a self, scope_claim: &str) -> Result<(), Vec<&'a str>> {
        let granted: BTreeSet<&str> = scope_claim.split_whitespace().collect();
        let missing: Vec<&str> = self
            .0
            .iter()
            .map(String::as_str)
            .filter(|required| !granted.contains(required))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(missing)
        }
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for RequiredScopes {
    fn default() -> Self {
        Self::parse(DEFAULT_REQUIRED_SCOPES)
    }
}

impl fmt::Debug for RequiredScopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.0.iter()).finish()
    }
}

/// Token payload as decoded after signature verification.
///
/// Registered claims are typed; everything else (including namespaced custom
/// claims such as the email claim) lands in `extra`.
#[derive(Clone, Serialize, Deserialize)]
pub struct RawClaims {
    /// Subject - identity-provider user id.
    #[serde(default)]
    pub sub: Option<String>,

    /// Issuer. Absence is reported by issuer validation, not deserialization.
    #[serde(default)]
    pub iss: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default)]
    pub iat: Option<i64>,

    /// Space-separated scopes granted to this token.
    #[serde(default)]
    pub scope: String,

    /// Remaining claims, keyed by claim name.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl RawClaims {
    /// Read a string-valued custom claim.
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.extra.get(name).and_then(|v| v.as_str())
    }
}

impl fmt::Debug for RawClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawClaims")
            .field("sub", &"[REDACTED]")
            .field("iss", &self.iss)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("scope", &self.scope)
            .field("extra_claims", &self.extra.len())
            .finish()
    }
}

/// Validated claims for the current request.
///
/// Transient: produced by the token validator, never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Identity-provider subject, if present - redacted in Debug output.
    pub subject: Option<String>,

    /// Subject email from the namespaced custom claim - redacted in Debug output.
    pub email: String,

    /// Space-separated scopes granted to this token.
    pub scope: String,

    /// Issuer that signed the token.
    pub issuer: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub expires_at: i64,

    /// Key ID the token was verified with.
    pub key_id: String,
}

impl TokenClaims {
    /// Check if the token has a specific scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.split_whitespace().any(|s| s == scope)
    }

    /// Get all scopes as a vector.
    pub fn scopes(&self) -> Vec<&str> {
        self.scope.split_whitespace().collect()
    }
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("subject", &"[REDACTED]")
            .field("email", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("issuer", &self.issuer)
            .field("expires_at", &self.expires_at)
            .field("key_id", &self.key_id)
            .finish()
    }
}
