//! Gateway configuration.
//!
//! Configuration is loaded once from environment variables at start-up and is
//! immutable afterwards. The Redis URL may carry credentials and is redacted in
//! Debug output.

use crate::auth::claims::{RequiredScopes, DEFAULT_REQUIRED_SCOPES};
use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default key-set refreshes allowed per minute.
pub const DEFAULT_JWKS_REQUESTS_PER_MINUTE: u32 = 5;

/// Upper bound for `JWKS_REQUESTS_PER_MINUTE`.
pub const MAX_JWKS_REQUESTS_PER_MINUTE: u32 = 60;

/// Default timeout for a user-directory request/reply call.
pub const DEFAULT_DIRECTORY_RPC_TIMEOUT_MS: u64 = 5000;

/// Default channel the user directory listens on.
pub const DEFAULT_DIRECTORY_CHANNEL: &str = "users.find_user";

/// Default namespaced claim carrying the subject's email address.
pub const DEFAULT_EMAIL_CLAIM: &str = "https://api.volunteerX.module/email";

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default gateway instance ID prefix.
pub const DEFAULT_GATEWAY_ID_PREFIX: &str = "gateway";

/// Gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Expected `iss` claim, e.g. `https://tenant.auth0.com/`.
    pub issuer: String,

    /// URL of the issuer's key set.
    pub jwks_url: String,

    /// Expected `aud` claim. Audience is not checked when unset.
    pub audience: Option<String>,

    /// Scopes every token must carry.
    pub required_scopes: RequiredScopes,

    /// Claim name holding the subject's email address.
    pub email_claim: String,

    /// Maximum key-set refreshes per minute.
    pub jwks_requests_per_minute: u32,

    /// Leeway for `exp`/`nbf` and maximum future `iat`, in seconds.
    pub jwt_clock_skew_seconds: u64,

    /// Redis connection URL for the directory transport.
    pub redis_url: SecretString,

    /// Channel the user directory consumes requests from.
    pub directory_channel: String,

    /// Bounded wait for a directory reply.
    pub directory_rpc_timeout: Duration,

    /// Unique identifier for this gateway instance.
    /// Used to name the instance's reply channel.
    pub gateway_id: String,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("issuer", &self.issuer)
            .field("jwks_url", &self.jwks_url)
            .field("audience", &self.audience)
            .field("required_scopes", &self.required_scopes)
            .field("email_claim", &self.email_claim)
            .field("jwks_requests_per_minute", &self.jwks_requests_per_minute)
            .field("jwt_clock_skew_seconds", &self.jwt_clock_skew_seconds)
            .field("redis_url", &"[REDACTED]")
            .field("directory_channel", &self.directory_channel)
            .field("directory_rpc_timeout", &self.directory_rpc_timeout)
            .field("gateway_id", &self.gateway_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid issuer configuration: {0}")]
    InvalidIssuer(String),

    #[error("Invalid required scopes: {0}")]
    InvalidScopes(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid JWKS rate limit configuration: {0}")]
    InvalidRateLimit(String),

    #[error("Invalid directory timeout configuration: {0}")]
    InvalidDirectoryTimeout(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        // Issuer and JWKS URL derive from the identity provider's domain unless
        // both are given explicitly.
        let domain = vars.get("AUTH_DOMAIN").map(|d| d.trim_end_matches('/'));

        let issuer = match (vars.get("AUTH_ISSUER"), domain) {
            (Some(issuer), _) => issuer.clone(),
            (None, Some(domain)) => format!("https://{}/", domain),
            (None, None) => return Err(ConfigError::MissingEnvVar("AUTH_DOMAIN".to_string())),
        };

        if issuer.is_empty() {
            return Err(ConfigError::InvalidIssuer(
                "AUTH_ISSUER must not be empty".to_string(),
            ));
        }

        let jwks_url = match (vars.get("AUTH_JWKS_URL"), domain) {
            (Some(url), _) => url.clone(),
            (None, Some(domain)) => format!("https://{}/.well-known/jwks.json", domain),
            (None, None) => return Err(ConfigError::MissingEnvVar("AUTH_DOMAIN".to_string())),
        };

        let audience = vars.get("AUTH_AUDIENCE").filter(|a| !a.is_empty()).cloned();

        let scopes_str = vars
            .get("AUTH_REQUIRED_SCOPES")
            .map(String::as_str)
            .unwrap_or(DEFAULT_REQUIRED_SCOPES);
        let required_scopes = RequiredScopes::parse(scopes_str);
        if required_scopes.is_empty() {
            return Err(ConfigError::InvalidScopes(
                "AUTH_REQUIRED_SCOPES must name at least one scope".to_string(),
            ));
        }

        let email_claim = vars
            .get("AUTH_EMAIL_CLAIM")
            .cloned()
            .unwrap_or_else(|| DEFAULT_EMAIL_CLAIM.to_string());

        // Parse JWKS refresh rate limit with validation
        let jwks_requests_per_minute =
            if let Some(value_str) = vars.get("JWKS_REQUESTS_PER_MINUTE") {
                let value: u32 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidRateLimit(format!(
                        "JWKS_REQUESTS_PER_MINUTE must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value == 0 || value > MAX_JWKS_REQUESTS_PER_MINUTE {
                    return Err(ConfigError::InvalidRateLimit(format!(
                        "JWKS_REQUESTS_PER_MINUTE must be between 1 and {}, got {}",
                        MAX_JWKS_REQUESTS_PER_MINUTE, value
                    )));
                }

                value
            } else {
                DEFAULT_JWKS_REQUESTS_PER_MINUTE
            };

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ConfigError::InvalidJwtClockSkew(
                    "JWT_CLOCK_SKEW_SECONDS must be positive".to_string(),
                ));
            }

            if value > MAX_CLOCK_SKEW.as_secs() {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs()
        };

        let redis_url = vars
            .get("REDIS_URL")
            .map(|url| SecretString::from(url.clone()))
            .ok_or_else(|| ConfigError::MissingEnvVar("REDIS_URL".to_string()))?;

        let directory_channel = vars
            .get("DIRECTORY_CHANNEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_DIRECTORY_CHANNEL.to_string());

        let directory_rpc_timeout_ms =
            if let Some(value_str) = vars.get("DIRECTORY_RPC_TIMEOUT_MS") {
                let value: u64 = value_str.parse().map_err(|e| {
                    ConfigError::InvalidDirectoryTimeout(format!(
                        "DIRECTORY_RPC_TIMEOUT_MS must be a valid positive integer, got '{}': {}",
                        value_str, e
                    ))
                })?;

                if value == 0 {
                    return Err(ConfigError::InvalidDirectoryTimeout(
                        "DIRECTORY_RPC_TIMEOUT_MS must be greater than 0".to_string(),
                    ));
                }

                value
            } else {
                DEFAULT_DIRECTORY_RPC_TIMEOUT_MS
            };

        let gateway_id = vars.get("GATEWAY_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{}-{}-{}", DEFAULT_GATEWAY_ID_PREFIX, hostname, short_suffix)
        });

        Ok(Config {
            bind_address,
            issuer,
            jwks_url,
            audience,
            required_scopes,
            email_claim,
            jwks_requests_per_minute,
            jwt_clock_skew_seconds,
            redis_url,
            directory_channel,
            directory_rpc_timeout: Duration::from_millis(directory_rpc_timeout_ms),
            gateway_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("AUTH_DOMAIN".to_string(), "volunteerx.eu.auth0.com".to_string()),
            ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
        ])
    }

    fn with(mut vars: HashMap<String, String>, key: &str, value: &str) -> HashMap<String, String> {
        vars.insert(key.to_string(), value.to_string());
        vars
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.issuer, "https://volunteerx.eu.auth0.com/");
        assert_eq!(
            config.jwks_url,
            "https://volunteerx.eu.auth0.com/.well-known/jwks.json"
        );
        assert!(config.audience.is_none());
        assert_eq!(config.required_scopes, RequiredScopes::default());
        assert_eq!(config.email_claim, DEFAULT_EMAIL_CLAIM);
        assert_eq!(
            config.jwks_requests_per_minute,
            DEFAULT_JWKS_REQUESTS_PER_MINUTE
        );
        assert_eq!(config.jwt_clock_skew_seconds, 300);
        assert_eq!(config.directory_channel, DEFAULT_DIRECTORY_CHANNEL);
        assert_eq!(config.directory_rpc_timeout, Duration::from_millis(5000));
        assert!(config.gateway_id.starts_with("gateway-"));
    }

    #[test]
    fn test_default_email_claim_matches_identity_provider() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        // Claim names are case-sensitive
        assert_eq!(config.email_claim, "https://api.volunteerX.module/email");
    }

    #[test]
    fn test_domain_trailing_slash_is_trimmed() {
        let vars = with(base_vars(), "AUTH_DOMAIN", "tenant.auth0.com/");
        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.issuer, "https://tenant.auth0.com/");
        assert_eq!(config.jwks_url, "https://tenant.auth0.com/.well-known/jwks.json");
    }

    #[test]
    fn test_explicit_issuer_and_jwks_url_without_domain() {
        let vars = HashMap::from([
            ("AUTH_ISSUER".to_string(), "http://127.0.0.1:9000/".to_string()),
            (
                "AUTH_JWKS_URL".to_string(),
                "http://127.0.0.1:9000/.well-known/jwks.json".to_string(),
            ),
            ("REDIS_URL".to_string(), "redis://localhost".to_string()),
        ]);

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.issuer, "http://127.0.0.1:9000/");
        assert_eq!(
            config.jwks_url,
            "http://127.0.0.1:9000/.well-known/jwks.json"
        );
    }

    #[test]
    fn test_missing_domain_fails() {
        let vars = HashMap::from([("REDIS_URL".to_string(), "redis://localhost".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "AUTH_DOMAIN"));
    }

    #[test]
    fn test_missing_redis_url_fails() {
        let vars = HashMap::from([("AUTH_DOMAIN".to_string(), "tenant.auth0.com".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "REDIS_URL"));
    }

    #[test]
    fn test_audience_and_custom_scopes() {
        let vars = with(base_vars(), "AUTH_AUDIENCE", "https://api.volunteerx.module");
        let vars = with(vars, "AUTH_REQUIRED_SCOPES", "openid email read:pings");

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.audience.as_deref(),
            Some("https://api.volunteerx.module")
        );
        assert_eq!(config.required_scopes.len(), 3);
        assert!(config.required_scopes.contains("read:pings"));
    }

    #[test]
    fn test_empty_audience_is_ignored() {
        let vars = with(base_vars(), "AUTH_AUDIENCE", "");
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.audience.is_none());
    }

    #[test]
    fn test_blank_required_scopes_rejected() {
        let vars = with(base_vars(), "AUTH_REQUIRED_SCOPES", "   ");
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidScopes(_))
        ));
    }

    #[test]
    fn test_rate_limit_bounds() {
        let ok = with(base_vars(), "JWKS_REQUESTS_PER_MINUTE", "10");
        assert_eq!(Config::from_vars(&ok).unwrap().jwks_requests_per_minute, 10);

        for bad in ["0", "61", "-1", "five"] {
            let vars = with(base_vars(), "JWKS_REQUESTS_PER_MINUTE", bad);
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidRateLimit(_))),
                "expected {} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_clock_skew_bounds() {
        let ok = with(base_vars(), "JWT_CLOCK_SKEW_SECONDS", "600");
        assert_eq!(Config::from_vars(&ok).unwrap().jwt_clock_skew_seconds, 600);

        for bad in ["0", "601", "abc"] {
            let vars = with(base_vars(), "JWT_CLOCK_SKEW_SECONDS", bad);
            assert!(
                matches!(
                    Config::from_vars(&vars),
                    Err(ConfigError::InvalidJwtClockSkew(_))
                ),
                "expected {} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_directory_timeout() {
        let ok = with(base_vars(), "DIRECTORY_RPC_TIMEOUT_MS", "250");
        assert_eq!(
            Config::from_vars(&ok).unwrap().directory_rpc_timeout,
            Duration::from_millis(250)
        );

        let bad = with(base_vars(), "DIRECTORY_RPC_TIMEOUT_MS", "0");
        assert!(matches!(
            Config::from_vars(&bad),
            Err(ConfigError::InvalidDirectoryTimeout(_))
        ));
    }

    #[test]
    fn test_explicit_gateway_id() {
        let vars = with(base_vars(), "GATEWAY_ID", "gateway-test-01");
        assert_eq!(Config::from_vars(&vars).unwrap().gateway_id, "gateway-test-01");
    }

    #[test]
    fn test_debug_redacts_redis_url() {
        let vars = with(base_vars(), "REDIS_URL", "redis://:hunter2@cache:6379");
        let config = Config::from_vars(&vars).unwrap();

        let debug_str = format!("{:?}", config);
        assert!(!debug_str.contains("hunter2"));
        assert!(debug_str.contains("[REDACTED]"));
        assert_eq!(config.redis_url.expose_secret(), "redis://:hunter2@cache:6379");
    }
}
