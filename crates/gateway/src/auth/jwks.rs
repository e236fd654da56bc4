//! Key-set cache for the identity provider's public signing keys.
//!
//! Keys are fetched from the issuer's `/.well-known/jwks.json` endpoint and
//! cached by key ID for the life of the process. There is no TTL: a lookup for
//! an unknown `kid` triggers a refresh, which is how rotations are picked up.
//!
//! # Concurrency
//!
//! - Reads take a shared lock and never touch the network.
//! - Refreshes are single-flight. Callers that miss while a refresh is in
//!   flight wait for it and then re-read instead of fetching again.
//! - Refresh attempts share one sliding-window budget (`RefreshLimiter`).
//!   Exhausting it fails the lookup with `RateLimited` instead of waiting.
//! - The fetch itself runs in a detached task that owns the refresh lock, so
//!   a cancelled request does not abort a refresh other requests wait on.
//!
//! # Security
//!
//! - A failed refresh never replaces the cached key set; stale keys stay usable
//! - Only `RS256` and `EdDSA` signing keys are admitted
//! - HTTPS should be used in production (enforced by deployment config)

use crate::auth::rate_limit::RefreshLimiter;
use crate::errors::AuthError;
use crate::observability::metrics::{record_jwks_lookup, record_jwks_refresh, set_jwks_cached_keys};
use async_trait::async_trait;
use common::jwt::decode_ed25519_public_key_jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Timeout for a single key-set HTTP request.
const JWKS_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Ed25519 public keys are 32 raw bytes.
const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// JSON Web Key from the key-set endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type ("RSA" or "OKP").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Algorithm, when the issuer publishes it.
    #[serde(default)]
    pub alg: Option<String>,

    /// Key use (should be "sig" for signing).
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default)]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default)]
    pub e: Option<String>,

    /// Curve name ("Ed25519" for OKP keys).
    #[serde(default)]
    pub crv: Option<String>,

    /// OKP public key (base64url).
    #[serde(default)]
    pub x: Option<String>,
}

/// Key-set document.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksResponse {
    pub keys: Vec<Jwk>,
}

/// Signature algorithms the gateway accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAlgorithm {
    Rs256,
    EdDsa,
}

impl KeyAlgorithm {
    /// Parse a JOSE `alg` value. Anything outside the allow-list is `None`.
    pub fn from_jose(alg: &str) -> Option<Self> {
        match alg {
            "RS256" => Some(Self::Rs256),
            "EdDSA" => Some(Self::EdDsa),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::EdDsa => "EdDSA",
        }
    }

    pub fn jwt_algorithm(self) -> Algorithm {
        match self {
            Self::Rs256 => Algorithm::RS256,
            Self::EdDsa => Algorithm::EdDSA,
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A public key ready for signature verification. Immutable once built.
#[derive(Clone)]
pub struct SigningKey {
    pub key_id: String,
    pub algorithm: KeyAlgorithm,
    decoding_key: DecodingKey,
}

impl SigningKey {
    pub fn new(key_id: impl Into<String>, algorithm: KeyAlgorithm, decoding_key: DecodingKey) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm,
            decoding_key,
        }
    }

    /// Build a signing key from a JWK.
    ///
    /// Returns a short reason when the JWK is not a usable signing key.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, String> {
        if let Some(key_use) = jwk.key_use.as_deref() {
            if key_use != "sig" {
                return Err(format!("key use '{key_use}' is not 'sig'"));
            }
        }

        let algorithm = match (jwk.kty.as_str(), jwk.crv.as_deref()) {
            ("RSA", _) => KeyAlgorithm::Rs256,
            ("OKP", Some("Ed25519")) => KeyAlgorithm::EdDsa,
            (kty, crv) => return Err(format!("unsupported key type {kty}/{crv:?}")),
        };

        if let Some(alg) = jwk.alg.as_deref() {
            if KeyAlgorithm::from_jose(alg) != Some(algorithm) {
                return Err(format!("alg '{alg}' does not match key type {}", jwk.kty));
            }
        }

        let decoding_key = match algorithm {
            KeyAlgorithm::Rs256 => {
                let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
                    return Err("RSA key missing n or e".to_string());
                };
                DecodingKey::from_rsa_components(n, e).map_err(|e| e.to_string())?
            }
            KeyAlgorithm::EdDsa => {
                let x = jwk.x.as_deref().ok_or("OKP key missing x")?;
                let raw = decode_ed25519_public_key_jwk(x).map_err(|e| e.to_string())?;
                if raw.len() != ED25519_PUBLIC_KEY_LEN {
                    return Err(format!("Ed25519 key is {} bytes", raw.len()));
                }
                DecodingKey::from_ed_der(&raw)
            }
        };

        Ok(Self::new(jwk.kid.clone(), algorithm, decoding_key))
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Where the cache gets its keys from.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetch the complete current key set.
    async fn fetch(&self) -> Result<Vec<SigningKey>, AuthError>;
}

/// Key-set source backed by the issuer's HTTP endpoint.
pub struct HttpKeySetSource {
    jwks_url: String,
    http_client: reqwest::Client,
}

impl HttpKeySetSource {
    pub fn new(jwks_url: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(JWKS_HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "gw.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            jwks_url,
            http_client,
        }
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }
}

#[async_trait]
impl KeySetSource for HttpKeySetSource {
    async fn fetch(&self) -> Result<Vec<SigningKey>, AuthError> {
        tracing::debug!(target: "gw.auth.jwks", url = %self.jwks_url, "Fetching key set");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(target: "gw.auth.jwks", error = %e, "Failed to fetch key set");
                AuthError::KeyFetchError(format!("request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(target: "gw.auth.jwks", status = %status, "Key-set endpoint returned error");
            return Err(AuthError::KeyFetchError(format!("endpoint returned {status}")));
        }

        let jwks: JwksResponse = response.json().await.map_err(|e| {
            tracing::error!(target: "gw.auth.jwks", error = %e, "Failed to parse key set");
            AuthError::KeyFetchError(format!("invalid key set: {e}"))
        })?;

        let total = jwks.keys.len();
        let keys: Vec<SigningKey> = jwks
            .keys
            .iter()
            .filter_map(|jwk| match SigningKey::from_jwk(jwk) {
                Ok(key) => Some(key),
                Err(reason) => {
                    tracing::debug!(target: "gw.auth.jwks", kid = %jwk.kid, reason = %reason, "Skipping JWK");
                    None
                }
            })
            .collect();

        if keys.is_empty() {
            return Err(AuthError::KeyFetchError(format!(
                "no usable signing keys among {total} published"
            )));
        }

        Ok(keys)
    }
}

/// Keys from the last successful refresh.
struct KeySetEntry {
    keys: HashMap<String, Arc<SigningKey>>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entry: Option<KeySetEntry>,
    /// Bumped after every completed fetch attempt.
    generation: u64,
    /// Outcome of the most recent fetch attempt, for callers that waited on it.
    last_error: Option<AuthError>,
}

struct Inner {
    source: Arc<dyn KeySetSource>,
    state: RwLock<CacheState>,
    /// Held for the duration of a refresh; guards the attempt budget too.
    refresh: Arc<Mutex<RefreshLimiter>>,
}

/// Shared, process-lifetime key-set cache.
///
/// Cheap to clone; clones share the same keys, refresh lock and budget.
#[derive(Clone)]
pub struct KeySetCache {
    inner: Arc<Inner>,
}

impl KeySetCache {
    /// Create an empty cache over `source`, allowing `max_refreshes_per_minute`
    /// fetch attempts in any 60-second window.
    pub fn new(source: Arc<dyn KeySetSource>, max_refreshes_per_minute: u32) -> Self {
        Self::with_limiter(source, RefreshLimiter::per_minute(max_refreshes_per_minute))
    }

    pub fn with_limiter(source: Arc<dyn KeySetSource>, limiter: RefreshLimiter) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                state: RwLock::new(CacheState::default()),
                refresh: Arc::new(Mutex::new(limiter)),
            }),
        }
    }

    /// Look a signing key up by key ID, refreshing once on a miss.
    ///
    /// # Errors
    ///
    /// - `UnknownSigningKey` - not present after a refresh
    /// - `RateLimited` - a refresh was needed but the budget is spent
    /// - `KeyFetchError` - the refresh failed
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Arc<SigningKey>, AuthError> {
        let observed = {
            let state = self.inner.state.read().await;
            if let Some(key) = state.entry.as_ref().and_then(|e| e.keys.get(kid)) {
                tracing::debug!(target: "gw.auth.jwks", kid = %kid, "Key-set cache hit");
                record_jwks_lookup("hit");
                return Ok(Arc::clone(key));
            }
            state.generation
        };

        tracing::debug!(target: "gw.auth.jwks", kid = %kid, "Key-set cache miss");
        record_jwks_lookup("miss");

        self.refresh_after(observed).await?;

        let state = self.inner.state.read().await;
        match state.entry.as_ref().and_then(|e| e.keys.get(kid)) {
            Some(key) => Ok(Arc::clone(key)),
            None => {
                tracing::warn!(target: "gw.auth.jwks", kid = %kid, "Key not found in key set after refresh");
                Err(AuthError::UnknownSigningKey)
            }
        }
    }

    /// Refresh the key set now, subject to the refresh budget.
    ///
    /// Used for start-up warm-up.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let observed = self.inner.state.read().await.generation;
        self.refresh_after(observed).await
    }

    /// Drop all cached keys. The next lookup refreshes.
    pub async fn reset(&self) {
        let mut state = self.inner.state.write().await;
        state.entry = None;
        state.last_error = None;
        set_jwks_cached_keys(0);
        tracing::info!(target: "gw.auth.jwks", "Key-set cache reset");
    }

    /// Whether at least one successful refresh has populated the cache.
    pub async fn is_loaded(&self) -> bool {
        self.inner.state.read().await.entry.is_some()
    }

    pub async fn key_count(&self) -> usize {
        self.inner
            .state
            .read()
            .await
            .entry
            .as_ref()
            .map_or(0, |e| e.keys.len())
    }

    /// Time since the last successful refresh.
    pub async fn age(&self) -> Option<Duration> {
        self.inner
            .state
            .read()
            .await
            .entry
            .as_ref()
            .map(|e| e.fetched_at.elapsed())
    }

    /// Single-flight refresh. `observed` is the generation the caller saw
    /// before deciding it needed one.
    async fn refresh_after(&self, observed: u64) -> Result<(), AuthError> {
        let mut limiter = Arc::clone(&self.inner.refresh).lock_owned().await;

        {
            let state = self.inner.state.read().await;
            if state.generation != observed {
                tracing::debug!(target: "gw.auth.jwks", "Key set refreshed while waiting, skipping fetch");
                return match &state.last_error {
                    Some(error) => Err(error.clone()),
                    None => Ok(()),
                };
            }
        }

        if let Err(retry_after) = limiter.try_acquire(Instant::now()) {
            tracing::warn!(
                target: "gw.auth.jwks",
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "Key-set refresh rate limited"
            );
            record_jwks_refresh("rate_limited", Duration::ZERO);
            return Err(AuthError::RateLimited);
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            // Lock is released when the fetch completes, not when the caller goes away.
            let _limiter = limiter;
            inner.fetch_and_store().await
        });

        task.await.map_err(|e| {
            tracing::error!(target: "gw.auth.jwks", error = %e, "Key-set refresh task failed");
            AuthError::KeyFetchError("refresh task failed".to_string())
        })?
    }
}

impl Inner {
    async fn fetch_and_store(&self) -> Result<(), AuthError> {
        let start = Instant::now();
        let result = self.source.fetch().await;
        let duration = start.elapsed();

        let mut state = self.state.write().await;
        state.generation = state.generation.wrapping_add(1);

        match result {
            Ok(keys) => {
                let keys: HashMap<String, Arc<SigningKey>> = keys
                    .into_iter()
                    .map(|key| (key.key_id.clone(), Arc::new(key)))
                    .collect();

                tracing::info!(target: "gw.auth.jwks", key_count = keys.len(), "Key-set cache refreshed");
                record_jwks_refresh("success", duration);
                set_jwks_cached_keys(keys.len());

                state.entry = Some(KeySetEntry {
                    keys,
                    fetched_at: Instant::now(),
                });
                state.last_error = None;
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    target: "gw.auth.jwks",
                    error = %error,
                    stale_keys = state.entry.as_ref().map_or(0, |e| e.keys.len()),
                    "Key-set refresh failed, keeping cached keys"
                );
                record_jwks_refresh("error", duration);

                state.last_error = Some(error.clone());
                Err(error)
            }
        }
    }
}
