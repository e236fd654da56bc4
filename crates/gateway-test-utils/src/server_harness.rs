//! Test server harness for E2E testing
//!
//! Provides `TestGatewayServer` for spawning the real gateway router in tests.

use crate::token_builders::{TEST_EMAIL_CLAIM, TEST_ISSUER};
use gateway::auth::{HttpKeySetSource, KeySetCache, TokenValidator, ValidatorSettings};
use gateway::config::Config;
use gateway::middleware::RequestGuard;
use gateway::observability::metrics::init_metrics_recorder;
use gateway::routes::{self, AppState};
use gateway::services::IdentityResolver;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Test harness for spawning the gateway in E2E tests.
///
/// Keys are fetched over HTTP from `jwks_url` exactly as in production. The
/// user directory is replaced by the given resolver, so no Redis is needed.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_me_flow() -> Result<()> {
///     let keypair = TestKeypair::new(1, "key-1");
///     let jwks = MockJwksServer::serving(&[&keypair]).await;
///     let resolver = Arc::new(MockIdentityResolver::with_users([alice()]));
///     let server = TestGatewayServer::spawn(&jwks.jwks_url(), resolver).await?;
///
///     let response = reqwest::Client::new()
///         .get(format!("{}/api/v1/me", server.url()))
///         .bearer_auth(keypair.sign(&TokenClaimsBuilder::new().build()))
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    config: Config,
    key_cache: KeySetCache,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Spawn a server with the default test configuration.
    pub async fn spawn(
        jwks_url: &str,
        resolver: Arc<dyn IdentityResolver>,
    ) -> Result<Self, anyhow::Error> {
        Self::spawn_with_vars(jwks_url, resolver, &[]).await
    }

    /// Spawn a server, overriding or adding environment variables.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start with an empty key cache (no warm-up fetch)
    pub async fn spawn_with_vars(
        jwks_url: &str,
        resolver: Arc<dyn IdentityResolver>,
        overrides: &[(&str, &str)],
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("AUTH_ISSUER".to_string(), TEST_ISSUER.to_string()),
            ("AUTH_JWKS_URL".to_string(), jwks_url.to_string()),
            ("AUTH_EMAIL_CLAIM".to_string(), TEST_EMAIL_CLAIM.to_string()),
            // Never connected: the directory is the injected resolver
            (
                "REDIS_URL".to_string(),
                "redis://127.0.0.1:6379".to_string(),
            ),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("GATEWAY_ID".to_string(), "gateway-test".to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let key_source = Arc::new(HttpKeySetSource::new(config.jwks_url.clone()));
        let key_cache = KeySetCache::new(key_source, config.jwks_requests_per_minute);
        let validator = Arc::new(TokenValidator::new(
            key_cache.clone(),
            ValidatorSettings::from_config(&config),
        ));
        let guard = Arc::new(RequestGuard::new(validator, resolver));

        let state = Arc::new(AppState {
            config: config.clone(),
            key_cache: key_cache.clone(),
            guard,
        });

        // The global recorder can only be installed once per test process
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => {
                use metrics_exporter_prometheus::PrometheusBuilder;
                PrometheusBuilder::new().build_recorder().handle()
            }
        };

        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            key_cache,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The server's signing key cache.
    pub fn key_cache(&self) -> &KeySetCache {
        &self.key_cache
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
