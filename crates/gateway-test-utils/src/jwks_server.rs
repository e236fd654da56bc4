//! Mock key-set endpoint backed by wiremock.

use crate::crypto_fixtures::{jwks_document, TestKeypair};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path the mock key set is served from.
pub const JWKS_PATH: &str = "/.well-known/jwks.json";

/// Identity-provider stand-in serving a key set.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::new(1, "idp-key-1");
/// let jwks = MockJwksServer::serving(&[&keypair]).await;
/// let source = HttpKeySetSource::new(jwks.jwks_url());
/// ```
pub struct MockJwksServer {
    server: MockServer,
}

impl MockJwksServer {
    /// Start a server with nothing mounted; every request gets a 404.
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Start a server publishing `keys`.
    pub async fn serving(keys: &[&TestKeypair]) -> Self {
        let jwks = Self::start().await;
        jwks.publish(keys).await;
        jwks
    }

    /// Replace whatever is mounted with a key set publishing `keys`.
    pub async fn publish(&self, keys: &[&TestKeypair]) {
        self.mount(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .await;
    }

    /// Start a server publishing arbitrary JWKs, e.g. RSA entries.
    pub async fn serving_jwks(jwks: &[serde_json::Value]) -> Self {
        let server = Self::start().await;
        server.publish_jwks(jwks).await;
        server
    }

    /// Replace whatever is mounted with a key set of raw JWKs.
    pub async fn publish_jwks(&self, jwks: &[serde_json::Value]) {
        self.mount(ResponseTemplate::new(200).set_body_json(json!({ "keys": jwks })))
            .await;
    }

    /// Replace whatever is mounted with an error status.
    pub async fn fail_with(&self, status: u16) {
        self.mount(ResponseTemplate::new(status)).await;
    }

    /// Replace whatever is mounted with a body that is not a key set.
    pub async fn serve_garbage(&self) {
        self.mount(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
            .await;
    }

    /// Resetting also clears the request log used by `fetch_count`.
    async fn mount(&self, response: ResponseTemplate) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    pub fn jwks_url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Number of key-set requests received so far.
    pub async fn fetch_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map_or(0, |requests| requests.len())
    }
}
