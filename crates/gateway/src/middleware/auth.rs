//! Request guard for protected routes.
//!
//! Every protected request walks the same path:
//!
//! ```text
//! Unauthenticated -> TokenPresent -> Validated -> Resolved -> Attached
//!        \________________\_____________\
//!                                        -> Rejected
//! ```
//!
//! The bearer token is taken from the `Authorization` header, validated, and
//! its email claim resolved against the user directory. Only when all of that
//! succeeds is a [`RequestContext`] attached and the handler run. Any failure
//! answers a uniform `401`; the specific kind is logged and counted.

use crate::auth::{TokenClaims, TokenValidator};
use crate::errors::{AuthError, GatewayError};
use crate::observability::metrics::record_guard_rejection;
use crate::services::IdentityResolver;
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use common::types::UserIdentity;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

/// Where a request is in the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStage {
    Unauthenticated,
    TokenPresent,
    Validated,
    Resolved,
    Attached,
}

impl GuardStage {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardStage::Unauthenticated => "unauthenticated",
            GuardStage::TokenPresent => "token_present",
            GuardStage::Validated => "validated",
            GuardStage::Resolved => "resolved",
            GuardStage::Attached => "attached",
        }
    }
}

impl fmt::Display for GuardStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure: the stage the request had reached, and why it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub stage: GuardStage,
    pub error: AuthError,
}

impl Rejection {
    fn at(stage: GuardStage) -> impl FnOnce(AuthError) -> Self {
        move |error| Self { stage, error }
    }
}

/// Per-request identity, read by handlers after the guard ran.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub authenticated_user: Option<UserIdentity>,
}

impl RequestContext {
    pub fn user(&self) -> Option<&UserIdentity> {
        self.authenticated_user.as_ref()
    }
}

/// A request that made it to `Attached`.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub context: RequestContext,
    pub claims: TokenClaims,
}

/// Runs token validation then identity resolution for one request.
pub struct RequestGuard {
    validator: Arc<TokenValidator>,
    resolver: Arc<dyn IdentityResolver>,
}

impl RequestGuard {
    pub fn new(validator: Arc<TokenValidator>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            validator,
            resolver,
        }
    }

    /// Drive a request's headers through the guard.
    ///
    /// Steps run strictly in order; a missing token is rejected before any
    /// network call is made.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Authenticated, Rejection> {
        let token = bearer_token(headers).map_err(Rejection::at(GuardStage::Unauthenticated))?;

        let claims = self
            .validator
            .validate(token)
            .await
            .map_err(Rejection::at(GuardStage::TokenPresent))?;

        let user = self
            .resolver
            .resolve_user(&claims.email)
            .await
            .map_err(Rejection::at(GuardStage::Validated))?;

        // Resolved -> Attached
        Ok(Authenticated {
            context: RequestContext {
                authenticated_user: Some(user),
            },
            claims,
        })
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively. A missing header, another scheme,
/// or an empty token is `MissingCredentials`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AuthError::MissingCredentials)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::MissingCredentials)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingCredentials);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingCredentials);
    }

    Ok(token)
}

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub guard: Arc<RequestGuard>,
}

/// Authentication middleware.
///
/// On success, inserts [`RequestContext`] and [`TokenClaims`] into request
/// extensions and runs the handler.
///
/// # Response
///
/// - 401 Unauthorized with `WWW-Authenticate` for every rejection
#[instrument(skip_all, name = "gw.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    match state.guard.authenticate(req.headers()).await {
        Ok(authenticated) => {
            tracing::debug!(target: "gw.middleware.auth", "Request authenticated");
            req.extensions_mut().insert(authenticated.context);
            req.extensions_mut().insert(authenticated.claims);
            Ok(next.run(req).await)
        }
        Err(Rejection { stage, error }) => {
            tracing::warn!(
                target: "gw.middleware.auth",
                stage = %stage,
                kind = error.kind(),
                error = %error,
                "Request rejected"
            );
            record_guard_rejection(stage.as_str(), error.kind());
            Err(GatewayError::Unauthorized(error))
        }
    }
}

/// The authenticated user, for handlers behind [`require_auth`].
///
/// Rejects with `401` if the guard did not run for this request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .and_then(RequestContext::user)
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| {
                tracing::error!(target: "gw.middleware.auth", "CurrentUser used on a route without the auth guard");
                GatewayError::Unauthorized(AuthError::MissingCredentials)
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::jwks::{KeyAlgorithm, KeySetCache, KeySetSource, SigningKey};
    use crate::auth::{RequiredScopes, ValidatorSettings};
    use crate::services::MockIdentityResolver;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use gateway_test_utils::crypto_fixtures::TestKeypair;
    use gateway_test_utils::token_builders::{TokenClaimsBuilder, TEST_EMAIL_CLAIM, TEST_ISSUER};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    struct CountingSource {
        keypair: TestKeypair,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl KeySetSource for CountingSource {
        async fn fetch(&self) -> Result<Vec<SigningKey>, AuthError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(vec![SigningKey::new(
                self.keypair.kid.clone(),
                KeyAlgorithm::EdDsa,
                self.keypair.decoding_key(),
            )])
        }
    }

    struct Fixture {
        guard: Arc<RequestGuard>,
        source: Arc<CountingSource>,
        resolver: Arc<MockIdentityResolver>,
        keypair: TestKeypair,
    }

    fn fixture(resolver: MockIdentityResolver) -> Fixture {
        let keypair = TestKeypair::new(1, "idp-key-1");
        let source = Arc::new(CountingSource {
            keypair: keypair.clone(),
            fetches: AtomicUsize::new(0),
        });
        let validator = Arc::new(TokenValidator::new(
            KeySetCache::new(source.clone(), 5),
            ValidatorSettings {
                issuer: TEST_ISSUER.to_string(),
                audience: None,
                required_scopes: RequiredScopes::default(),
                email_claim: TEST_EMAIL_CLAIM.to_string(),
                clock_skew: Duration::from_secs(300),
            },
        ));
        let resolver = Arc::new(resolver);
        let guard = Arc::new(RequestGuard::new(validator, resolver.clone()));

        Fixture {
            guard,
            source,
            resolver,
            keypair,
        }
    }

    fn alice() -> UserIdentity {
        UserIdentity::new("user-1", "alice@example.com")
    }

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers_with("Bearer abc.def.ghi")).unwrap(), "abc.def.ghi");
        assert_eq!(bearer_token(&headers_with("bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers_with("BEARER   abc  ")).unwrap(), "abc");
    }

    #[test]
    fn test_bearer_token_missing_or_malformed() {
        assert_eq!(
            bearer_token(&HeaderMap::new()).unwrap_err(),
            AuthError::MissingCredentials
        );
        for value in ["Basic dXNlcjpwYXNz", "Bearer", "Bearer    ", "abc.def.ghi"] {
            assert_eq!(
                bearer_token(&headers_with(value)).unwrap_err(),
                AuthError::MissingCredentials,
                "header {value:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_missing_header_rejected_before_network() {
        let f = fixture(MockIdentityResolver::with_users([alice()]));

        let rejection = f.guard.authenticate(&HeaderMap::new()).await.unwrap_err();

        assert_eq!(
            rejection,
            Rejection {
                stage: GuardStage::Unauthenticated,
                error: AuthError::MissingCredentials
            }
        );
        assert_eq!(f.source.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(f.resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_valid_token_known_user_attached() {
        let f = fixture(MockIdentityResolver::with_users([alice()]));
        let token = f.keypair.sign(&TokenClaimsBuilder::new().build());

        let authenticated = f
            .guard
            .authenticate(&headers_with(&format!("Bearer {token}")))
            .await
            .unwrap();

        assert_eq!(authenticated.context.user(), Some(&alice()));
        assert_eq!(authenticated.claims.email, "alice@example.com");
        assert_eq!(f.resolver.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_rejected_at_validated() {
        let f = fixture(MockIdentityResolver::empty());
        let token = f.keypair.sign(&TokenClaimsBuilder::new().build());

        let rejection = f
            .guard
            .authenticate(&headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();

        assert_eq!(rejection.stage, GuardStage::Validated);
        assert_eq!(rejection.error, AuthError::NotFound);
    }

    #[tokio::test]
    async fn test_invalid_token_never_reaches_resolver() {
        let f = fixture(MockIdentityResolver::with_users([alice()]));
        let token = f.keypair.sign(&TokenClaimsBuilder::new().scope("openid").build());

        let rejection = f
            .guard
            .authenticate(&headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();

        assert_eq!(rejection.stage, GuardStage::TokenPresent);
        assert_eq!(rejection.error, AuthError::InsufficientScope);
        assert_eq!(f.resolver.call_count(), 0);
    }

    #[tokio::test]
    async fn test_directory_failures_rejected() {
        for error in [
            AuthError::UpstreamTimeout,
            AuthError::UpstreamError("down".to_string()),
        ] {
            let f = fixture(MockIdentityResolver::failing(error.clone()));
            let token = f.keypair.sign(&TokenClaimsBuilder::new().build());

            let rejection = f
                .guard
                .authenticate(&headers_with(&format!("Bearer {token}")))
                .await
                .unwrap_err();
            assert_eq!(rejection.error, error);
        }
    }

    async fn whoami(CurrentUser(user): CurrentUser) -> String {
        user.id
    }

    fn app(guard: Arc<RequestGuard>) -> Router {
        let auth_state = Arc::new(AuthState { guard });
        Router::new()
            .route("/whoami", get(whoami))
            .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
    }

    #[tokio::test]
    async fn test_middleware_runs_handler_with_user() {
        let f = fixture(MockIdentityResolver::with_users([alice()]));
        let token = f.keypair.sign(&TokenClaimsBuilder::new().build());

        let request = axum::http::Request::builder()
            .uri("/whoami")
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let response = app(f.guard).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_middleware_rejects_with_401() {
        let f = fixture(MockIdentityResolver::with_users([alice()]));

        let request = axum::http::Request::builder()
            .uri("/whoami")
            .body(Body::empty())
            .unwrap();
        let response = app(f.guard).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key("WWW-Authenticate"));
    }

    #[tokio::test]
    async fn test_current_user_without_guard() {
        let app = Router::new().route("/whoami", get(whoami));

        let request = axum::http::Request::builder()
            .uri("/whoami")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }
}
