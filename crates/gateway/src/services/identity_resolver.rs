//! User directory client.
//!
//! Turns a verified token's email claim into the directory's `UserIdentity`
//! with one bounded request/reply call. No retries happen here.

use crate::errors::AuthError;
use crate::observability::metrics::record_directory_request;
use crate::services::transport::{RequestReplyTransport, TransportError};
use async_trait::async_trait;
use common::types::UserIdentity;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

/// Message pattern the directory handles user lookups under.
pub const FIND_USER_PATTERN: &str = "find_user";

/// Resolves a subject email into the directory's user record.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// # Errors
    ///
    /// - `NotFound` - the directory answered that no such user exists
    /// - `UpstreamTimeout` - no answer within the configured timeout
    /// - `UpstreamError` - transport failure or an error reply
    async fn resolve_user(&self, email: &str) -> Result<UserIdentity, AuthError>;
}

/// Directory client over a request/reply transport.
pub struct DirectoryClient {
    transport: Arc<dyn RequestReplyTransport>,
    channel: String,
    timeout: Duration,
}

impl DirectoryClient {
    pub fn new(transport: Arc<dyn RequestReplyTransport>, channel: String, timeout: Duration) -> Self {
        Self {
            transport,
            channel,
            timeout,
        }
    }
}

#[async_trait]
impl IdentityResolver for DirectoryClient {
    #[instrument(skip_all, fields(channel = %self.channel))]
    async fn resolve_user(&self, email: &str) -> Result<UserIdentity, AuthError> {
        let start = Instant::now();
        let call = self.transport.request(
            &self.channel,
            FIND_USER_PATTERN,
            Value::String(email.to_string()),
        );

        // Dropping the call on timeout also releases its reply slot
        let result = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                tracing::warn!(
                    target: "gw.services.identity",
                    timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                    "User directory timed out"
                );
                Err(AuthError::UpstreamTimeout)
            }
            Ok(Err(e)) => {
                tracing::warn!(target: "gw.services.identity", error = %e, "User directory call failed");
                Err(map_transport_error(&e))
            }
            Ok(Ok(Value::Null)) => {
                tracing::debug!(target: "gw.services.identity", "User directory has no matching user");
                Err(AuthError::NotFound)
            }
            Ok(Ok(response)) => serde_json::from_value::<UserIdentity>(response).map_err(|e| {
                tracing::warn!(target: "gw.services.identity", error = %e, "User directory returned an unreadable record");
                AuthError::UpstreamError("invalid user record".to_string())
            }),
        };

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        record_directory_request(status, start.elapsed());

        result
    }
}

fn map_transport_error(error: &TransportError) -> AuthError {
    AuthError::UpstreamError(error.to_string())
}

/// In-process resolver for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Directory(HashMap<String, UserIdentity>),
        Fail(AuthError),
        Slow(Duration, HashMap<String, UserIdentity>),
    }

    /// Resolver with scripted behavior and a call counter.
    pub struct MockIdentityResolver {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl MockIdentityResolver {
        /// Knows exactly `users`, keyed by email.
        pub fn with_users(users: impl IntoIterator<Item = UserIdentity>) -> Self {
            Self::new(Behavior::Directory(index(users)))
        }

        /// Knows nobody.
        pub fn empty() -> Self {
            Self::with_users(Vec::new())
        }

        /// Every lookup fails with `error`.
        pub fn failing(error: AuthError) -> Self {
            Self::new(Behavior::Fail(error))
        }

        /// Answers after `delay`. Useful to exercise timeouts and cancellation.
        pub fn slow(delay: Duration, users: impl IntoIterator<Item = UserIdentity>) -> Self {
            Self::new(Behavior::Slow(delay, index(users)))
        }

        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn index(users: impl IntoIterator<Item = UserIdentity>) -> HashMap<String, UserIdentity> {
        users.into_iter().map(|u| (u.email.clone(), u)).collect()
    }

    fn lookup(users: &HashMap<String, UserIdentity>, email: &str) -> Result<UserIdentity, AuthError> {
        users.get(email).cloned().ok_or(AuthError::NotFound)
    }

    #[async_trait]
    impl IdentityResolver for MockIdentityResolver {
        async fn resolve_user(&self, email: &str) -> Result<UserIdentity, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Directory(users) => lookup(users, email),
                Behavior::Fail(error) => Err(error.clone()),
                Behavior::Slow(delay, users) => {
                    tokio::time::sleep(*delay).await;
                    lookup(users, email)
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockIdentityResolver;
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Transport answering from a script and recording what it was sent.
    struct FakeTransport {
        reply: Result<Value, TransportError>,
        delay: Duration,
        sent: Mutex<Vec<(String, String, Value)>>,
    }

    impl FakeTransport {
        fn replying(reply: Result<Value, TransportError>) -> Arc<Self> {
            Self::delayed(reply, Duration::ZERO)
        }

        fn delayed(reply: Result<Value, TransportError>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                reply,
                delay,
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl RequestReplyTransport for FakeTransport {
        async fn request(
            &self,
            channel: &str,
            pattern: &str,
            data: Value,
        ) -> Result<Value, TransportError> {
            self.sent
                .lock()
                .unwrap()
                .push((channel.to_string(), pattern.to_string(), data));
            tokio::time::sleep(self.delay).await;
            self.reply.clone()
        }
    }

    fn client(transport: Arc<FakeTransport>) -> DirectoryClient {
        DirectoryClient::new(transport, "users.find_user".to_string(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_resolves_known_user() {
        let transport = FakeTransport::replying(Ok(json!({
            "id": "5f1c",
            "email": "a@example.com",
            "displayName": "Ada"
        })));

        let user = client(transport.clone())
            .resolve_user("a@example.com")
            .await
            .unwrap();

        assert_eq!(user.id, "5f1c");
        assert_eq!(user.email, "a@example.com");
        assert_eq!(user.profile["displayName"], "Ada");

        let sent = transport.sent.lock().unwrap();
        assert_eq!(
            sent.first().unwrap(),
            &(
                "users.find_user".to_string(),
                FIND_USER_PATTERN.to_string(),
                json!("a@example.com")
            )
        );
    }

    #[tokio::test]
    async fn test_null_reply_is_not_found() {
        let transport = FakeTransport::replying(Ok(Value::Null));
        assert_eq!(
            client(transport).resolve_user("nobody@example.com").await.unwrap_err(),
            AuthError::NotFound
        );
    }

    #[tokio::test]
    async fn test_slow_directory_times_out() {
        let transport = FakeTransport::delayed(Ok(Value::Null), Duration::from_secs(5));
        assert_eq!(
            client(transport).resolve_user("a@example.com").await.unwrap_err(),
            AuthError::UpstreamTimeout
        );
    }

    #[tokio::test]
    async fn test_transport_failures_are_upstream_errors() {
        for error in [
            TransportError::NoSubscribers("users.find_user".to_string()),
            TransportError::ListenerDisconnected,
            TransportError::Remote("boom".to_string()),
        ] {
            let transport = FakeTransport::replying(Err(error));
            assert!(matches!(
                client(transport).resolve_user("a@example.com").await,
                Err(AuthError::UpstreamError(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_unreadable_record_is_upstream_error() {
        let transport = FakeTransport::replying(Ok(json!({"unexpected": true})));
        assert!(matches!(
            client(transport).resolve_user("a@example.com").await,
            Err(AuthError::UpstreamError(_))
        ));
    }

    #[tokio::test]
    async fn test_mock_resolver() {
        let resolver = MockIdentityResolver::with_users([UserIdentity::new("u1", "a@example.com")]);

        assert_eq!(resolver.resolve_user("a@example.com").await.unwrap().id, "u1");
        assert_eq!(
            resolver.resolve_user("b@example.com").await.unwrap_err(),
            AuthError::NotFound
        );
        assert_eq!(resolver.call_count(), 2);

        let failing = MockIdentityResolver::failing(AuthError::UpstreamTimeout);
        assert_eq!(
            failing.resolve_user("a@example.com").await.unwrap_err(),
            AuthError::UpstreamTimeout
        );
    }
}
