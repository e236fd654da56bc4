//! Request/reply transport tests against a live Redis.
//!
//! Ignored by default. Run with a Redis reachable at `REDIS_URL`
//! (default `redis://127.0.0.1:6379`):
//!
//! ```text
//! cargo test -p gateway --test transport_tests -- --ignored
//! ```
//!
//! Every test uses its own channels, so they can share one Redis.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use common::secret::SecretString;
use common::types::UserIdentity;
use futures::StreamExt;
use gateway::errors::AuthError;
use gateway::services::transport::{ReplyEnvelope, RequestEnvelope};
use gateway::services::{
    DirectoryClient, IdentityResolver, RedisRequestReply, RequestReplyTransport, TransportError,
};
use redis::AsyncCommands;
use serde_json::{json, Value};
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const RPC_TIMEOUT: Duration = Duration::from_secs(2);

fn redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

fn unique_channel(prefix: &str) -> String {
    format!("{prefix}.{}", Uuid::new_v4())
}

/// Stand-in user directory answering every request on `channel`.
///
/// Subscribed by the time this returns.
async fn spawn_directory<F>(channel: &str, answer: F) -> Result<JoinHandle<()>>
where
    F: Fn(&RequestEnvelope) -> ReplyEnvelope + Send + 'static,
{
    let client = redis::Client::open(redis_url())?;
    let mut publisher = client.get_multiplexed_async_connection().await?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(channel).await?;

    Ok(tokio::spawn(async move {
        let mut requests = pubsub.into_on_message();
        while let Some(message) = requests.next().await {
            let payload: String = message.get_payload().expect("text request");
            let request: RequestEnvelope = serde_json::from_str(&payload).expect("request envelope");
            let reply = serde_json::to_string(&answer(&request)).expect("encode reply");
            let _: i64 = publisher
                .publish(&request.reply_to, reply)
                .await
                .expect("publish reply");
        }
    }))
}

fn found(request: &RequestEnvelope, response: Value) -> ReplyEnvelope {
    ReplyEnvelope {
        id: request.id,
        response,
        err: Value::Null,
    }
}

struct Transport {
    transport: Arc<RedisRequestReply>,
    listener: JoinHandle<()>,
    cancel: CancellationToken,
}

async fn connect() -> Result<Transport> {
    let cancel = CancellationToken::new();
    let (transport, listener) = RedisRequestReply::connect(
        &SecretString::from(redis_url()),
        unique_channel("gateway.replies"),
        cancel.clone(),
    )
    .await?;

    Ok(Transport {
        transport: Arc::new(transport),
        listener,
        cancel,
    })
}

fn directory_client(transport: &Transport, channel: &str) -> DirectoryClient {
    DirectoryClient::new(transport.transport.clone(), channel.to_string(), RPC_TIMEOUT)
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_request_reply_round_trip() -> Result<()> {
    let channel = unique_channel("users");
    let _directory = spawn_directory(&channel, |request| {
        assert_eq!(request.pattern, "find_user");
        found(request, json!({"id": "user-alice", "email": request.data}))
    })
    .await?;
    let t = connect().await?;

    let reply = t
        .transport
        .request(&channel, "find_user", json!("alice@example.com"))
        .await?;

    assert_eq!(reply["id"], "user-alice");
    assert_eq!(reply["email"], "alice@example.com");
    assert_eq!(t.transport.in_flight(), 0);

    Ok(())
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_directory_client_resolves_user() -> Result<()> {
    let channel = unique_channel("users");
    let _directory = spawn_directory(&channel, |request| {
        let email = request.data.as_str().unwrap_or_default();
        let user = UserIdentity::new("user-alice", email);
        found(request, serde_json::to_value(user).unwrap())
    })
    .await?;
    let t = connect().await?;

    let user = directory_client(&t, &channel)
        .resolve_user("alice@example.com")
        .await?;

    assert_eq!(user.id, "user-alice");
    assert_eq!(user.email, "alice@example.com");

    Ok(())
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_null_reply_is_not_found() -> Result<()> {
    let channel = unique_channel("users");
    let _directory = spawn_directory(&channel, |request| found(request, Value::Null)).await?;
    let t = connect().await?;

    let err = directory_client(&t, &channel)
        .resolve_user("nobody@example.com")
        .await
        .unwrap_err();

    assert_eq!(err, AuthError::NotFound);

    Ok(())
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_error_reply_is_upstream_error() -> Result<()> {
    let channel = unique_channel("users");
    let _directory = spawn_directory(&channel, |request| ReplyEnvelope {
        id: request.id,
        response: Value::Null,
        err: json!("database unavailable"),
    })
    .await?;
    let t = connect().await?;

    let err = directory_client(&t, &channel)
        .resolve_user("alice@example.com")
        .await
        .unwrap_err();

    assert!(
        matches!(&err, AuthError::UpstreamError(detail) if detail.contains("database unavailable")),
        "got {err:?}"
    );

    Ok(())
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_no_subscriber_fails_fast() -> Result<()> {
    let channel = unique_channel("nobody-listens");
    let t = connect().await?;

    let err = t
        .transport
        .request(&channel, "find_user", json!("alice@example.com"))
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::NoSubscribers(channel.clone()));
    assert_eq!(t.transport.in_flight(), 0);

    let start = Instant::now();
    let err = directory_client(&t, &channel)
        .resolve_user("alice@example.com")
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::UpstreamError(_)), "got {err:?}");
    assert!(start.elapsed() < RPC_TIMEOUT);

    Ok(())
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_concurrent_replies_reach_their_callers() -> Result<()> {
    let channel = unique_channel("users");
    let _directory =
        spawn_directory(&channel, |request| found(request, request.data.clone())).await?;
    let t = connect().await?;

    let calls: Vec<_> = (0..10)
        .map(|i| {
            let transport = t.transport.clone();
            let channel = channel.clone();
            tokio::spawn(async move {
                let reply = transport.request(&channel, "find_user", json!(i)).await;
                (i, reply)
            })
        })
        .collect();

    for call in calls {
        let (i, reply) = call.await?;
        assert_eq!(reply?, json!(i));
    }
    assert_eq!(t.transport.in_flight(), 0);

    Ok(())
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_requests_fail_fast_once_listener_stopped() -> Result<()> {
    let channel = unique_channel("users");
    let _directory = spawn_directory(&channel, |request| found(request, json!("ok"))).await?;
    let t = connect().await?;

    t.cancel.cancel();
    t.listener.await?;

    // The directory is still up, but the reply could never be received
    let start = Instant::now();
    let err = t
        .transport
        .request(&channel, "find_user", json!("alice@example.com"))
        .await
        .unwrap_err();

    assert_eq!(err, TransportError::ListenerDisconnected);
    assert!(start.elapsed() < RPC_TIMEOUT);
    assert_eq!(t.transport.in_flight(), 0);

    Ok(())
}
