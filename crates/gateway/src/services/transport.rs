//! Request/reply messaging over Redis pub/sub.
//!
//! The user directory consumes requests from a well-known channel and publishes
//! each reply on the channel named in the request's `reply_to`. Every gateway
//! instance subscribes to its own reply channel and correlates replies to
//! waiting callers by request ID.
//!
//! # Wire format
//!
//! ```text
//! request: {"id": "<uuid>", "pattern": "find_user", "data": <json>, "reply_to": "<channel>"}
//! reply:   {"id": "<uuid>", "response": <json|null>, "err": <json|null>}
//! ```
//!
//! # Failure model
//!
//! - Publishing to a channel nobody subscribes to fails immediately
//! - Dropping a request future removes its pending entry
//! - When the reply subscription ends, every in-flight request fails and the
//!   listener resubscribes; requests made before it is back fail immediately
//! - Replies with unknown IDs (late, or for a cancelled request) are discarded

use async_trait::async_trait;
use common::secret::{ExposeSecret, SecretString};
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Delay before resubscribing after the reply subscription drops.
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// Transport failures. All of them surface to callers as upstream errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("failed to connect to message transport: {0}")]
    Connection(String),

    #[error("failed to publish request: {0}")]
    Publish(String),

    #[error("no subscriber on channel {0}")]
    NoSubscribers(String),

    #[error("failed to encode request: {0}")]
    Encode(String),

    #[error("reply listener disconnected")]
    ListenerDisconnected,

    #[error("remote handler failed: {0}")]
    Remote(String),
}

/// Request published on the service's channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: Uuid,
    pub pattern: String,
    pub data: Value,
    pub reply_to: String,
}

/// Reply published on the requester's reply channel.
///
/// A `null` (or absent) `response` is a valid answer meaning "nothing found".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub id: Uuid,
    #[serde(default)]
    pub response: Value,
    #[serde(default)]
    pub err: Value,
}

impl ReplyEnvelope {
    fn into_result(self) -> Result<Value, TransportError> {
        match self.err {
            Value::Null => Ok(self.response),
            Value::String(message) => Err(TransportError::Remote(message)),
            other => Err(TransportError::Remote(other.to_string())),
        }
    }
}

/// Asynchronous request/reply call to another service.
#[async_trait]
pub trait RequestReplyTransport: Send + Sync {
    /// Publish `data` under `pattern` on `channel` and wait for the correlated
    /// reply. Does not time out on its own; callers bound the wait.
    async fn request(
        &self,
        channel: &str,
        pattern: &str,
        data: Value,
    ) -> Result<Value, TransportError>;
}

type ReplySender = oneshot::Sender<Result<Value, TransportError>>;

#[derive(Default)]
struct Slots {
    waiters: HashMap<Uuid, ReplySender>,
    // Set while the reply subscription is down
    closed: bool,
}

/// Requests awaiting a reply, keyed by request ID.
///
/// Starts open. [`close`](Self::close) fails every waiter and refuses new
/// registrations until [`reopen`](Self::reopen).
#[derive(Clone, Default)]
pub struct PendingReplies {
    slots: Arc<Mutex<Slots>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a slot for a new request.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::ListenerDisconnected` while closed, since no
    /// reply could be received.
    pub fn register(&self) -> Result<PendingReply, TransportError> {
        let id = Uuid::new_v4();
        let (sender, receiver) = oneshot::channel();

        {
            let mut slots = self.lock();
            if slots.closed {
                return Err(TransportError::ListenerDisconnected);
            }
            slots.waiters.insert(id, sender);
        }

        Ok(PendingReply {
            id,
            receiver,
            table: self.clone(),
        })
    }

    /// Hand a reply to its waiter. Returns false if nobody is waiting for it.
    pub fn complete(&self, reply: ReplyEnvelope) -> bool {
        let Some(sender) = self.lock().waiters.remove(&reply.id) else {
            return false;
        };
        sender.send(reply.into_result()).is_ok()
    }

    /// Fail every waiting request and refuse new ones. Returns how many were
    /// waiting.
    pub fn close(&self, error: &TransportError) -> usize {
        let drained: Vec<ReplySender> = {
            let mut slots = self.lock();
            slots.closed = true;
            slots.waiters.drain().map(|(_, sender)| sender).collect()
        };
        let count = drained.len();
        for sender in drained {
            let _ = sender.send(Err(error.clone()));
        }
        count
    }

    /// Accept registrations again.
    pub fn reopen(&self) {
        self.lock().closed = false;
    }

    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: &Uuid) {
        self.lock().waiters.remove(id);
    }

    // The map stays consistent even if a holder panicked, so poisoning is ignored.
    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One request's reply slot. Dropping it releases the slot.
pub struct PendingReply {
    id: Uuid,
    receiver: oneshot::Receiver<Result<Value, TransportError>>,
    table: PendingReplies,
}

impl PendingReply {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the reply.
    pub async fn wait(mut self) -> Result<Value, TransportError> {
        match (&mut self.receiver).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ListenerDisconnected),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.table.remove(&self.id);
    }
}

/// Request/reply transport over Redis pub/sub.
///
/// Cheap to share: the multiplexed connection is cloned per publish.
pub struct RedisRequestReply {
    connection: MultiplexedConnection,
    reply_channel: String,
    pending: PendingReplies,
}

impl RedisRequestReply {
    /// Connect, subscribe to `reply_channel`, and start the reply listener.
    ///
    /// The listener runs until `cancel` fires; the returned handle completes
    /// when it has stopped.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connection` if Redis is unreachable or the
    /// initial subscription fails.
    pub async fn connect(
        redis_url: &SecretString,
        reply_channel: String,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), TransportError> {
        let client = Client::open(redis_url.expose_secret()).map_err(|e| {
            // Do NOT log the URL; it may carry credentials
            error!(target: "gw.services.transport", error = %e, "Failed to open Redis client");
            TransportError::Connection(format!("failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "gw.services.transport", error = %e, "Failed to connect to Redis");
                TransportError::Connection(format!("failed to connect to Redis: {e}"))
            })?;

        // Subscribe before returning so no reply can be published ahead of us
        let subscription = subscribe(&client, &reply_channel).await?;

        let pending = PendingReplies::new();
        let listener = tokio::spawn(run_reply_listener(
            client,
            reply_channel.clone(),
            pending.clone(),
            cancel,
            subscription,
        ));

        info!(target: "gw.services.transport", reply_channel = %reply_channel, "Request/reply transport connected");

        Ok((
            Self {
                connection,
                reply_channel,
                pending,
            },
            listener,
        ))
    }

    /// Requests currently awaiting a reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl RequestReplyTransport for RedisRequestReply {
    #[instrument(skip(self, data), fields(channel = %channel, pattern = %pattern))]
    async fn request(
        &self,
        channel: &str,
        pattern: &str,
        data: Value,
    ) -> Result<Value, TransportError> {
        // Register first so a fast reply always finds its slot
        let slot = self.pending.register().map_err(|e| {
            warn!(target: "gw.services.transport", "Reply listener is down, failing request");
            e
        })?;

        let envelope = RequestEnvelope {
            id: slot.id(),
            pattern: pattern.to_string(),
            data,
            reply_to: self.reply_channel.clone(),
        };
        let payload =
            serde_json::to_string(&envelope).map_err(|e| TransportError::Encode(e.to_string()))?;

        let mut connection = self.connection.clone();
        let receivers: i64 = connection.publish(channel, payload).await.map_err(|e| {
            warn!(target: "gw.services.transport", error = %e, "Failed to publish request");
            TransportError::Publish(e.to_string())
        })?;

        if receivers == 0 {
            warn!(target: "gw.services.transport", channel = %channel, "No subscriber for request channel");
            return Err(TransportError::NoSubscribers(channel.to_string()));
        }

        debug!(target: "gw.services.transport", request_id = %envelope.id, "Request published");
        slot.wait().await
    }
}

async fn subscribe(client: &Client, channel: &str) -> Result<redis::aio::PubSub, TransportError> {
    let mut pubsub = client.get_async_pubsub().await.map_err(|e| {
        error!(target: "gw.services.transport", error = %e, "Failed to open pub/sub connection");
        TransportError::Connection(format!("failed to open pub/sub connection: {e}"))
    })?;

    pubsub.subscribe(channel).await.map_err(|e| {
        error!(target: "gw.services.transport", error = %e, channel = %channel, "Failed to subscribe");
        TransportError::Connection(format!("failed to subscribe: {e}"))
    })?;

    Ok(pubsub)
}

/// Route replies to waiters until cancelled, resubscribing whenever the
/// subscription ends.
async fn run_reply_listener(
    client: Client,
    channel: String,
    pending: PendingReplies,
    cancel: CancellationToken,
    first: redis::aio::PubSub,
) {
    let mut next = Some(first);

    loop {
        let pubsub = match next.take() {
            Some(pubsub) => pubsub,
            None => {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(RESUBSCRIBE_DELAY) => {}
                }
                match subscribe(&client, &channel).await {
                    Ok(pubsub) => {
                        pending.reopen();
                        info!(target: "gw.services.transport", channel = %channel, "Reply listener resubscribed");
                        pubsub
                    }
                    Err(_) => continue,
                }
            }
        };

        let mut messages = pubsub.into_on_message();
        let cancelled = loop {
            tokio::select! {
                () = cancel.cancelled() => break true,
                message = messages.next() => match message {
                    Some(message) => handle_reply(&pending, &message),
                    None => break false,
                },
            }
        };

        let failed = pending.close(&TransportError::ListenerDisconnected);
        if cancelled {
            info!(target: "gw.services.transport", abandoned = failed, "Reply listener stopped");
            return;
        }
        warn!(target: "gw.services.transport", failed_requests = failed, "Reply subscription ended, resubscribing");
    }

    pending.close(&TransportError::ListenerDisconnected);
    info!(target: "gw.services.transport", "Reply listener stopped");
}

fn handle_reply(pending: &PendingReplies, message: &redis::Msg) {
    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            debug!(target: "gw.services.transport", error = %e, "Discarding non-text reply");
            return;
        }
    };

    match serde_json::from_str::<ReplyEnvelope>(&payload) {
        Ok(reply) => {
            let id = reply.id;
            if !pending.complete(reply) {
                debug!(target: "gw.services.transport", request_id = %id, "Discarding reply with no waiter");
            }
        }
        Err(e) => {
            debug!(target: "gw.services.transport", error = %e, "Discarding malformed reply");
        }
    }
}
