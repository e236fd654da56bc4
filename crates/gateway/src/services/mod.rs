//! Clients for services the gateway depends on.

pub mod identity_resolver;
pub mod transport;

pub use identity_resolver::mock::MockIdentityResolver;
pub use identity_resolver::{DirectoryClient, IdentityResolver};
pub use transport::{RedisRequestReply, RequestReplyTransport, TransportError};
