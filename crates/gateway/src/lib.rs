//! VolunteerX query gateway library.
//!
//! The identity pipeline that sits in front of the query API:
//!
//! ```text
//! bearer token -> TokenValidator -> IdentityResolver -> RequestContext
//!                       |                  |
//!                  KeySetCache      RequestReplyTransport
//!                  (JWKS, HTTP)      (user directory, Redis)
//! ```
//!
//! # Modules
//!
//! - `auth` - Signing key cache and token validation
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Request guard and HTTP metrics
//! - `observability` - Prometheus metrics
//! - `routes` - Axum router setup
//! - `services` - User directory client and message transport

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
pub mod services;
