//! HTTP middleware for the gateway.
//!
//! - `auth` - request guard for protected routes
//! - `http_metrics` - per-response metrics, applied outermost

pub mod auth;
pub mod http_metrics;

pub use auth::{require_auth, AuthState, CurrentUser, RequestContext, RequestGuard};
pub use http_metrics::http_metrics_middleware;
