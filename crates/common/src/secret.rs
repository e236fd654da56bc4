//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] so services share one vocabulary for credentials.
//! `SecretString` implements `Debug` with redaction, so any config struct that
//! derives or hand-writes `Debug` over one stays safe to log.
//!
//! Use `SecretString` for:
//! - Connection URLs carrying credentials (`redis://:password@host:6379`)
//! - Bearer tokens held outside the request that carried them
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let redis_url = SecretString::from("redis://:hunter2@localhost:6379");
//! assert!(!format!("{redis_url:?}").contains("hunter2"));
//!
//! // Reading the value is always explicit
//! let url: &str = redis_url.expose_secret();
//! assert!(url.starts_with("redis://"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};
