//! Authentication module for the gateway.
//!
//! Validates bearer tokens issued by the external identity provider using
//! public keys from its JWKS endpoint.

pub mod claims;
pub mod jwks;
pub mod jwt;
pub mod rate_limit;

pub use claims::{RequiredScopes, TokenClaims};
pub use jwks::{HttpKeySetSource, KeySetCache, KeySetSource, SigningKey};
pub use jwt::{TokenValidator, ValidatorSettings};
