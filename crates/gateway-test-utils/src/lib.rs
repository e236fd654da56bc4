//! # Gateway Test Utilities
//!
//! Shared test utilities for the query gateway.
//!
//! This crate provides:
//! - Deterministic Ed25519 fixtures (fixed keys for reproducible tests)
//! - Embedded RSA keys for `RS256` tokens (`TestRsaKey`)
//! - A JWT claims builder (`TokenClaimsBuilder`)
//! - A wiremock-backed JWKS endpoint (`MockJwksServer`)
//! - Server test harness (`TestGatewayServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let keypair = TestKeypair::new(1, "key-1");
//!     let jwks = MockJwksServer::serving(&[&keypair]).await;
//!
//!     let token = keypair.sign(
//!         &TokenClaimsBuilder::new()
//!             .email("alice@example.com")
//!             .scope("openid profile email")
//!             .build(),
//!     );
//! }
//! ```

pub mod crypto_fixtures;
pub mod jwks_server;
pub mod rsa_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use jwks_server::*;
pub use rsa_fixtures::*;
pub use server_harness::*;
pub use token_builders::*;
