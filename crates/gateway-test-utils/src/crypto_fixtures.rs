//! Deterministic cryptographic fixtures for testing
//!
//! Provides reproducible Ed25519 keypairs that can sign JWTs and publish
//! themselves as JWKs. All fixtures are deterministic based on seed values.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use ring::signature::{Ed25519KeyPair, KeyPair};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Test fixture error type
#[derive(Error, Debug)]
pub enum FixtureError {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),
}

/// Ed25519 keypair standing in for one of the identity provider's signing keys.
///
/// # Example
/// ```rust,ignore
/// let keypair = TestKeypair::new(1, "idp-key-1");
/// let token = keypair.sign(&TokenClaimsBuilder::new().build());
/// let jwks = jwks_document(&[&keypair]);
/// ```
#[derive(Clone)]
pub struct TestKeypair {
    pub kid: String,
    public_key: Vec<u8>,
    pkcs8: Vec<u8>,
}

impl TestKeypair {
    /// Create the keypair derived from `seed`. Same seed, same key.
    pub fn new(seed: u8, kid: &str) -> Self {
        Self::try_new(seed, kid).expect("deterministic Ed25519 keypair")
    }

    pub fn try_new(seed: u8, kid: &str) -> Result<Self, FixtureError> {
        let seed_bytes = seed_bytes(seed);

        let key_pair = Ed25519KeyPair::from_seed_unchecked(&seed_bytes).map_err(|e| {
            FixtureError::Crypto(format!("Failed to generate test keypair: {:?}", e))
        })?;

        Ok(Self {
            kid: kid.to_string(),
            public_key: key_pair.public_key().as_ref().to_vec(),
            pkcs8: build_pkcs8_from_seed(&seed_bytes),
        })
    }

    /// Raw 32-byte public key.
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key
    }

    /// Public key as the base64url `x` member of an OKP JWK.
    pub fn public_key_x(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.public_key)
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_ed_der(&self.pkcs8)
    }

    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_ed_der(&self.public_key)
    }

    /// Public JWK as published on a key-set endpoint.
    pub fn jwk(&self) -> serde_json::Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "kid": self.kid,
            "x": self.public_key_x(),
            "alg": "EdDSA",
            "use": "sig",
        })
    }

    /// Sign `claims` as an EdDSA JWT carrying this key's `kid`.
    pub fn sign<T: Serialize>(&self, claims: &T) -> String {
        self.sign_with_kid(claims, &self.kid)
    }

    /// Sign with an arbitrary `kid` header, e.g. one the key set does not know.
    pub fn sign_with_kid<T: Serialize>(&self, claims: &T, kid: &str) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(kid.to_string());
        self.sign_with_header(claims, &header)
    }

    pub fn sign_with_header<T: Serialize>(&self, claims: &T, header: &Header) -> String {
        encode(header, claims, &self.encoding_key()).expect("EdDSA signing with test key")
    }
}

/// Key-set document publishing the given keys.
pub fn jwks_document(keys: &[&TestKeypair]) -> serde_json::Value {
    json!({
        "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>(),
    })
}

fn seed_bytes(seed: u8) -> [u8; 32] {
    let mut seed_bytes = [0u8; 32];
    seed_bytes[0] = seed;
    for (i, byte) in seed_bytes.iter_mut().enumerate().skip(1) {
        *byte = seed.wrapping_mul(i as u8).wrapping_add(i as u8);
    }
    seed_bytes
}

/// Wrap a raw Ed25519 seed in a PKCS#8 v1 document (RFC 8410).
///
/// ring has no API to export PKCS#8 for a seeded keypair.
fn build_pkcs8_from_seed(seed: &[u8; 32]) -> Vec<u8> {
    const PREFIX: [u8; 16] = [
        0x30, 0x2e, // SEQUENCE, 46 bytes
        0x02, 0x01, 0x00, // INTEGER 0 (version)
        0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, // AlgorithmIdentifier, OID 1.3.101.112
        0x04, 0x22, 0x04, 0x20, // OCTET STRING { OCTET STRING (32 bytes) }
    ];

    let mut pkcs8 = Vec::with_capacity(PREFIX.len() + seed.len());
    pkcs8.extend_from_slice(&PREFIX);
    pkcs8.extend_from_slice(seed);
    pkcs8
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{decode, Validation};

    #[test]
    fn test_keypair_is_deterministic() {
        let a = TestKeypair::new(1, "k");
        let b = TestKeypair::new(1, "k");
        assert_eq!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn test_different_seeds_produce_different_keys() {
        let a = TestKeypair::new(1, "k");
        let b = TestKeypair::new(2, "k");
        assert_ne!(a.public_key_bytes(), b.public_key_bytes());
    }

    #[test]
    fn test_pkcs8_round_trips_through_ring() {
        let seed = seed_bytes(7);
        let from_pkcs8 = Ed25519KeyPair::from_pkcs8_maybe_unchecked(&build_pkcs8_from_seed(&seed))
            .expect("valid PKCS#8");
        let keypair = TestKeypair::new(7, "k");
        assert_eq!(from_pkcs8.public_key().as_ref(), keypair.public_key_bytes());
    }

    #[test]
    fn test_signed_token_verifies_with_public_key() {
        let keypair = TestKeypair::new(3, "key-3");
        let claims = json!({"sub": "s", "exp": chrono::Utc::now().timestamp() + 60});

        let token = keypair.sign(&claims);
        let data = decode::<serde_json::Value>(
            &token,
            &keypair.decoding_key(),
            &Validation::new(Algorithm::EdDSA),
        )
        .expect("signature verifies");

        assert_eq!(data.header.kid.as_deref(), Some("key-3"));
        assert_eq!(data.claims["sub"], "s");
    }

    #[test]
    fn test_jwks_document_shape() {
        let a = TestKeypair::new(1, "a");
        let b = TestKeypair::new(2, "b");
        let doc = jwks_document(&[&a, &b]);

        assert_eq!(doc["keys"].as_array().unwrap().len(), 2);
        assert_eq!(doc["keys"][0]["kid"], "a");
        assert_eq!(doc["keys"][1]["kty"], "OKP");
        assert_eq!(doc["keys"][1]["x"].as_str().unwrap().len(), 43);
    }
}
