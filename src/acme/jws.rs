//! JWS flattened-serialization signing for ACME requests (RFC 8555, spec
//! §4.3.1). Grounded on the original's `make_jws`, which builds a
//! `{protected, payload, signature}` object with `alg`/`url`/`nonce` plus
//! either `jwk` or `kid` in the protected header; this crate signs with
//! ES256 via `ring` instead of the original's `libfilezilla` JWS helper.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwsError {
    #[error("failed to generate an ACME account key")]
    KeyGeneration,
    #[error("failed to sign the JWS request")]
    Signing,
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// An ACME account's ES256 key pair, plus its public JWK form.
pub struct JwkKeyPair {
    pkcs8: Vec<u8>,
    jwk: Value,
}

impl JwkKeyPair {
    pub fn generate() -> Result<Self, JwsError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| JwsError::KeyGeneration)?;
        let keypair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
            .map_err(|_| JwsError::KeyGeneration)?;

        let public = keypair.public_key().as_ref();
        // Uncompressed SEC1 point: 0x04 || x(32) || y(32).
        let (x, y) = public[1..].split_at(32);

        Ok(Self {
            pkcs8: pkcs8.as_ref().to_vec(),
            jwk: json!({
                "kty": "EC",
                "crv": "P-256",
                "x": URL_SAFE_NO_PAD.encode(x),
                "y": URL_SAFE_NO_PAD.encode(y),
            }),
        })
    }

    /// Reconstructs a key pair from its stored public JWK and PKCS8 bytes
    /// (for accounts loaded back from `acme/<id>/account.info`).
    pub fn from_parts(pkcs8: Vec<u8>, jwk: Value) -> Self {
        Self { pkcs8, jwk }
    }

    pub fn pkcs8(&self) -> &[u8] {
        &self.pkcs8
    }

    pub fn public_jwk(&self) -> &Value {
        &self.jwk
    }

    /// RFC 7638 JWK thumbprint, used as the key authorization suffix in
    /// http-01 challenge responses.
    pub fn thumbprint(&self) -> String {
        let canonical = format!(
            r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
            self.jwk["x"].as_str().unwrap_or_default(),
            self.jwk["y"].as_str().unwrap_or_default(),
        );
        let digest = ring::digest::digest(&ring::digest::SHA256, canonical.as_bytes());
        URL_SAFE_NO_PAD.encode(digest.as_ref())
    }

    fn signer(&self) -> Result<EcdsaKeyPair, JwsError> {
        let rng = SystemRandom::new();
        EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &self.pkcs8, &rng)
            .map_err(|_| JwsError::KeyGeneration)
    }
}

/// Which identity field goes in the protected header: a bare `jwk` (account
/// creation, key rollover) or a server-issued `kid` (every later request).
pub enum Identity<'a> {
    Jwk,
    Kid(&'a str),
}

/// Builds and signs a flattened JWS: `{protected, payload, signature}`,
/// all fields base64url-encoded per RFC 7515. A `payload` of `Value::Null`
/// produces the empty payload string RFC 8555 uses for POST-as-GET.
pub fn sign_flattened(
    key: &JwkKeyPair,
    payload: &Value,
    url: &str,
    nonce: &str,
    identity: Identity<'_>,
) -> Result<Value, JwsError> {
    let mut protected = Map::new();
    protected.insert("alg".into(), json!("ES256"));
    protected.insert("url".into(), json!(url));
    if !nonce.is_empty() {
        protected.insert("nonce".into(), json!(nonce));
    }
    match identity {
        Identity::Jwk => {
            protected.insert("jwk".into(), key.public_jwk().clone());
        }
        Identity::Kid(kid) => {
            protected.insert("kid".into(), json!(kid));
        }
    }

    let protected_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&Value::Object(protected))?);
    let payload_b64 = if payload.is_null() {
        String::new()
    } else {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload)?)
    };

    let signing_input = format!("{protected_b64}.{payload_b64}");
    let rng = SystemRandom::new();
    let signature = self::JwkKeyPair::signer(key)?
        .sign(&rng, signing_input.as_bytes())
        .map_err(|_| JwsError::Signing)?;

    Ok(json!({
        "protected": protected_b64,
        "payload": payload_b64,
        "signature": URL_SAFE_NO_PAD.encode(signature.as_ref()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_jwk_has_ec_p256_shape() {
        let key = JwkKeyPair::generate().unwrap();
        assert_eq!(key.public_jwk()["kty"], "EC");
        assert_eq!(key.public_jwk()["crv"], "P-256");
        assert!(key.public_jwk()["x"].as_str().is_some());
    }

    #[test]
    fn thumbprint_is_stable_for_the_same_key() {
        let key = JwkKeyPair::generate().unwrap();
        assert_eq!(key.thumbprint(), key.thumbprint());
    }

    #[test]
    fn flattened_jws_uses_jwk_or_kid_exclusively() {
        let key = JwkKeyPair::generate().unwrap();
        let with_jwk = sign_flattened(&key, &json!({"a": 1}), "https://example.com/acct", "nonce1", Identity::Jwk).unwrap();
        assert!(with_jwk.get("protected").is_some());

        let protected_raw = URL_SAFE_NO_PAD
            .decode(with_jwk["protected"].as_str().unwrap())
            .unwrap();
        let protected: Value = serde_json::from_slice(&protected_raw).unwrap();
        assert!(protected.get("jwk").is_some());
        assert!(protected.get("kid").is_none());

        let with_kid = sign_flattened(&key, &json!({"a": 1}), "https://example.com/order", "nonce2", Identity::Kid("acct-1")).unwrap();
        let protected_raw = URL_SAFE_NO_PAD
            .decode(with_kid["protected"].as_str().unwrap())
            .unwrap();
        let protected: Value = serde_json::from_slice(&protected_raw).unwrap();
        assert_eq!(protected["kid"], "acct-1");
        assert!(protected.get("jwk").is_none());
    }

    #[test]
    fn post_as_get_has_empty_payload() {
        let key = JwkKeyPair::generate().unwrap();
        let jws = sign_flattened(&key, &Value::Null, "https://example.com/order/1", "nonce3", Identity::Kid("acct-1")).unwrap();
        assert_eq!(jws["payload"], "");
    }
}
