//! Body authentication for the vote exchange.
//!
//! Every request and response body is covered by HMAC-SHA256 under the
//! deployment's shared signing key, transmitted as lowercase hex in the
//! `Signature` header. The MAC covers the body bytes only; the protocol's
//! identity is the body plus the key, not the transport.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body MAC in both directions.
pub const SIGNATURE_HEADER: &str = "Signature";

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("signing key rejected by HMAC")]
    InvalidKey,
}

/// Computes the lowercase-hex HMAC-SHA256 of `payload` under `key`.
pub fn sign(key: &[u8], payload: &[u8]) -> Result<String, SignatureError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).map_err(|_| SignatureError::InvalidKey)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a hex signature against `payload` in constant time.
///
/// Malformed hex and wrong-length digests verify false rather than erroring;
/// a peer that cannot produce a well-formed MAC is indistinguishable from one
/// holding the wrong key.
pub fn verify(key: &[u8], payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
