//! Public Key Text Format
//!
//! Servers hand their v1 public key to listing sites as standard base64 of
//! the X.509 SubjectPublicKeyInfo DER encoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::RsaPublicKey;
use thiserror::Error;

/// Public key text errors.
#[derive(Debug, Error)]
pub enum KeyError {
    /// Text is not valid base64.
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    /// DER does not hold an RSA public key.
    #[error("invalid public key: {0}")]
    Spki(#[from] rsa::pkcs8::spki::Error),
}

/// Encode a public key as base64 SPKI DER.
pub fn encode_public_key(key: &RsaPublicKey) -> Result<String, KeyError> {
    let der = key.to_public_key_der()?;
    Ok(STANDARD.encode(der.as_bytes()))
}

/// Decode a public key from base64 SPKI DER. Surrounding whitespace is ignored.
pub fn decode_public_key(text: &str) -> Result<RsaPublicKey, KeyError> {
    let der = STANDARD.decode(text.trim())?;
    Ok(RsaPublicKey::from_public_key_der(&der)?)
}
