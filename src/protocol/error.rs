//! Codec Errors

use thiserror::Error;

/// Errors from encoding or decoding a vote.
///
/// On the receiving side every variant except `MagicMismatch` means
/// "this credential record did not fit", and the endpoint moves on to the
/// next one.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Plaintext too large for the key, or the RSA primitive failed.
    #[error("failed to encrypt vote: {0}")]
    Encryption(#[source] rsa::Error),

    /// Wrong key or corrupted ciphertext.
    #[error("failed to decrypt vote: {0}")]
    Decryption(#[source] rsa::Error),

    /// Malformed fields, JSON, or frame.
    #[error("malformed vote: {0}")]
    Format(String),

    /// Not a v2 frame.
    #[error("v2 magic mismatch")]
    MagicMismatch,

    /// Payload challenge differs from the one issued on this connection.
    #[error("invalid challenge")]
    ChallengeMismatch,

    /// HMAC does not match the payload.
    #[error("invalid signature")]
    SignatureMismatch,
}

impl CodecError {
    /// Shorthand for a [`CodecError::Format`].
    pub fn format(msg: impl Into<String>) -> Self {
        CodecError::Format(msg.into())
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(err: serde_json::Error) -> Self {
        CodecError::Format(format!("invalid json: {}", err))
    }
}
