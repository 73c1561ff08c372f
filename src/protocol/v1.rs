//! Protocol v1
//!
//! The vote is six newline-joined fields encrypted with the server's RSA
//! public key (PKCS#1 v1.5):
//!
//! ```text
//! VOTE\n<service>\n<username>\n<address>\n<timestamp ms>\n
//! ```
//!
//! The ciphertext is exactly one RSA block, so its length equals the modulus
//! size (256 bytes for a 2048-bit key). There is no acknowledgment.

use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::core::clock::{Clock, parse_timestamp_lenient};
use crate::core::vote::Vote;
use super::error::CodecError;

/// Tag in the first field of every v1 payload.
pub const VOTE_TAG: &str = "VOTE";

/// Fields in a v1 payload, counting the empty one after the trailing newline.
pub const FIELD_COUNT: usize = 6;

/// Encrypt a vote for the holder of `key`.
pub fn encode(vote: &Vote, key: &RsaPublicKey, clock: &dyn Clock) -> Result<Vec<u8>, CodecError> {
    for field in [&vote.service_name, &vote.username, &vote.address] {
        if field.contains('\n') {
            return Err(CodecError::format("v1 fields cannot contain newlines"));
        }
    }

    let timestamp = vote.timestamp_or_now(clock).timestamp_millis().to_string();
    let plaintext = [
        VOTE_TAG,
        vote.service_name.as_str(),
        vote.username.as_str(),
        vote.address.as_str(),
        timestamp.as_str(),
        "",
    ]
    .join("\n");

    key.encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, plaintext.as_bytes())
        .map_err(CodecError::Encryption)
}

/// Decrypt a vote with `key`.
///
/// A wrong key shows up as [`CodecError::Decryption`], never as a field
/// error. The timestamp is parsed leniently against `clock`.
pub fn decode(ciphertext: &[u8], key: &RsaPrivateKey, clock: &dyn Clock) -> Result<Vote, CodecError> {
    let plaintext = key
        .decrypt_blinded(&mut rand::thread_rng(), Pkcs1v15Encrypt, ciphertext)
        .map_err(CodecError::Decryption)?;
    let text = String::from_utf8(plaintext)
        .map_err(|_| CodecError::format("payload is not valid utf-8"))?;

    let elements: Vec<&str> = text.split('\n').collect();
    if elements.len() != FIELD_COUNT {
        return Err(CodecError::Format(format!(
            "invalid element count, wanted {}, got {}",
            FIELD_COUNT,
            elements.len()
        )));
    }
    if elements[0] != VOTE_TAG {
        return Err(CodecError::Format(format!(
            "first element is incorrect; expected '{}', got '{}'",
            VOTE_TAG, elements[0]
        )));
    }

    let vote = Vote {
        service_name: elements[1].to_string(),
        username: elements[2].to_string(),
        address: elements[3].to_string(),
        timestamp: Some(parse_timestamp_lenient(elements[4], clock.now())),
    };
    if let Some(field) = vote.missing_field() {
        return Err(CodecError::Format(format!("missing {}", field)));
    }
    Ok(vote)
}

// =============================================================================
// TESTS
// =============================================================================
