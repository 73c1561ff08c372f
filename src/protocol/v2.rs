//! Protocol v2
//!
//! ```text
//! ┌──────────────┬──────────────┬────────────────────────────────────┐
//! │ magic 0x733A │ length (u16) │ wrapper JSON                       │
//! │ 2 bytes BE   │ 2 bytes BE   │ {"payload": "...", "signature": …} │
//! └──────────────┴──────────────┴────────────────────────────────────┘
//! ```
//!
//! `payload` is itself a JSON string holding the vote and the challenge the
//! server issued in its greeting. `signature` is HMAC-SHA256 over the exact
//! payload bytes, keyed with the service's token, carried as base64.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::core::clock::{Clock, from_millis};
use crate::core::token::TokenProvider;
use crate::core::vote::Vote;
use super::error::CodecError;

type HmacSha256 = Hmac<Sha256>;

/// Marker at the start of every v2 frame.
pub const MAGIC: u16 = 0x733A;

/// Bytes of the magic.
pub const MAGIC_LEN: usize = 2;

/// Magic plus length.
pub const HEADER_LEN: usize = 4;

/// Outer JSON object of a frame.
#[derive(Debug, Serialize, Deserialize)]
struct Wrapper {
    payload: String,
    #[serde(with = "base64_bytes")]
    signature: Vec<u8>,
}

/// Signed JSON object carried in `Wrapper::payload`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SignedVote {
    service_name: String,
    username: String,
    address: String,
    timestamp: i64,
    challenge: String,
}

/// Whether `bytes` starts with the v2 magic.
pub fn has_magic(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC_LEN && u16::from_be_bytes([bytes[0], bytes[1]]) == MAGIC
}

/// Length the header declares for the wrapper JSON.
pub fn declared_len(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    Some(u16::from_be_bytes([bytes[2], bytes[3]]) as usize)
}

/// Total frame size (header included) announced by a frame prefix.
pub fn frame_len(bytes: &[u8]) -> Option<usize> {
    declared_len(bytes).map(|len| HEADER_LEN + len)
}

fn mac_for(token: &str, payload: &str) -> Result<HmacSha256, CodecError> {
    let mut mac = HmacSha256::new_from_slice(token.as_bytes())
        .map_err(|_| CodecError::format("unusable hmac key"))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

/// Sign a vote for the connection that issued `challenge`.
pub fn encode(vote: &Vote, token: &str, challenge: &str, clock: &dyn Clock) -> Result<Vec<u8>, CodecError> {
    let signed = SignedVote {
        service_name: vote.service_name.clone(),
        username: vote.username.clone(),
        address: vote.address.clone(),
        timestamp: vote.timestamp_or_now(clock).timestamp_millis(),
        challenge: challenge.to_string(),
    };
    let payload = serde_json::to_string(&signed)?;
    let signature = mac_for(token, &payload)?.finalize().into_bytes().to_vec();

    let body = serde_json::to_vec(&Wrapper { payload, signature })?;
    let len = u16::try_from(body.len())
        .map_err(|_| CodecError::Format(format!("frame too large: {} bytes", body.len())))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
    frame.extend_from_slice(&MAGIC.to_be_bytes());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Verify and decode a frame received on the connection that issued
/// `challenge`. Bytes past the declared length are ignored.
pub fn decode(frame: &[u8], tokens: &dyn TokenProvider, challenge: &str) -> Result<Vote, CodecError> {
    if !has_magic(frame) {
        return Err(CodecError::MagicMismatch);
    }
    let declared = declared_len(frame).ok_or_else(|| CodecError::format("missing frame length"))?;
    let rest = &frame[HEADER_LEN..];
    let body = rest.get(..declared).ok_or_else(|| {
        CodecError::Format(format!("truncated frame: declared {} bytes, got {}", declared, rest.len()))
    })?;

    let wrapper: Wrapper = serde_json::from_slice(body)?;
    let signed: SignedVote = serde_json::from_str(&wrapper.payload)?;

    if signed.challenge != challenge {
        return Err(CodecError::ChallengeMismatch);
    }

    let token = tokens.token(&signed.service_name);
    mac_for(&token, &wrapper.payload)?
        .verify_slice(&wrapper.signature)
        .map_err(|_| CodecError::SignatureMismatch)?;

    let timestamp = from_millis(signed.timestamp)
        .ok_or_else(|| CodecError::Format(format!("timestamp out of range: {}", signed.timestamp)))?;
    let vote = Vote {
        service_name: signed.service_name,
        username: signed.username,
        address: signed.address,
        timestamp: Some(timestamp),
    };
    if let Some(field) = vote.missing_field() {
        return Err(CodecError::Format(format!("missing {}", field)));
    }
    Ok(vote)
}

// =============================================================================
// RESPONSE
// =============================================================================

/// Status reply the server writes after a v2 frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2Response {
    /// `ok` or `error`.
    pub status: String,
    /// Failure category (`decode`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl V2Response {
    /// Vote accepted.
    pub fn ok() -> Self {
        Self { status: "ok".into(), cause: None, error: None }
    }

    /// No credential record could decode the vote.
    pub fn decode_error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            cause: Some("decode".into()),
            error: Some(message.into()),
        }
    }

    /// Whether the status is `ok`, ignoring case.
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON bytes. Trailing whitespace is accepted.
    pub fn from_slice(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// TESTS
// =============================================================================
