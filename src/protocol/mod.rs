//! Wire codecs for both protocol versions.
//!
//! Every connection opens with the server's greeting line:
//!
//! ```text
//! VOTIFIER 2 <challenge>\n
//! ```
//!
//! v1 senders ignore it; v2 senders sign the challenge into their payload.

pub mod error;
pub mod v1;
pub mod v2;

pub use error::CodecError;
pub use v2::V2Response;

use crate::core::vote::ProtocolVersion;

/// First token of the greeting.
pub const GREETING_TAG: &str = "VOTIFIER";

/// Protocol version advertised in the greeting.
pub const GREETING_VERSION: &str = "2";

/// Greeting line for a connection.
pub fn greeting(challenge: &str) -> String {
    format!("{} {} {}\n", GREETING_TAG, GREETING_VERSION, challenge)
}

/// Extract the challenge from a greeting line.
///
/// Exactly three space-separated tokens are expected: the tag, the version,
/// and a non-empty challenge.
pub fn parse_greeting(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
    let parts: Vec<&str> = line.split(' ').collect();
    match parts.as_slice() {
        [tag, version, challenge]
            if *tag == GREETING_TAG && *version == GREETING_VERSION && !challenge.is_empty() =>
        {
            Some(*challenge)
        }
        _ => None,
    }
}

/// Pick the protocol for a connection from the first bytes it sent.
///
/// Anything that does not start with the v2 magic is treated as a v1
/// ciphertext.
pub fn detect_version(prefix: &[u8]) -> ProtocolVersion {
    if v2::has_magic(prefix) {
        ProtocolVersion::V2
    } else {
        ProtocolVersion::V1
    }
}
