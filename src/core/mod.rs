//! Core types shared by both protocol versions.
//!
//! Nothing here touches the network; the codecs and endpoints build on it.

pub mod clock;
pub mod keys;
pub mod token;
pub mod vote;

// Re-export core types
pub use clock::{Clock, FixedClock, SystemClock, parse_timestamp_lenient};
pub use keys::{KeyError, decode_public_key, encode_public_key};
pub use token::{ServiceTokens, StaticTokenProvider, TokenProvider, generate_token};
pub use vote::{ProtocolVersion, Vote};
