//! # Votifier
//!
//! Vote notifications from server-listing sites to game servers.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         VOTIFIER                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Protocol-independent types                │
//! │  ├── vote.rs     - Vote record and protocol version          │
//! │  ├── clock.rs    - Time source and lenient timestamps        │
//! │  ├── token.rs    - v2 shared-secret lookup                   │
//! │  └── keys.rs     - RSA public key text encoding              │
//! │                                                              │
//! │  protocol/       - Wire codecs                               │
//! │  ├── v1.rs       - RSA PKCS#1 v1.5 encrypted record          │
//! │  ├── v2.rs       - Framed JSON signed with HMAC-SHA256       │
//! │  └── error.rs    - Codec errors                              │
//! │                                                              │
//! │  network/        - Sockets                                   │
//! │  ├── server.rs   - Receiving endpoint                        │
//! │  └── client.rs   - v1 and v2 senders                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Protocols
//!
//! The server greets every connection with `VOTIFIER 2 <challenge>\n`.
//! A v1 sender ignores the greeting and writes one RSA ciphertext. A v2
//! sender writes a `0x733A`-prefixed frame whose signed payload echoes the
//! challenge, then reads a JSON status reply. The server tells them apart
//! by the first two bytes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod network;
pub mod protocol;

// Re-export commonly used types
pub use core::clock::{Clock, SystemClock};
pub use core::token::{ServiceTokens, StaticTokenProvider, TokenProvider};
pub use core::vote::{ProtocolVersion, Vote};
pub use network::client::{V1Client, V2Client, VoteClient};
pub use network::server::{CredentialRecord, ServerConfig, VoteServer};
pub use protocol::CodecError;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
