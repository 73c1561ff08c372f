//! Network Layer
//!
//! The receiving endpoint and the two sending clients. Everything that
//! touches a socket lives here; encoding and decoding is in `protocol/`.

pub mod client;
pub mod server;

pub use client::{ClientConfig, ClientError, V1Client, V2Client, VoteClient};
pub use server::{
    generate_challenge, ConnectionError, CredentialRecord, ErrorObserver, ServerConfig, ServerError,
    VoteHandler, VoteServer,
};
