//! Vote Senders
//!
//! Listing-site side of the protocol. Each send opens a fresh connection,
//! performs the version-specific handshake, and closes. Nothing is retried.

use async_trait::async_trait;
use rsa::RsaPublicKey;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::core::clock::{Clock, SystemClock};
use crate::core::vote::Vote;
use crate::protocol::{parse_greeting, v1, v2, CodecError, V2Response};

/// Largest greeting the v2 client reads.
pub const GREETING_MAX: usize = 64;

/// Largest status reply the v2 client reads.
pub const RESPONSE_MAX: usize = 256;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Limit for establishing the TCP connection.
    pub connect_timeout: Duration,
    /// Limit for the exchange once connected.
    pub io_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            io_timeout: Duration::from_secs(3),
        }
    }
}

/// Errors seen by a sender.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connect failed.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was dialed.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connect or exchange exceeded its limit.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Greeting was not `VOTIFIER 2 <challenge>`.
    #[error("not a v2 server: {0}")]
    Handshake(String),

    /// Vote could not be encoded.
    #[error("error encoding vote: {0}")]
    Codec(#[from] CodecError),

    /// Reply was not a status object.
    #[error("error decoding response: {0}")]
    Response(#[from] serde_json::Error),

    /// Server rejected the vote.
    #[error("remote server error: {cause}: {message}")]
    Remote {
        /// Failure category reported by the server.
        cause: String,
        /// Failure message reported by the server.
        message: String,
    },
}

/// Anything that can deliver a vote to a server.
#[async_trait]
pub trait VoteClient: Send + Sync {
    /// Send one vote over a fresh connection.
    async fn send_vote(&self, vote: &Vote) -> Result<(), ClientError>;
}

async fn dial(addr: &str, config: &ClientConfig) -> Result<TcpStream, ClientError> {
    match timeout(config.connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ClientError::Connect { addr: addr.to_string(), source }),
        Err(_) => Err(ClientError::Timeout(config.connect_timeout)),
    }
}

async fn with_deadline<T>(
    limit: Duration,
    exchange: impl Future<Output = Result<T, ClientError>>,
) -> Result<T, ClientError> {
    timeout(limit, exchange).await.map_err(|_| ClientError::Timeout(limit))?
}

// =============================================================================
// V1
// =============================================================================

/// Sends RSA-encrypted v1 votes. The server never answers, so success only
/// means the ciphertext was written.
pub struct V1Client {
    address: String,
    public_key: RsaPublicKey,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl V1Client {
    /// Client for the server at `address` holding the private half of `public_key`.
    pub fn new(address: impl Into<String>, public_key: RsaPublicKey) -> Self {
        Self {
            address: address.into(),
            public_key,
            config: ClientConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Override timeouts.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the clock used to stamp votes without a timestamp.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Server address.
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl VoteClient for V1Client {
    async fn send_vote(&self, vote: &Vote) -> Result<(), ClientError> {
        let ciphertext = v1::encode(vote, &self.public_key, self.clock.as_ref())?;
        let mut stream = dial(&self.address, &self.config).await?;

        with_deadline(self.config.io_timeout, async {
            stream.write_all(&ciphertext).await?;
            stream.shutdown().await?;
            Ok::<(), ClientError>(())
        })
        .await?;

        debug!("Sent v1 vote to {}", self.address);
        Ok(())
    }
}

// =============================================================================
// V2
// =============================================================================

/// Sends HMAC-signed v2 votes and checks the server's status reply.
pub struct V2Client {
    address: String,
    token: String,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
}

impl V2Client {
    /// Client for the server at `address` sharing `token`.
    pub fn new(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: token.into(),
            config: ClientConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Override timeouts.
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the clock used to stamp votes without a timestamp.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Server address.
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn exchange(&self, stream: &mut TcpStream, vote: &Vote) -> Result<(), ClientError> {
        let mut greeting = [0u8; GREETING_MAX];
        let read = stream.read(&mut greeting).await?;
        let line = std::str::from_utf8(&greeting[..read])
            .map_err(|_| ClientError::Handshake("greeting is not text".into()))?;
        let challenge = parse_greeting(line)
            .ok_or_else(|| ClientError::Handshake(format!("unexpected greeting {:?}", line.trim_end())))?;

        let frame = v2::encode(vote, &self.token, challenge, self.clock.as_ref())?;
        stream.write_all(&frame).await?;

        let mut reply = [0u8; RESPONSE_MAX];
        let read = stream.read(&mut reply).await?;
        let response = V2Response::from_slice(&reply[..read])?;

        if !response.is_ok() {
            return Err(ClientError::Remote {
                cause: response.cause.unwrap_or_default(),
                message: response.error.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl VoteClient for V2Client {
    async fn send_vote(&self, vote: &Vote) -> Result<(), ClientError> {
        let mut stream = dial(&self.address, &self.config).await?;
        with_deadline(self.config.io_timeout, self.exchange(&mut stream, vote)).await?;

        debug!("Sent v2 vote to {}", self.address);
        Ok(())
    }
}

impl std::fmt::Debug for V2Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V2Client")
            .field("address", &self.address)
            .field("token", &"<redacted>")
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::{FixedClock, from_millis};
    use crate::core::token::StaticTokenProvider;
    use crate::protocol::greeting;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;
    use tokio::net::TcpListener;

    const TOKEN: &str = "abcxyz";

    fn short_config() -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(1),
            io_timeout: Duration::from_millis(200),
        }
    }

    /// One-shot fake server: greets, reads one frame, answers with `reply`.
    async fn fake_server(greet: String, reply: &'static str) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(greet.as_bytes()).await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);
            if !reply.is_empty() {
                stream.write_all(reply.as_bytes()).await.unwrap();
            }
            buf
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_v2_ok_reply() {
        let (addr, server) = fake_server(greeting("xyz"), r#"{"status":"ok"}"#).await;
        let client = V2Client::new(addr, TOKEN);

        client.send_vote(&Vote::new("golang", "golang", "127.0.0.1")).await.unwrap();

        let frame = server.await.unwrap();
        let vote = v2::decode(&frame, &StaticTokenProvider::new(TOKEN), "xyz").unwrap();
        assert_eq!(vote.username, "golang");
    }

    #[tokio::test]
    async fn test_v2_status_case_insensitive() {
        let (addr, _server) = fake_server(greeting("xyz"), r#"{"status":"OK"}"#).await;
        let client = V2Client::new(addr, TOKEN);
        assert!(client.send_vote(&Vote::new("svc", "user", "10.0.0.1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_v2_remote_error() {
        let reply = r#"{"status":"error","cause":"decode","error":"invalid signature"}"#;
        let (addr, _server) = fake_server(greeting("xyz"), reply).await;
        let client = V2Client::new(addr, TOKEN);

        let result = client.send_vote(&Vote::new("svc", "user", "10.0.0.1")).await;
        match result {
            Err(ClientError::Remote { cause, message }) => {
                assert_eq!(cause, "decode");
                assert_eq!(message, "invalid signature");
            }
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_v2_handshake_error() {
        let (addr, _server) = fake_server("VOTIFIER 1.9\n".to_string(), "").await;
        let client = V2Client::new(addr, TOKEN).with_config(short_config());

        let result = client.send_vote(&Vote::new("svc", "user", "10.0.0.1")).await;
        assert!(matches!(result, Err(ClientError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_v2_garbage_reply() {
        let (addr, _server) = fake_server(greeting("xyz"), "not json").await;
        let client = V2Client::new(addr, TOKEN);

        let result = client.send_vote(&Vote::new("svc", "user", "10.0.0.1")).await;
        assert!(matches!(result, Err(ClientError::Response(_))));
    }

    #[tokio::test]
    async fn test_v2_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = V2Client::new(addr, TOKEN).with_config(short_config());
        let result = client.send_vote(&Vote::new("svc", "user", "10.0.0.1")).await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = V2Client::new(addr.clone(), TOKEN).with_config(short_config());
        let result = client.send_vote(&Vote::new("svc", "user", "10.0.0.1")).await;
        assert!(matches!(result, Err(ClientError::Connect { addr: a, .. }) if a == addr));
    }

    #[tokio::test]
    async fn test_v1_writes_ciphertext() {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let now = from_millis(1_700_000_000_000).unwrap();
        let (addr, server) = fake_server(greeting("xyz"), "").await;

        let client = V1Client::new(addr, key.to_public_key()).with_clock(FixedClock::new(now));
        client.send_vote(&Vote::new("golang", "golang", "127.0.0.1")).await.unwrap();

        let ciphertext = server.await.unwrap();
        assert_eq!(ciphertext.len(), key.size());
        let vote = v1::decode(&ciphertext, &key, &FixedClock::new(now)).unwrap();
        assert_eq!(vote.address, "127.0.0.1");
        assert_eq!(vote.timestamp, Some(now));
    }

    #[test]
    fn test_debug_hides_token() {
        let client = V2Client::new("127.0.0.1:8192", "secret-value");
        assert!(!format!("{:?}", client).contains("secret-value"));
    }
}
