//! Vote Receiving Endpoint
//!
//! Accepts TCP connections from listing sites. Every connection gets its own
//! task and runs the same short exchange:
//!
//! ```text
//! greet (VOTIFIER 2 <challenge>) ─► read ─► classify v1/v2
//!        ─► try credential records in order ─► handler ─► reply (v2 only)
//! ```
//!
//! The whole exchange shares one deadline. Failures are reported per
//! connection and never stop the accept loop.

use rsa::RsaPrivateKey;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::core::clock::{Clock, SystemClock};
use crate::core::token::TokenProvider;
use crate::core::vote::{ProtocolVersion, Vote};
use crate::protocol::{detect_version, greeting, v1, v2, CodecError, V2Response};

/// Default Votifier port.
pub const DEFAULT_PORT: u16 = 8192;

/// Bytes accepted from a peer per connection.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Random bytes in a challenge.
pub const CHALLENGE_BYTES: usize = 24;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Deadline for one whole connection, greeting to reply.
    pub connection_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    ///
    /// `VOTIFIER_BIND_ADDR` and `VOTIFIER_TIMEOUT_SECS`; unset or invalid
    /// values (including a zero timeout) keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: lookup("VOTIFIER_BIND_ADDR")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            connection_timeout: lookup("VOTIFIER_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|&secs: &u64| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.connection_timeout),
        }
    }
}

/// Failure to start serving.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] io::Error),
}

/// Why a single connection did not deliver a vote.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Read or write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Connection deadline expired.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// The OS random source failed.
    #[error("error generating challenge: {0}")]
    Challenge(#[source] rand::Error),

    /// Last credential record could not decode the vote.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Vote decoded but the handler refused it.
    #[error("vote handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    /// The blocking decode task panicked or was cancelled.
    #[error("vote processing task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// No record carries credentials for this protocol.
    #[error("no {0} credentials configured")]
    NoCredentials(ProtocolVersion),
}

/// Receives decoded votes.
///
/// Called concurrently from every connection task.
pub trait VoteHandler: Send + Sync {
    /// Handle one vote. An error lets the next credential record try.
    fn on_vote(&self, vote: &Vote, protocol: ProtocolVersion) -> anyhow::Result<()>;
}

impl<F> VoteHandler for F
where
    F: Fn(&Vote, ProtocolVersion) -> anyhow::Result<()> + Send + Sync,
{
    fn on_vote(&self, vote: &Vote, protocol: ProtocolVersion) -> anyhow::Result<()> {
        self(vote, protocol)
    }
}

/// Receives per-connection failures.
pub trait ErrorObserver: Send + Sync {
    /// Called once for each failed connection.
    fn on_error(&self, peer: SocketAddr, error: &ConnectionError);
}

impl<F> ErrorObserver for F
where
    F: Fn(SocketAddr, &ConnectionError) + Send + Sync,
{
    fn on_error(&self, peer: SocketAddr, error: &ConnectionError) {
        self(peer, error)
    }
}

/// Credentials one receiver accepts: a v1 private key, a v2 token
/// provider, or both.
#[derive(Clone, Default)]
pub struct CredentialRecord {
    /// Decrypts v1 votes.
    pub private_key: Option<RsaPrivateKey>,
    /// Resolves v2 tokens.
    pub tokens: Option<Arc<dyn TokenProvider>>,
}

impl CredentialRecord {
    /// Record accepting both protocols.
    pub fn new(private_key: RsaPrivateKey, tokens: impl TokenProvider + 'static) -> Self {
        Self {
            private_key: Some(private_key),
            tokens: Some(Arc::new(tokens)),
        }
    }

    /// Record accepting v1 only.
    pub fn v1(private_key: RsaPrivateKey) -> Self {
        Self { private_key: Some(private_key), tokens: None }
    }

    /// Record accepting v2 only.
    pub fn v2(tokens: impl TokenProvider + 'static) -> Self {
        Self { private_key: None, tokens: Some(Arc::new(tokens)) }
    }

    /// Whether this record can decode `protocol`.
    pub fn supports(&self, protocol: ProtocolVersion) -> bool {
        match protocol {
            ProtocolVersion::V1 => self.private_key.is_some(),
            ProtocolVersion::V2 => self.tokens.is_some(),
        }
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("v1", &self.private_key.is_some())
            .field("v2", &self.tokens.is_some())
            .finish()
    }
}

/// Fresh per-connection challenge: 24 OS-random bytes, URL-safe base64.
pub fn generate_challenge() -> Result<String, rand::Error> {
    let mut bytes = [0u8; CHALLENGE_BYTES];
    rand::rngs::OsRng.try_fill_bytes(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// The vote server.
///
/// Cheap to clone; clones share records, handler, and shutdown signal.
#[derive(Clone)]
pub struct VoteServer {
    /// Server configuration.
    config: ServerConfig,
    /// Credential records, tried in order.
    records: Arc<[CredentialRecord]>,
    /// Vote callback.
    handler: Arc<dyn VoteHandler>,
    /// Optional failure callback.
    on_error: Option<Arc<dyn ErrorObserver>>,
    /// Time source for lenient v1 timestamps.
    clock: Arc<dyn Clock>,
    /// Shutdown signal.
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl VoteServer {
    /// Create a new vote server.
    pub fn new(
        config: ServerConfig,
        records: Vec<CredentialRecord>,
        handler: impl VoteHandler + 'static,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            records: records.into(),
            handler: Arc::new(handler),
            on_error: None,
            clock: Arc::new(SystemClock),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Report failed connections to `observer`.
    pub fn with_error_observer(mut self, observer: impl ErrorObserver + 'static) -> Self {
        self.on_error = Some(Arc::new(observer));
        self
    }

    /// Replace the system clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of configured credential records.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Votifier listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Stop the accept loop. Connections in flight run to completion.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Run one connection on its own task.
    fn handle_connection(&self, mut stream: TcpStream, addr: SocketAddr) {
        let server = self.clone();

        tokio::spawn(async move {
            match server.handle_stream(&mut stream, addr).await {
                Ok(protocol) => debug!("Connection {} done ({})", addr, protocol),
                Err(e) => {
                    warn!("Error handling vote from {}: {}", addr, e);
                    if let Some(observer) = &server.on_error {
                        observer.on_error(addr, &e);
                    }
                }
            }
        });
    }

    /// Run the exchange on one stream under the connection deadline.
    ///
    /// Returns the protocol of the accepted vote.
    pub async fn handle_stream<S>(&self, stream: &mut S, peer: SocketAddr) -> Result<ProtocolVersion, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let challenge = generate_challenge().map_err(ConnectionError::Challenge)?;
        let deadline = self.config.connection_timeout;

        match timeout(deadline, self.exchange(stream, peer, &challenge)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::Timeout(deadline)),
        }
    }

    async fn exchange<S>(&self, stream: &mut S, peer: SocketAddr, challenge: &str) -> Result<ProtocolVersion, ConnectionError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        stream.write_all(greeting(challenge).as_bytes()).await?;
        stream.flush().await?;

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let mut read = stream.read(&mut buf).await?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed before sending a vote").into());
        }
        // A single byte cannot tell the v2 magic from a v1 ciphertext.
        while read < v2::MAGIC_LEN {
            let n = stream.read(&mut buf[read..]).await?;
            if n == 0 {
                break;
            }
            read += n;
        }

        let protocol = detect_version(&buf[..read]);
        debug!(
            "Connection {} speaks {} (prefix {})",
            peer,
            protocol,
            hex::encode(&buf[..read.min(v2::HEADER_LEN)])
        );

        if protocol == ProtocolVersion::V2 {
            read = fill_frame(stream, &mut buf, read).await?;
        }

        buf.truncate(read);
        let server = self.clone();
        let owned_challenge = challenge.to_string();
        let outcome = tokio::task::spawn_blocking(move || server.try_records(protocol, &buf, &owned_challenge, peer))
            .await?;

        match outcome {
            Ok(()) => {
                if protocol == ProtocolVersion::V2 {
                    respond(stream, &V2Response::ok()).await?;
                }
                Ok(protocol)
            }
            Err(e) => {
                if protocol == ProtocolVersion::V2 {
                    if let Err(write_err) = respond(stream, &V2Response::decode_error(e.to_string())).await {
                        debug!("Could not send error reply to {}: {}", peer, write_err);
                    }
                }
                Err(e)
            }
        }
    }

    /// Try each applicable record until one decodes a vote the handler accepts.
    ///
    /// Blocking: runs RSA decryption and the handler.
    fn try_records(
        &self,
        protocol: ProtocolVersion,
        data: &[u8],
        challenge: &str,
        peer: SocketAddr,
    ) -> Result<(), ConnectionError> {
        let mut last_error = None;

        for (index, record) in self.records.iter().enumerate() {
            let decoded = match (protocol, &record.private_key, &record.tokens) {
                (ProtocolVersion::V1, Some(key), _) => v1::decode(data, key, self.clock.as_ref()),
                (ProtocolVersion::V2, _, Some(tokens)) => v2::decode(data, tokens.as_ref(), challenge),
                _ => continue,
            };

            let vote = match decoded {
                Ok(vote) => vote,
                Err(e) => {
                    debug!("Record {} rejected {} vote from {}: {}", index, protocol, peer, e);
                    last_error = Some(ConnectionError::Codec(e));
                    continue;
                }
            };

            match self.handler.on_vote(&vote, protocol) {
                Ok(()) => {
                    info!("Accepted {} vote from {}: {}", protocol, peer, vote);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Handler refused {} vote from {}: {:#}", protocol, peer, e);
                    last_error = Some(ConnectionError::Handler(e));
                }
            }
        }

        Err(last_error.unwrap_or(ConnectionError::NoCredentials(protocol)))
    }
}

/// Keep reading until the v2 frame announced in `buf[..filled]` is complete,
/// the buffer is full, or the peer stops sending.
async fn fill_frame<S>(stream: &mut S, buf: &mut [u8], mut filled: usize) -> Result<usize, ConnectionError>
where
    S: AsyncRead + Unpin,
{
    loop {
        let wanted = v2::frame_len(&buf[..filled])
            .unwrap_or(v2::HEADER_LEN)
            .min(buf.len());
        if filled >= wanted {
            return Ok(filled);
        }
        let n = stream.read(&mut buf[filled..wanted]).await?;
        if n == 0 {
            return Ok(filled);
        }
        filled += n;
    }
}

async fn respond<S>(stream: &mut S, response: &V2Response) -> Result<(), ConnectionError>
where
    S: AsyncWrite + Unpin,
{
    let json = response.to_json().map_err(io::Error::from)?;
    stream.write_all(json.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
