//! Votifier Server
//!
//! Standalone receiving endpoint. Generates a fresh RSA key pair on start,
//! prints the public key and v2 token for listing sites, and logs every
//! vote it accepts.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Context;
use rsa::RsaPrivateKey;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use votifier::{
    core::{encode_public_key, generate_token, StaticTokenProvider},
    network::server::{ConnectionError, CredentialRecord, ServerConfig, VoteServer},
    ProtocolVersion, Vote, VERSION,
};

/// RSA modulus size for the generated v1 key.
const KEY_BITS: usize = 2048;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Votifier Server v{}", VERSION);

    let config = ServerConfig::from_env();

    info!("Generating {}-bit RSA key...", KEY_BITS);
    let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS).context("Failed to generate RSA key")?;
    let public_key = encode_public_key(&private_key.to_public_key()).context("Failed to encode public key")?;

    let token = match std::env::var("VOTIFIER_TOKEN") {
        Ok(token) if !token.is_empty() => token,
        _ => generate_token(),
    };

    println!("Public key: {}", public_key);
    println!("Token: {}", token);

    let records = vec![CredentialRecord::new(private_key, StaticTokenProvider::new(token))];

    let handler = |vote: &Vote, protocol: ProtocolVersion| -> anyhow::Result<()> {
        info!("Got {} vote: {}", protocol, vote);
        Ok(())
    };
    let rejected = Arc::new(AtomicUsize::new(0));
    let counter = rejected.clone();
    let observer = move |_: SocketAddr, _: &ConnectionError| {
        counter.fetch_add(1, Ordering::Relaxed);
    };

    let server = VoteServer::new(config, records, handler).with_error_observer(observer);

    tokio::select! {
        result = server.run() => {
            result.context("Server stopped")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    info!("Rejected {} connection(s)", rejected.load(Ordering::Relaxed));
    Ok(())
}
