//! Votifier Sender
//!
//! Sends one vote to a Votifier server, the way a listing site would.
//! With `--token` the vote goes out over v2; otherwise `--key` must point
//! at a file holding the server's base64 public key and v1 is used.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use votifier::{core::decode_public_key, V1Client, V2Client, Vote, VoteClient, VERSION};

#[derive(Debug, Parser)]
#[command(
    name = "votifier-send",
    about = "Send a test vote to a Votifier server",
    version = VERSION
)]
struct Args {
    /// Server address
    #[arg(long, env = "VOTIFIER_ADDRESS", default_value = "127.0.0.1:8192")]
    address: String,

    /// File containing the server's base64 public key (v1)
    #[arg(long, env = "VOTIFIER_KEY_FILE", conflicts_with = "token")]
    key: Option<PathBuf>,

    /// Shared token (v2)
    #[arg(long, env = "VOTIFIER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Service name the vote is attributed to
    #[arg(long, default_value = "votifier-send")]
    service: String,

    /// Player who voted
    #[arg(long)]
    user: String,

    /// Voter's network address
    #[arg(long, default_value = "127.0.0.1")]
    user_address: String,
}

impl Args {
    fn client(&self) -> anyhow::Result<Box<dyn VoteClient>> {
        match (&self.token, &self.key) {
            (Some(token), _) => Ok(Box::new(V2Client::new(self.address.clone(), token.clone()))),
            (None, Some(path)) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read key file {}", path.display()))?;
                let key = decode_public_key(&text).context("Invalid public key")?;
                Ok(Box::new(V1Client::new(self.address.clone(), key)))
            }
            (None, None) => bail!("either --token or --key is required"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    let args = Args::parse();
    let client = args.client()?;

    let vote = Vote::new(&args.service, &args.user, &args.user_address);
    client
        .send_vote(&vote)
        .await
        .with_context(|| format!("Failed to send vote to {}", args.address))?;

    info!("Vote sent!");
    Ok(())
}
