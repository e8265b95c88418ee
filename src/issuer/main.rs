//! PQC Token Issuer
//!
//! Issues registration tokens with the server's shared secret, optionally
//! advertising a post-quantum public key.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::time::Duration;

use pqc_signaling::{GrantAuthority, PqKeyPair, RoomGrant, ServerConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "pqc-issue-token")]
#[command(about = "Issue a signaling registration token")]
struct Args {
    /// Server configuration file holding the api key and secret
    #[arg(short, long, default_value = "config/server.toml")]
    config: PathBuf,

    /// Identity the token is issued for
    #[arg(short, long)]
    identity: String,

    /// Room the grant admits to
    #[arg(short, long, default_value = "lobby")]
    room: String,

    /// Token lifetime in seconds (defaults to the configured ttl)
    #[arg(long)]
    ttl: Option<u64>,

    /// Audience claim
    #[arg(long)]
    audience: Option<String>,

    /// Base64 post-quantum public key to advertise
    #[arg(long, conflicts_with = "generate_pq_key")]
    pq_public_key: Option<String>,

    /// Algorithm label for --pq-public-key
    #[arg(long, default_value = "ML-KEM-768")]
    pq_algorithm: String,

    /// Generate a fresh Kyber768 key pair and advertise its public half
    #[arg(long)]
    generate_pq_key: bool,

    /// Where to write the generated secret key (base64)
    #[arg(long, requires = "generate_pq_key")]
    secret_key_out: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let config = ServerConfig::from_file(&args.config.to_string_lossy())
        .with_context(|| format!("load {}", args.config.display()))?;
    let secret = config
        .auth
        .api_secret
        .clone()
        .context("config has no auth.api_secret")?;
    let authority = GrantAuthority::new(config.auth.api_key.clone(), secret.into_bytes())?;

    let (pq_key, pq_algorithm) = if args.generate_pq_key {
        let keypair = PqKeyPair::generate();
        if let Some(path) = &args.secret_key_out {
            std::fs::write(path, STANDARD.encode(keypair.secret_key_bytes()))
                .with_context(|| format!("write secret key to {}", path.display()))?;
            info!("Wrote Kyber768 secret key to {}", path.display());
        }
        (Some(keypair.public_key_bytes()), PqKeyPair::ALGORITHM.to_string())
    } else if let Some(encoded) = &args.pq_public_key {
        let key = STANDARD
            .decode(encoded)
            .context("--pq-public-key is not valid base64")?;
        (Some(key), args.pq_algorithm.clone())
    } else {
        (None, String::new())
    };

    let ttl = Duration::from_secs(args.ttl.unwrap_or(config.auth.token_ttl_secs));
    let mut builder = authority
        .token()
        .with_identity(&args.identity)
        .with_grant(RoomGrant::join(&args.room))
        .with_ttl(ttl);
    if let Some(audience) = &args.audience {
        builder = builder.with_audience(audience);
    }
    if let Some(key) = &pq_key {
        builder = builder.with_post_quantum_key(key, pq_algorithm);
    }

    let token = builder.to_token()?;
    println!("{}", token);
    Ok(())
}
