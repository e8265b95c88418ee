//! PQC Signaling Client
//!
//! Development client: registers with a fresh Kyber768 public key, looks
//! up a peer, optionally sends it an offer, then prints whatever arrives.

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use clap::Parser;
use log::{error, info, warn};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::ServerName};
use tokio_rustls::TlsConnector;

use pqc_signaling::protocol::{read_frame, write_frame};
use pqc_signaling::{ClientConfig, PqKeyPair};

const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "pqc-signal-client")]
#[command(about = "PQC Signaling Client - register, discover and offer")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/client.toml")]
    config: PathBuf,

    /// Server host
    #[arg(long)]
    host: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Connect over TLS
    #[arg(long)]
    tls: bool,

    /// User ID to register as
    #[arg(short, long)]
    user_id: Option<String>,

    /// Registration token
    #[arg(long)]
    token: Option<String>,

    /// Peer to look up after registering
    #[arg(long)]
    discover: Option<String>,

    /// Peer to send a test offer to
    #[arg(long)]
    offer_to: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    // Load configuration
    let config = if args.config.exists() {
        ClientConfig::from_file(&args.config.to_string_lossy())?
    } else {
        info!("Config file not found, using defaults");
        ClientConfig::default()
    };

    let host = args.host.clone().unwrap_or(config.server_host.clone());
    let port = args.port.unwrap_or(config.signaling_port);
    let user_id = args.user_id.clone().unwrap_or(config.default_user_id.clone());

    info!("Connecting to server at {}:{}...", host, port);
    let stream = TcpStream::connect((host.as_str(), port)).await?;

    if args.tls || config.use_tls {
        // Certificate verification disabled for self-signed LAN deployments
        let tls_config = rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(host.clone())?;
        let tls_stream = connector.connect(server_name, stream).await?;
        run_session(tls_stream, &args, &user_id).await
    } else {
        run_session(stream, &args, &user_id).await
    }
}

async fn run_session<S>(stream: S, args: &Args, user_id: &str) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let keypair = PqKeyPair::generate();

    let mut register = json!({
        "type": "register",
        "userId": user_id,
        "publicKey": STANDARD.encode(keypair.public_key_bytes()),
    });
    if let Some(token) = &args.token {
        register["token"] = Value::String(token.clone());
    }
    send_message(&mut writer, &register).await?;
    let reply = receive_message(&mut reader).await?;
    if reply["type"] != "registered" {
        error!("Registration failed: {}", reply);
        return Err(anyhow::anyhow!("Registration failed"));
    }
    info!("Registered as {}", user_id);

    if let Some(peer) = &args.discover {
        send_message(&mut writer, &json!({"type": "discover", "userId": peer})).await?;
        let reply = receive_message(&mut reader).await?;
        info!(
            "{} is {}",
            peer,
            if reply["online"] == true { "online" } else { "offline" }
        );
    }

    if let Some(peer) = &args.offer_to {
        let offer = json!({
            "type": "offer",
            "from": user_id,
            "to": peer,
            "offer": {"type": "offer", "sdp": "v=0\r\n"},
        });
        send_message(&mut writer, &offer).await?;
        info!("Sent offer to {}", peer);
    }

    info!("Waiting for messages. Press Ctrl+C to exit.");
    loop {
        tokio::select! {
            message = receive_message(&mut reader) => {
                let message = message?;
                match message["type"].as_str() {
                    Some("error") => warn!("Server error: {}", message["message"]),
                    Some(kind) => info!("Received {}: {}", kind, message),
                    None => warn!("Untyped message: {}", message),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Disconnecting...");
    Ok(())
}

/// Send a signaling message
async fn send_message<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, &serde_json::to_vec(message)?).await?;
    Ok(())
}

/// Receive a signaling message
async fn receive_message<R>(reader: &mut R) -> Result<Value>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, MAX_MESSAGE_SIZE).await? {
        Some(frame) => Ok(serde_json::from_slice(&frame)?),
        None => Err(anyhow::anyhow!("Server closed the connection")),
    }
}

/// Certificate verifier that accepts any certificate (for development)
#[derive(Debug)]
struct NoVerifier;

impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
