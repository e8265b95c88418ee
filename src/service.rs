//! Signaling Service
//!
//! TCP listener (TLS when configured) that runs one task per connection
//! on top of a shared [`SignalingRouter`], plus the directory sweep timer.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_rustls::rustls::{self, pki_types::PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::auth::GrantAuthority;
use crate::config::{ConfigError, ServerConfig};
use crate::directory::PeerDirectory;
use crate::protocol::{read_frame, write_frame};
use crate::registry::{Connection, ConnectionRegistry};
use crate::router::{Admission, Session, SignalingRouter};

/// How long a closing connection may spend flushing queued replies
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// The signaling server
pub struct SignalingServer {
    config: ServerConfig,
    router: Arc<SignalingRouter>,
    shutdown_tx: watch::Sender<bool>,
}

impl SignalingServer {
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let directory = PeerDirectory::with_windows(
            config.directory.active_window(),
            config.directory.expire_window(),
            config.directory.max_results,
        )
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let admission = match config.auth.api_secret.as_deref() {
            Some(secret) if !secret.is_empty() => Some(Admission {
                authority: GrantAuthority::new(config.auth.api_key.clone(), secret.as_bytes())
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?,
                require_token: config.auth.require_token,
                audience: config.auth.audience.clone(),
            }),
            _ => None,
        };

        let router = SignalingRouter::new(
            Arc::new(ConnectionRegistry::new()),
            Arc::new(directory),
            admission,
        );
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Self {
            config,
            router: Arc::new(router),
            shutdown_tx,
        })
    }

    pub fn router(&self) -> &Arc<SignalingRouter> {
        &self.router
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.config.signaling_host, self.config.signaling_port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("bind signaling listener to {}", addr))?;
        Ok(listener)
    }

    /// Bind and serve until [`stop`](Self::stop) is called
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until [`stop`](Self::stop) is called
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let acceptor = self.tls_acceptor()?;
        let mut shutdown = self.shutdown_tx.subscribe();
        let sweep_shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        info!(
            "PQC signaling server listening on {}{}",
            listener.local_addr()?,
            if acceptor.is_some() { " (TLS)" } else { "" }
        );

        let sweeper = tokio::spawn(sweep_loop(
            self.router.directory().clone(),
            self.config.directory.sweep_interval(),
            sweep_shutdown,
        ));

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    let router = self.router.clone();
                    let shutdown = self.shutdown_tx.subscribe();
                    let max_message_size = self.config.max_message_size;
                    let acceptor = acceptor.clone();

                    tokio::spawn(async move {
                        let result = match acceptor {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    handle_connection(tls_stream, peer_addr, router, shutdown, max_message_size).await
                                }
                                Err(e) => {
                                    error!("TLS handshake failed for {}: {}", peer_addr, e);
                                    return;
                                }
                            },
                            None => handle_connection(stream, peer_addr, router, shutdown, max_message_size).await,
                        };
                        if let Err(e) = result {
                            debug!("Connection {} ended with error: {}", peer_addr, e);
                        }
                    });
                }
                _ = shutdown.changed() => break,
            }
        }

        let _ = sweeper.await;
        info!("Signaling server stopped accepting connections");
        Ok(())
    }

    /// Stop accepting, close every live transport and clear all tables.
    /// Idempotent; safe with zero connections.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        self.router.shutdown();
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn tls_acceptor(&self) -> Result<Option<TlsAcceptor>> {
        let (Some(certfile), Some(keyfile)) = (&self.config.certfile, &self.config.keyfile) else {
            return Ok(None);
        };
        let certs = load_certs(certfile)?;
        let key = load_key(keyfile)?;
        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        Ok(Some(TlsAcceptor::from(Arc::new(tls_config))))
    }
}

/// Serve one transport until it closes or the server stops
async fn handle_connection<S>(
    stream: S,
    peer_addr: SocketAddr,
    router: Arc<SignalingRouter>,
    mut shutdown: watch::Receiver<bool>,
    max_message_size: usize,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    if *shutdown.borrow() {
        return Ok(());
    }

    let (message_tx, mut message_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let mut session = Session::new(Connection::new(message_tx), Some(peer_addr.to_string()));
    info!("New connection {} from {}", session.connection().id(), peer_addr);

    let (mut read_half, mut write_half) = tokio::io::split(stream);

    // Outgoing frames: replies to this peer and relays addressed to it
    let mut writer = tokio::spawn(async move {
        while let Some(payload) = message_rx.recv().await {
            if write_frame(&mut write_half, &payload).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let result = loop {
        tokio::select! {
            frame = read_frame(&mut read_half, max_message_size) => match frame {
                Ok(Some(frame)) => {
                    if let Some(reply) = router.dispatch(&mut session, &frame) {
                        session.reply(&reply);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(anyhow::Error::from(e).context(format!("read from {}", peer_addr))),
            },
            _ = shutdown.changed() => break Ok(()),
        }
    };

    router.disconnect(&mut session);
    drop(session);

    // The writer ends once every handle to this transport is gone
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        writer.abort();
    }
    info!("Client {} disconnected", peer_addr);

    result
}

/// Periodically evict expired directory entries
async fn sweep_loop(
    directory: Arc<PeerDirectory>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Runtime clock, so a paused test runtime drives expiry too
                let removed = directory.sweep(tokio::time::Instant::now().into_std());
                if removed > 0 {
                    debug!("Swept {} expired peers", removed);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

/// Load TLS certificates
fn load_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open certificate file {}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
    Ok(certs)
}

/// Load TLS private key
fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open key file {}", path.display()))?;
    let mut reader = std::io::BufReader::new(file);
    let keys = rustls_pemfile::private_key(&mut reader)?;
    keys.ok_or_else(|| anyhow::anyhow!("No private key found in {}", path.display()))
}
