//! Signaling Router
//!
//! Per-message dispatch: registration and discovery mutate or read the
//! shared tables, relay kinds are forwarded verbatim to the target's live
//! transport. Relay never queues; an offline target is reported back to
//! the sender and the message is dropped.

use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::auth::{AuthorizationGrant, GrantAuthority, GrantError};
use crate::directory::{ConnectionInfo, PeerDirectory};
use crate::error::SignalError;
use crate::protocol::{Inbound, Outbound, PeerSummary, RelayKind};
use crate::registry::{Connection, ConnectionRegistry, PqAdvertisement};

/// Per-connection state
pub struct Session {
    connection: Connection,
    bound_user: Option<String>,
    address: Option<String>,
}

impl Session {
    pub fn new(connection: Connection, address: Option<String>) -> Self {
        Self {
            connection,
            bound_user: None,
            address,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// User ID this transport last registered as
    pub fn bound_user(&self) -> Option<&str> {
        self.bound_user.as_deref()
    }

    /// Queue a reply on this session's own transport
    pub fn reply(&self, message: &Outbound) -> bool {
        match message.to_bytes() {
            Ok(bytes) => self.connection.send(bytes),
            Err(e) => {
                warn!("Failed to encode reply: {}", e);
                false
            }
        }
    }
}

/// Token checks applied to `register`
pub struct Admission {
    pub authority: GrantAuthority,
    pub require_token: bool,
    pub audience: Option<String>,
}

/// Routes signaling messages between registered peers
pub struct SignalingRouter {
    registry: Arc<ConnectionRegistry>,
    directory: Arc<PeerDirectory>,
    admission: Option<Admission>,
    /// Held for reading across every table mutation, for writing by shutdown
    shutting_down: RwLock<bool>,
}

impl SignalingRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        directory: Arc<PeerDirectory>,
        admission: Option<Admission>,
    ) -> Self {
        Self {
            registry,
            directory,
            admission,
            shutting_down: RwLock::new(false),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// Handle one frame and return the reply for the sender, if any.
    /// Errors are folded into an `error` reply.
    pub fn dispatch(&self, session: &mut Session, frame: &[u8]) -> Option<Outbound> {
        match self.handle_frame(session, frame) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(
                    "Rejected message on {} ({:?}): {}",
                    session.connection.id(),
                    e.kind(),
                    e
                );
                Some(Outbound::from(&e))
            }
        }
    }

    /// Handle one frame.
    ///
    /// A successful relay produces no reply for the sender.
    pub fn handle_frame(
        &self,
        session: &mut Session,
        frame: &[u8],
    ) -> Result<Option<Outbound>, SignalError> {
        match Inbound::parse(frame)? {
            Inbound::Register {
                user_id,
                public_key,
                token,
            } => self.register(session, user_id, public_key, token.as_deref()).map(Some),
            Inbound::Discover { user_id } => Ok(Some(self.discover(&user_id))),
            Inbound::Heartbeat { user_id } => self.heartbeat(&user_id).map(Some),
            Inbound::ListPeers { user_id } => Ok(Some(self.list_peers(user_id.as_deref()))),
            Inbound::Relay { kind, from, to } => {
                self.relay(kind, &from, &to, frame)?;
                Ok(None)
            }
        }
    }

    fn register(
        &self,
        session: &mut Session,
        user_id: String,
        public_key: String,
        token: Option<&str>,
    ) -> Result<Outbound, SignalError> {
        let shutting_down = self.shutting_down.read();
        if *shutting_down {
            return Err(SignalError::ShuttingDown);
        }
        let grant = self.admit(&user_id, token)?;
        let pq = grant
            .filter(|g| g.has_pq_key())
            .map(|g| PqAdvertisement {
                public_key: g.pq_public_key,
                algorithm: g.pq_algorithm,
            });

        // One binding per transport: registering under a new name drops the old one
        if let Some(previous) = session.bound_user.take() {
            if previous != user_id {
                self.registry.unbind(&previous, session.connection.id());
            }
        }

        let replaced = self.registry.bind_advertised(
            &user_id,
            &public_key,
            pq.clone(),
            session.connection.clone(),
        );
        if let Some(old) = replaced {
            if old.connection.id() != session.connection.id() {
                info!(
                    "User {} re-registered from {}, superseding {}",
                    user_id,
                    session.connection.id(),
                    old.connection.id()
                );
            }
        }

        let info = connection_info(public_key, pq, session.address.clone());
        info!(
            "Registered {} on {} from {}",
            user_id,
            session.connection.id(),
            info.address.as_deref().unwrap_or("unknown address")
        );
        self.directory.upsert(&user_id, info);
        session.bound_user = Some(user_id.clone());

        Ok(Outbound::Registered {
            success: true,
            user_id,
        })
    }

    /// Verify the registration token, if admission control is configured
    fn admit(
        &self,
        user_id: &str,
        token: Option<&str>,
    ) -> Result<Option<AuthorizationGrant>, SignalError> {
        let Some(admission) = &self.admission else {
            if token.is_some() {
                debug!("Ignoring token from {}: no signing secret configured", user_id);
            }
            return Ok(None);
        };

        let Some(token) = token else {
            if admission.require_token {
                return Err(GrantError::Auth("registration token required".to_string()).into());
            }
            return Ok(None);
        };

        let grant = admission
            .authority
            .verify(token, admission.audience.as_deref())?;
        if grant.identity != user_id {
            return Err(GrantError::Auth(format!(
                "token identity {} does not match userId {}",
                grant.identity, user_id
            ))
            .into());
        }
        Ok(Some(grant))
    }

    fn discover(&self, user_id: &str) -> Outbound {
        match self.registry.get(user_id) {
            Some(binding) => {
                let (pq_public_key, pq_algorithm) = match binding.pq {
                    Some(pq) => (Some(pq.public_key), Some(pq.algorithm)),
                    None => (None, None),
                };
                Outbound::DiscoverResponse {
                    user_id: user_id.to_string(),
                    online: true,
                    public_key: Some(binding.public_key),
                    pq_public_key,
                    pq_algorithm,
                }
            }
            None => Outbound::DiscoverResponse {
                user_id: user_id.to_string(),
                online: false,
                public_key: None,
                pq_public_key: None,
                pq_algorithm: None,
            },
        }
    }

    fn heartbeat(&self, user_id: &str) -> Result<Outbound, SignalError> {
        let shutting_down = self.shutting_down.read();
        if *shutting_down {
            return Err(SignalError::ShuttingDown);
        }
        if !self.directory.touch(user_id) {
            // Swept while its transport stayed up: restore it from the registry
            let binding = self
                .registry
                .get(user_id)
                .ok_or_else(|| SignalError::Routing(user_id.to_string()))?;
            self.directory
                .upsert(user_id, connection_info(binding.public_key, binding.pq, None));
        }
        Ok(Outbound::HeartbeatAck {
            user_id: user_id.to_string(),
        })
    }

    fn list_peers(&self, exclude: Option<&str>) -> Outbound {
        let peers = self
            .directory
            .query(exclude)
            .into_iter()
            .map(|entry| PeerSummary {
                online: self.registry.is_online(&entry.peer_id),
                id: entry.peer_id,
                public_key: entry.info.public_key,
            })
            .collect();
        Outbound::PeerList { peers }
    }

    /// Forward `frame` unchanged to `to`, or fail if it has no live transport
    fn relay(&self, kind: RelayKind, from: &str, to: &str, frame: &[u8]) -> Result<(), SignalError> {
        let shutting_down = self.shutting_down.read();
        if *shutting_down {
            return Err(SignalError::ShuttingDown);
        }
        let target = self
            .registry
            .resolve(to)
            .ok_or_else(|| SignalError::Routing(to.to_string()))?;

        if !target.send(frame.to_vec()) {
            debug!("Relay target {} closed before delivery", to);
            return Err(SignalError::Routing(to.to_string()));
        }
        debug!("Relayed {} from {} to {}", kind.as_str(), from, to);
        Ok(())
    }

    /// Release the session's binding, if it still owns it.
    /// Directory entries are left to expire through the sweep.
    pub fn disconnect(&self, session: &mut Session) {
        if let Some(user_id) = session.bound_user.take() {
            if self.registry.unbind(&user_id, session.connection.id()) {
                info!("User {} disconnected", user_id);
            }
        }
    }

    /// Stop routing and clear both tables. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let mut shutting_down = self.shutting_down.write();
        if *shutting_down {
            return;
        }
        *shutting_down = true;
        let dropped = self.registry.drain();
        self.directory.clear();
        info!("Router shut down, released {} bindings", dropped.len());
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutting_down.read()
    }
}

fn connection_info(
    public_key: String,
    pq: Option<PqAdvertisement>,
    address: Option<String>,
) -> ConnectionInfo {
    let (pq_public_key, pq_algorithm) = match pq {
        Some(pq) => (Some(pq.public_key), Some(pq.algorithm)),
        None => (None, None),
    };
    ConnectionInfo {
        public_key: Some(public_key),
        pq_public_key,
        pq_algorithm,
        address,
    }
}
