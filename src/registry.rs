//! Connection Registry
//!
//! Maps a peer identity to the one live transport currently bound to it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Handle to a live transport.
///
/// Frames pushed through the handle are written, in order, by the
/// connection's writer task. Clones share the same transport.
#[derive(Debug, Clone)]
pub struct Connection {
    id: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl Connection {
    pub fn new(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue an already-encoded payload for the transport.
    /// Returns false once the transport is gone.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        self.tx.send(payload).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Post-quantum key a peer advertised through its registration grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PqAdvertisement {
    /// Base64 public key
    pub public_key: String,
    pub algorithm: String,
}

/// A registered peer bound to its transport
#[derive(Debug, Clone)]
pub struct Binding {
    pub user_id: String,
    pub public_key: String,
    pub pq: Option<PqAdvertisement>,
    pub connection: Connection,
    pub registered_at: Instant,
}

/// Identity to transport table
pub struct ConnectionRegistry {
    bindings: RwLock<HashMap<String, Binding>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            bindings: RwLock::new(HashMap::new()),
        }
    }

    /// Bind `user_id` to `connection`, returning the binding it replaced
    pub fn bind(&self, user_id: &str, public_key: &str, connection: Connection) -> Option<Binding> {
        self.bind_advertised(user_id, public_key, None, connection)
    }

    /// Like [`bind`](Self::bind), also recording an advertised PQ key.
    /// The advertisement lives as long as the binding.
    pub fn bind_advertised(
        &self,
        user_id: &str,
        public_key: &str,
        pq: Option<PqAdvertisement>,
        connection: Connection,
    ) -> Option<Binding> {
        let binding = Binding {
            user_id: user_id.to_string(),
            public_key: public_key.to_string(),
            pq,
            connection,
            registered_at: Instant::now(),
        };
        self.bindings.write().insert(user_id.to_string(), binding)
    }

    /// Remove the binding for `user_id` if it still belongs to `connection_id`.
    ///
    /// A transport that was superseded by a newer registration must not
    /// evict the newer binding when it closes.
    pub fn unbind(&self, user_id: &str, connection_id: &str) -> bool {
        let mut bindings = self.bindings.write();
        match bindings.get(user_id) {
            Some(binding) if binding.connection.id() == connection_id => {
                bindings.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Binding> {
        self.bindings.read().get(user_id).cloned()
    }

    /// Transport currently bound to `user_id`
    pub fn resolve(&self, user_id: &str) -> Option<Connection> {
        self.bindings
            .read()
            .get(user_id)
            .map(|binding| binding.connection.clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.bindings.read().contains_key(user_id)
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Drop every binding and return them
    pub fn drain(&self) -> Vec<Binding> {
        self.bindings.write().drain().map(|(_, binding)| binding).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
