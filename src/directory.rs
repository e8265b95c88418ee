//! Peer Directory
//!
//! Liveness-tracked view of reachable peers used for discovery. Entries
//! drop out of query results after the active window and are removed by
//! the periodic sweep after the (longer) expire window.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Peers refreshed within this window are reported as active
pub const ACTIVE_WINDOW: Duration = Duration::from_secs(30);

/// Peers not refreshed within this window are swept
pub const EXPIRE_WINDOW: Duration = Duration::from_secs(60);

/// Upper bound on the number of peers returned by a query
pub const MAX_QUERY_RESULTS: usize = 10;

/// Reachability metadata recorded for a peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub public_key: Option<String>,
    pub pq_public_key: Option<String>,
    pub pq_algorithm: Option<String>,
    /// Remote transport address the peer registered from
    pub address: Option<String>,
}

/// A peer as stored in the directory
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub peer_id: String,
    pub info: ConnectionInfo,
    pub last_seen: Instant,
}

impl DirectoryEntry {
    fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}

/// Directory-related errors
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Expire window ({expire:?}) must exceed active window ({active:?})")]
    InvalidWindows { active: Duration, expire: Duration },
}

/// In-memory peer directory
pub struct PeerDirectory {
    peers: RwLock<HashMap<String, DirectoryEntry>>,
    active_window: Duration,
    expire_window: Duration,
    max_results: usize,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            active_window: ACTIVE_WINDOW,
            expire_window: EXPIRE_WINDOW,
            max_results: MAX_QUERY_RESULTS,
        }
    }

    /// Build a directory with custom timing
    pub fn with_windows(
        active_window: Duration,
        expire_window: Duration,
        max_results: usize,
    ) -> Result<Self, DirectoryError> {
        if expire_window <= active_window {
            return Err(DirectoryError::InvalidWindows {
                active: active_window,
                expire: expire_window,
            });
        }
        Ok(Self {
            peers: RwLock::new(HashMap::new()),
            active_window,
            expire_window,
            max_results,
        })
    }

    /// Record or refresh a peer; the latest connection info wins
    pub fn upsert(&self, peer_id: &str, info: ConnectionInfo) {
        self.upsert_at(peer_id, info, Instant::now());
    }

    pub fn upsert_at(&self, peer_id: &str, info: ConnectionInfo, now: Instant) {
        let entry = DirectoryEntry {
            peer_id: peer_id.to_string(),
            info,
            last_seen: now,
        };
        self.peers.write().insert(peer_id.to_string(), entry);
    }

    /// Refresh liveness without touching connection info.
    /// Returns false if the peer is not in the directory.
    pub fn touch(&self, peer_id: &str) -> bool {
        self.touch_at(peer_id, Instant::now())
    }

    pub fn touch_at(&self, peer_id: &str, now: Instant) -> bool {
        match self.peers.write().get_mut(peer_id) {
            Some(entry) => {
                entry.last_seen = entry.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    /// Get a peer by ID, active or not
    pub fn get(&self, peer_id: &str) -> Option<DirectoryEntry> {
        self.peers.read().get(peer_id).cloned()
    }

    /// Active peers, excluding `exclude`, capped at the result limit
    pub fn query(&self, exclude: Option<&str>) -> Vec<DirectoryEntry> {
        self.query_at(exclude, Instant::now())
    }

    pub fn query_at(&self, exclude: Option<&str>, now: Instant) -> Vec<DirectoryEntry> {
        self.peers
            .read()
            .values()
            .filter(|entry| Some(entry.peer_id.as_str()) != exclude)
            .filter(|entry| entry.age(now) < self.active_window)
            .take(self.max_results)
            .cloned()
            .collect()
    }

    /// Remove peers older than the expire window, returning how many went.
    ///
    /// Ages are read under the write lock, so a refresh that lands before the
    /// sweep takes the lock is always seen; one stamped after `now` has age zero.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut peers = self.peers.write();
        let before = peers.len();
        peers.retain(|_, entry| entry.age(now) <= self.expire_window);
        before - peers.len()
    }

    pub fn remove(&self, peer_id: &str) -> Option<DirectoryEntry> {
        self.peers.write().remove(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    pub fn clear(&self) {
        self.peers.write().clear();
    }
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}
