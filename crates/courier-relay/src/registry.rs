//! Presence Registry.
//!
//! Tracks which username is logged in on which live connection. Both directions
//! of the index sit behind a single lock so they can never diverge:
//!
//! ```text
//!   "alice" ──► PeerRef(conn 7f3a…)        conn 7f3a… ──► "alice"
//!   "bob"   ──► PeerRef(conn 02c1…)        conn 02c1… ──► "bob"
//!        by_username                            by_connection
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, instrument};

use crate::connection::{ConnId, PeerRef};

#[derive(Default)]
struct PresenceIndex {
    by_username: HashMap<String, PeerRef>,
    by_connection: HashMap<ConnId, String>,
}

impl PresenceIndex {
    fn remove_connection(&mut self, conn_id: ConnId) -> Option<String> {
        let username = self.by_connection.remove(&conn_id)?;
        if self
            .by_username
            .get(&username)
            .is_some_and(|peer| peer.id() == conn_id)
        {
            self.by_username.remove(&username);
        }
        Some(username)
    }
}

/// Bidirectional username ↔ connection index.
///
/// ## Usage
///
/// ```ignore
/// let registry = PresenceRegistry::new();
///
/// // On login:
/// registry.register("alice", peer.clone());
///
/// // When routing:
/// if let Some(peer) = registry.lookup("alice") { /* dispatch */ }
///
/// // On disconnect or failed dispatch:
/// registry.unregister(peer.id());
/// ```
pub struct PresenceRegistry {
    index: RwLock<PresenceIndex>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            index: RwLock::new(PresenceIndex::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, PresenceIndex> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, PresenceIndex> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pair `username` with `peer`, evicting whatever either side was paired with.
    ///
    /// The evicted connection is only unregistered, never closed.
    #[instrument(skip(self, peer), fields(conn = %peer.id()))]
    pub fn register(&self, username: &str, peer: PeerRef) {
        let conn_id = peer.id();
        let mut index = self.write();

        if let Some(previous) = index.remove_connection(conn_id) {
            if previous != username {
                debug!(previous = %previous, "Connection switched username");
            }
        }

        if let Some(stale) = index.by_username.remove(username) {
            index.by_connection.remove(&stale.id());
            debug!(stale_conn = %stale.id(), "Evicted previous connection for username");
        }

        index.by_connection.insert(conn_id, username.to_string());
        index.by_username.insert(username.to_string(), peer);
    }

    /// Connection currently registered for `username`.
    pub fn lookup(&self, username: &str) -> Option<PeerRef> {
        self.read().by_username.get(username).cloned()
    }

    /// Username registered on `conn_id`.
    pub fn username_of(&self, conn_id: ConnId) -> Option<String> {
        self.read().by_connection.get(&conn_id).cloned()
    }

    /// Remove both directions for `conn_id`.
    ///
    /// Returns the username that was registered, None if the connection never logged in.
    #[instrument(skip(self))]
    pub fn unregister(&self, conn_id: ConnId) -> Option<String> {
        let removed = self.write().remove_connection(conn_id);
        if removed.is_none() {
            debug!("Connection was not registered");
        }
        removed
    }

    /// Sorted usernames with a live registration.
    pub fn online_usernames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().by_username.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.read().by_username.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PresenceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = self.read();
        f.debug_struct("PresenceRegistry")
            .field("users", &index.by_username.len())
            .field("connections", &index.by_connection.len())
            .finish()
    }
}
