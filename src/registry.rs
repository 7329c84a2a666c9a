use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::Message;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;

use crate::error::CapacityError;
use crate::protocol::generate_peer_id;

/// Handle held in the registry for one connected peer.
///
/// The `tx` end feeds the connection's writer task; dropping the last clone
/// (registry removal) ends that task and releases the socket.
#[derive(Clone)]
pub struct Peer {
    pub tx: mpsc::UnboundedSender<Message>,
    pub last_heartbeat: Arc<RwLock<Instant>>,
    pub remote_addr: SocketAddr,
}

impl Peer {
    pub fn new(tx: mpsc::UnboundedSender<Message>, remote_addr: SocketAddr) -> Self {
        Self {
            tx,
            last_heartbeat: Arc::new(RwLock::new(Instant::now())),
            remote_addr,
        }
    }

    /// Record liveness proof: a pong or any valid inbound envelope.
    pub fn touch(&self) {
        *self.last_heartbeat.write() = Instant::now();
    }

    /// Time since the last liveness proof.
    pub fn idle_for(&self) -> Duration {
        self.last_heartbeat.read().elapsed()
    }
}

/// Result of a successful admission: the assigned id plus the ids of every
/// peer registered at the moment of admission. Both announcement messages
/// are derived from this single snapshot.
#[derive(Debug)]
pub struct Admission {
    pub id: String,
    pub peers: Vec<String>,
}

/// Concurrent id → peer table, capacity-bounded.
///
/// Lookups and broadcast iteration go straight to the DashMap; admit and
/// remove additionally serialize on the membership mutex so the size bound
/// holds and the admission snapshot is consistent.
pub struct ClientRegistry {
    peers: DashMap<String, Peer>,
    membership: Mutex<()>,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            peers: DashMap::new(),
            membership: Mutex::new(()),
            max_clients,
        }
    }

    /// Register a new connection, failing without mutation when full.
    ///
    /// Ids are generated fresh per admission and never reused; a
    /// reconnecting peer gets a new identity.
    pub fn admit(&self, peer: Peer) -> Result<Admission, CapacityError> {
        let _gate = self.membership.lock();
        let active = self.peers.len();
        if active >= self.max_clients {
            return Err(CapacityError {
                active,
                limit: self.max_clients,
            });
        }
        let id = generate_peer_id();
        let peers = self.peers.iter().map(|entry| entry.key().clone()).collect();
        self.peers.insert(id.clone(), peer);
        Ok(Admission { id, peers })
    }

    pub fn get(&self, id: &str) -> Option<Peer> {
        self.peers.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a peer. The only way an id leaves the registry; returns `None`
    /// when the id was already gone, which is what makes teardown idempotent.
    pub fn remove(&self, id: &str) -> Option<Peer> {
        let _gate = self.membership.lock();
        self.peers.remove(id).map(|(_, peer)| peer)
    }

    /// Snapshot of the current membership, for broadcast and the liveness
    /// sweep. Sends happen against the snapshot, outside any lock.
    pub fn all(&self) -> Vec<(String, Peer)> {
        self.peers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn has_capacity(&self) -> bool {
        self.peers.len() < self.max_clients
    }

    pub fn touch(&self, id: &str) {
        if let Some(peer) = self.peers.get(id) {
            peer.touch();
        }
    }

    /// Drain every entry for shutdown. Announced separately by the caller.
    pub fn drain(&self) -> Vec<(String, Peer)> {
        let _gate = self.membership.lock();
        let drained = self
            .peers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.peers.clear();
        drained
    }
}
