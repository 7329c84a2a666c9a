use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{CapacityError, DisconnectReason};
use crate::protocol::{now_ms, Envelope, SystemEnvelope};
use crate::registry::{Admission, ClientRegistry, Peer};

/// Shared relay state: the registry plus the routing, announcement and
/// liveness primitives every connection task goes through.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    registry: ClientRegistry,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

impl Relay {
    pub fn new(config: &Config) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                registry: ClientRegistry::new(config.max_clients),
                heartbeat_interval: config.heartbeat_interval(),
                heartbeat_timeout: config.heartbeat_timeout(),
            }),
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.inner.registry
    }

    /// Admit a connection and emit both admission announcements.
    ///
    /// The welcome's peer list and the `peer-joined` target set are the same
    /// snapshot, taken atomically inside `admit` — no join can interleave
    /// between the snapshot and the announcements.
    pub fn register(&self, peer: Peer) -> Result<String, CapacityError> {
        let remote_addr = peer.remote_addr;
        let Admission { id, peers } = self.inner.registry.admit(peer)?;
        let active = self.inner.registry.len();
        info!(peer_id = %id, %remote_addr, active, "peer connected");
        gauge!("relay_clients_active", active as f64);
        counter!("relay_connections_total", 1);

        self.send_system(
            &id,
            &SystemEnvelope::Id {
                id: id.clone(),
                peers: peers.clone(),
                timestamp: now_ms(),
            },
        );

        let joined = SystemEnvelope::PeerJoined {
            id: id.clone(),
            timestamp: now_ms(),
        };
        if let Ok(text) = serde_json::to_string(&joined) {
            for other in &peers {
                self.send_text(other, text.clone());
            }
        }

        Ok(id)
    }

    /// Route a validated envelope from `sender_id`: stamp the relay's `from`
    /// and `timestamp`, then unicast when `to` resolves, otherwise broadcast
    /// to everyone else.
    pub fn route(&self, sender_id: &str, envelope: Envelope) {
        let envelope = envelope.stamp(sender_id);
        let kind = envelope.payload.kind();

        let target = envelope
            .to
            .as_deref()
            .filter(|to| self.inner.registry.get(to).is_some())
            .map(str::to_string);

        let Ok(text) = serde_json::to_string(&envelope) else {
            return;
        };

        match target {
            Some(to) => {
                debug!(from = %sender_id, to = %to, kind, "relaying unicast");
                counter!("relay_messages_relayed_total", 1, "delivery" => "unicast");
                self.send_text(&to, text);
            }
            None => {
                debug!(from = %sender_id, kind, "relaying broadcast");
                counter!("relay_messages_relayed_total", 1, "delivery" => "broadcast");
                self.broadcast_except(sender_id, text);
            }
        }
    }

    /// Send serialized text to every registered peer except `sender_id`.
    /// Sends are isolated: one dead target never aborts the rest.
    pub fn broadcast_except(&self, sender_id: &str, text: String) {
        for (id, peer) in self.inner.registry.all() {
            if id == sender_id {
                continue;
            }
            if peer.tx.send(Message::Text(text.clone())).is_err() {
                debug!(peer_id = %id, "dropping frame for closing connection");
                counter!("relay_delivery_failures_total", 1);
            }
        }
    }

    fn send_system(&self, id: &str, envelope: &SystemEnvelope) {
        if let Ok(text) = serde_json::to_string(envelope) {
            self.send_text(id, text);
        }
    }

    fn send_text(&self, id: &str, text: String) {
        let Some(peer) = self.inner.registry.get(id) else {
            debug!(peer_id = %id, "send target no longer registered");
            return;
        };
        if peer.tx.send(Message::Text(text)).is_err() {
            debug!(peer_id = %id, "dropping frame for closing connection");
            counter!("relay_delivery_failures_total", 1);
        }
    }

    /// Exactly-once teardown: removal gates the `peer-left` broadcast, so a
    /// second call for the same id (receive loop racing the monitor) is a
    /// no-op.
    pub fn disconnect(&self, id: &str, reason: DisconnectReason) {
        let Some(peer) = self.inner.registry.remove(id) else {
            return;
        };
        let _ = peer.tx.send(Message::Close(None));

        let remaining = self.inner.registry.len();
        info!(peer_id = %id, reason = reason.as_str(), remaining, "peer disconnected");
        gauge!("relay_clients_active", remaining as f64);
        counter!("relay_disconnects_total", 1, "reason" => reason.as_str());

        let left = SystemEnvelope::PeerLeft {
            id: id.to_string(),
            timestamp: now_ms(),
        };
        if let Ok(text) = serde_json::to_string(&left) {
            self.broadcast_except(id, text);
        }
    }

    /// One liveness pass: evict peers silent past the timeout, probe the
    /// rest. A missed pong surfaces as a stale stamp on a later sweep, so
    /// eviction lags silence by up to two sweep periods.
    pub fn sweep(&self) {
        for (id, peer) in self.inner.registry.all() {
            if peer.idle_for() > self.inner.heartbeat_timeout {
                warn!(peer_id = %id, "heartbeat timeout, evicting");
                self.disconnect(&id, DisconnectReason::HeartbeatTimeout);
            } else if peer.tx.send(Message::Ping(Vec::new())).is_err() {
                debug!(peer_id = %id, "ping target already closing");
            }
        }
    }

    /// Periodic sweep task. Aborted during shutdown.
    pub fn spawn_monitor(&self) -> JoinHandle<()> {
        let relay = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(relay.inner.heartbeat_interval);
            // the first tick completes immediately; sweeps start one period in
            interval.tick().await;
            loop {
                interval.tick().await;
                relay.sweep();
            }
        })
    }

    /// Shutdown path: notify every peer, close every connection, drain the
    /// registry. Individual send failures are ignored; the drain always
    /// completes.
    pub fn shutdown(&self) {
        let shutdown = SystemEnvelope::ServerShutdown {
            message: "server shutting down".to_string(),
            timestamp: now_ms(),
        };
        let text = serde_json::to_string(&shutdown).ok();
        let drained = self.inner.registry.drain();
        info!(clients = drained.len(), "closing all connections");
        for (id, peer) in drained {
            if let Some(text) = &text {
                let _ = peer.tx.send(Message::Text(text.clone()));
            }
            let _ = peer.tx.send(Message::Close(None));
            debug!(peer_id = %id, "closed during shutdown");
        }
        gauge!("relay_clients_active", 0.0);
    }
}
