//! Connection lifecycle management for the relay server
//!
//! This module handles the server-side bookkeeping of live connections:
//! - Connection admission, id assignment and capacity enforcement
//! - Activity tracking for ping-timeout detection
//! - The outbound handle other components use to emit events to a connection
//!
//! Protocol state (match and role) lives in the connection task's own
//! [`crate::session::ConnectionSession`].

use crate::utils::generate_connection_id;
use log::{debug, info, warn};
use serde::Serialize;
use shared::ServerFrame;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Why a connection ended, as reported in the disconnect log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Client sent a close frame
    ClientClose,
    /// Socket stream ended without a close frame
    TransportClose,
    TransportError,
    PingTimeout,
    ServerShutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DisconnectReason::ClientClose => "client namespace disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::ServerShutdown => "server shutting down",
        };
        f.write_str(reason)
    }
}

/// Outbound side of a connection
///
/// Serialized frames are queued on a bounded channel drained by the
/// connection's writer task. A full queue drops the frame; delivery is
/// best-effort and at most once.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: String,
    pub addr: SocketAddr,
    sender: mpsc::Sender<String>,
    shutdown: watch::Sender<Option<DisconnectReason>>,
    created_at: Instant,
    /// Milliseconds after `created_at` of the last inbound frame
    last_seen_ms: AtomicU64,
}

impl ClientHandle {
    pub fn new(id: String, addr: SocketAddr, sender: mpsc::Sender<String>) -> Self {
        let (shutdown, _) = watch::channel(None);
        Self {
            id,
            addr,
            sender,
            shutdown,
            created_at: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Records inbound activity for ping-timeout tracking
    pub fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_seen_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound frame, or since the connection opened
    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.created_at.elapsed().saturating_sub(last_seen)
    }

    /// How long the connection has been open
    pub fn connected_for(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Queues a pre-serialized frame; returns false if it could not be queued
    pub fn send_text(&self, text: String) -> bool {
        match self.sender.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Send queue full for {}, dropping frame", self.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn send_frame(&self, frame: &ServerFrame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                warn!("Failed to serialize frame for {}: {}", self.id, e);
                false
            }
        }
    }

    /// Emits a named event directly to this connection
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) -> bool {
        match ServerFrame::event(event, payload) {
            Ok(frame) => self.send_frame(&frame),
            Err(e) => {
                warn!("Failed to serialize {} for {}: {}", event, self.id, e);
                false
            }
        }
    }

    /// Asks the connection task to terminate with the given reason
    pub fn close(&self, reason: DisconnectReason) {
        self.shutdown.send_replace(Some(reason));
    }

    /// Receiver that resolves once [`ClientHandle::close`] has been called
    pub fn closed(&self) -> watch::Receiver<Option<DisconnectReason>> {
        self.shutdown.subscribe()
    }
}

/// A live connection and its admission metadata
#[derive(Debug)]
pub struct Client {
    pub handle: Arc<ClientHandle>,
    /// Value of the `x-forwarded-for` header at upgrade time
    pub forwarded_for: Option<String>,
}

impl Client {
    pub fn new(handle: Arc<ClientHandle>, forwarded_for: Option<String>) -> Self {
        Self {
            handle,
            forwarded_for,
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.handle.idle_for() > timeout
    }
}

/// Tracks every live connection and enforces the capacity limit
pub struct ClientManager {
    clients: HashMap<String, Client>,
    /// Maximum number of concurrent clients, 0 for unlimited
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            max_clients,
        }
    }

    /// Admits a new connection
    ///
    /// Returns `None` when the server is at capacity. The returned handle is
    /// the only strong owner besides the manager; match groups hold weak
    /// references to it.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        forwarded_for: Option<String>,
        sender: mpsc::Sender<String>,
    ) -> Option<Arc<ClientHandle>> {
        if self.max_clients > 0 && self.clients.len() >= self.max_clients {
            return None;
        }

        let mut id = generate_connection_id();
        while self.clients.contains_key(&id) {
            id = generate_connection_id();
        }

        let handle = Arc::new(ClientHandle::new(id.clone(), addr, sender));
        info!(
            "[socket] connected id={} ip={} forwarded={}",
            id,
            addr.ip(),
            forwarded_for.as_deref().unwrap_or("-")
        );
        self.clients
            .insert(id, Client::new(Arc::clone(&handle), forwarded_for));

        Some(handle)
    }

    /// Removes a connection; returns false if it was already gone
    pub fn remove_client(&mut self, client_id: &str) -> bool {
        match self.clients.remove(client_id) {
            Some(client) => {
                debug!(
                    "Removed client {} after {:?} ({} remaining)",
                    client_id,
                    client.handle.connected_for(),
                    self.clients.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn get(&self, client_id: &str) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Returns handles of clients idle for longer than `timeout`
    ///
    /// The clients stay registered; their connection tasks remove them once
    /// they have shut down.
    pub fn check_timeouts(&self, timeout: Duration) -> Vec<Arc<ClientHandle>> {
        self.clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| Arc::clone(&client.handle))
            .collect()
    }

    /// Handles of every live connection
    pub fn handles(&self) -> Vec<Arc<ClientHandle>> {
        self.clients
            .values()
            .map(|client| Arc::clone(&client.handle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
