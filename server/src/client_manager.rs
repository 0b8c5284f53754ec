//! Connection registry for the match server
//!
//! This module tracks every open controller connection and what it is bound to:
//! - Connection lifecycle (register on accept, unregister on close)
//! - Player cap enforcement
//! - The connection-to-player binding established by JOIN
//! - Outbound delivery of broadcast commands
//!
//! Connections are identified by a stable numeric ID assigned on accept, so
//! "which player sent this frame" is a map lookup rather than a comparison of
//! transport handles.

use log::{debug, info, warn};
use shared::Command;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

pub type ClientId = u32;

/// Outbound lines a connection may have queued before it counts as stalled.
pub const OUTBOX_CAPACITY: usize = 64;

/// Outbox slots kept free of `STATE` frames so control commands still fit.
const CONTROL_RESERVE: usize = 8;

/// Represents one open controller connection
#[derive(Debug)]
pub struct Client {
    /// Unique connection identifier assigned by the server
    pub id: ClientId,
    /// Remote address of the controller
    pub addr: SocketAddr,
    /// When the connection was accepted
    pub connected_at: Instant,
    /// Name of the player this connection joined as, if any
    pub player: Option<String>,
    /// Set once a control command no longer fits in the outbox
    pub stalled: bool,
    /// Outbound lines, drained by the connection's writer task
    sender: mpsc::Sender<String>,
}

impl Client {
    pub fn new(id: ClientId, addr: SocketAddr, sender: mpsc::Sender<String>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            player: None,
            stalled: false,
            sender,
        }
    }

    /// Queues one command for delivery
    ///
    /// `STATE` frames are skipped once the outbox is nearly full; the next one
    /// supersedes them anyway. A control command that does not fit marks the
    /// client as stalled. Returns whether the line was queued.
    pub fn send(&mut self, command: &Command) -> bool {
        let lossy = matches!(command, Command::State(_));
        if lossy && self.sender.capacity() <= CONTROL_RESERVE {
            return false;
        }

        match self.sender.try_send(format!("{}\n", command)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !self.stalled {
                    warn!("Client {} stopped reading, outbox full", self.id);
                }
                self.stalled = true;
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Manages all open connections and their player bindings
pub struct ClientManager {
    /// Open connections indexed by their ID
    clients: HashMap<ClientId, Client>,
    /// Next available connection ID
    next_client_id: ClientId,
    /// Maximum number of simultaneous connections
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty registry that accepts up to `max_clients` connections.
    /// IDs start from 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new connection
    ///
    /// Returns Some(client_id) if successful, None if the registry is at capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::Sender<String>,
    ) -> Option<ClientId> {
        // Enforce the player cap
        if self.is_full() {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    /// Unregisters a connection
    ///
    /// Returns the removed client so the caller can clean up its player.
    /// Dropping the returned client closes its outbound queue.
    pub fn remove_client(&mut self, client_id: &ClientId) -> Option<Client> {
        let client = self.clients.remove(client_id)?;
        info!(
            "Client {} disconnected after {:?}",
            client.id,
            client.connected_at.elapsed()
        );
        Some(client)
    }

    pub fn get(&self, client_id: &ClientId) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Name of the player bound to a connection
    pub fn player_of(&self, client_id: &ClientId) -> Option<&str> {
        self.clients
            .get(client_id)
            .and_then(|client| client.player.as_deref())
    }

    /// Binds a connection to a player name
    ///
    /// Returns the previously bound name, if any. Returns None and does nothing
    /// for an unknown connection.
    pub fn bind_player(&mut self, client_id: &ClientId, name: &str) -> Option<String> {
        let client = self.clients.get_mut(client_id)?;
        client.player.replace(name.to_string())
    }

    /// Clears whichever connection is bound to `name`
    ///
    /// Returns the ID of the connection that held the binding.
    pub fn unbind_player(&mut self, name: &str) -> Option<ClientId> {
        let client = self
            .clients
            .values_mut()
            .find(|client| client.player.as_deref() == Some(name))?;
        client.player = None;
        Some(client.id)
    }

    /// Sends a command to every open connection
    ///
    /// Returns how many connections accepted it.
    pub fn broadcast(&mut self, command: &Command) -> usize {
        let delivered = self
            .clients
            .values_mut()
            .map(|client| client.send(command))
            .filter(|sent| *sent)
            .count();
        debug!("Broadcast {} to {} clients", command, delivered);
        delivered
    }

    /// Connections whose outbox overflowed with a control command
    pub fn stalled(&self) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|client| client.stalled)
            .map(|client| client.id)
            .collect()
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no connections are open
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Returns true once the player cap is reached
    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    pub fn max_clients(&self) -> usize {
        self.max_clients
    }
}
