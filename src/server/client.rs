//! Per-client data

use std::sync::{Arc, Mutex, PoisonError};

use log::info;
use wayland_server::backend::{ClientData, ClientId, DisconnectReason};
use wayland_server::Client;

use crate::compositor::ConnectionId;

/// Connections whose clients went away, waiting to be reaped
pub type DisconnectQueue = Arc<Mutex<Vec<ConnectionId>>>;

/// Attached to every Wayland client
#[derive(Debug)]
pub struct ClientState {
    pub connection: ConnectionId,
    disconnected: DisconnectQueue,
}

impl ClientState {
    pub fn new(connection: ConnectionId, disconnected: DisconnectQueue) -> Self {
        Self {
            connection,
            disconnected,
        }
    }
}

impl ClientData for ClientState {
    fn initialized(&self, client_id: ClientId) {
        info!("Client {:?} connected as {:?}", client_id, self.connection);
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        info!(
            "Client {:?} ({:?}) disconnected: {:?}",
            client_id, self.connection, reason
        );
        self.disconnected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.connection);
    }
}

/// Scene connection of a Wayland client
pub fn connection_of(client: &Client) -> Option<ConnectionId> {
    client.get_data::<ClientState>().map(|c| c.connection)
}
