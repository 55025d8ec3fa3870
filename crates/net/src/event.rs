//! Lifecycle and data events
//!
//! Engines emit these through a [`ListenerRegistry`](crate::ListenerRegistry)
//! so external code can observe connections without touching the transport.

use std::net::SocketAddr;

use tether_wire::Payload;

use crate::identity::Identity;
use crate::remote::{RemoteClient, RemoteServer};

/// Why a connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer's identity is banned
    Banned,
    /// The server terminated the connection
    KilledByServer,
    /// The client requested the disconnect
    KilledByClient,
    /// The connection dropped without a stated reason
    Unknown,
}

/// Descriptor of the local server engine, carried on server-side events
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub identity: Identity,
    pub addr: SocketAddr,
}

/// Events observed by a client engine
#[derive(Debug, Clone)]
pub enum ClientSideEvent {
    /// The handshake completed and the connection is operative
    ServerConnected { server: RemoteServer },
    /// The connection ended
    ServerDisconnected {
        server: RemoteServer,
        reason: DisconnectReason,
        message: String,
    },
    /// A data frame arrived; `origin` identifies the frame's sender when it
    /// was relayed on behalf of another client
    ServerMessage {
        server: RemoteServer,
        origin: Option<Identity>,
        payload: Payload,
    },
}

/// Events observed by a server engine
#[derive(Debug, Clone)]
pub enum ServerSideEvent {
    /// A client completed the handshake and entered the registry
    ClientConnected {
        client: RemoteClient,
        server: ServerInfo,
    },
    /// A registered client left the registry
    ClientDisconnected {
        client: RemoteClient,
        server: ServerInfo,
        reason: DisconnectReason,
        message: String,
    },
    /// A registered client issued a command (rename, or any custom command
    /// passed through verbatim)
    ClientCommand {
        client: RemoteClient,
        server: ServerInfo,
        command: String,
        argument: String,
    },
    /// A registered client sent a data frame
    ClientMessage {
        client: RemoteClient,
        server: ServerInfo,
        payload: Payload,
    },
}
