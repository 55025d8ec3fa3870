//! Remote peer handles
//!
//! A handle is an immutable descriptor of a peer bound to one live
//! connection, plus the capability to transmit frames to it. Renaming a
//! peer produces a new handle; the old one keeps describing the connection
//! it was created for.

use std::fmt;
use std::net::IpAddr;

use tracing::debug;

use tether_wire::{keys, write_frame_bytes, MergeMode, Payload};

use crate::identity::Identity;
use crate::transport::SharedWriter;

/// Layer the routing fields over a user payload and compile it.
///
/// Routing fields always win: the user payload is merged underneath via
/// `Difference`, so its own keys survive except where routing overlaps.
pub(crate) fn compile_data_frame(
    payload: &Payload,
    sender: &Identity,
) -> tether_wire::Result<Vec<u8>> {
    let mut out = Payload::merging(payload, MergeMode::Difference);
    out.write_text(keys::MAC, sender.as_str());
    out.write_boolean(keys::COMMAND_ENABLED, false);
    out.compile()
}

/// A connected client, as seen by the server engine
#[derive(Clone)]
pub struct RemoteClient {
    name: String,
    identity: Identity,
    host: IpAddr,
    port: u16,
    local_identity: Identity,
    writer: SharedWriter,
}

impl RemoteClient {
    pub(crate) fn new(
        name: impl Into<String>,
        identity: Identity,
        host: IpAddr,
        port: u16,
        local_identity: Identity,
        writer: SharedWriter,
    ) -> Self {
        RemoteClient {
            name: name.into(),
            identity,
            host,
            port,
            local_identity,
            writer,
        }
    }

    /// Same connection, new display name
    pub(crate) fn renamed(&self, name: impl Into<String>) -> Self {
        RemoteClient {
            name: name.into(),
            identity: self.identity.clone(),
            host: self.host,
            port: self.port,
            local_identity: self.local_identity.clone(),
            writer: self.writer.clone(),
        }
    }

    pub(crate) fn writer(&self) -> &SharedWriter {
        &self.writer
    }

    /// Display name the client is registered under
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stable identity of the client's host
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Transport address of the connection
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Transport port of the connection
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send a payload to this client
    ///
    /// Stamps the routing fields, compiles and writes the frame. Returns
    /// whether the frame was written; failures are reported, never raised.
    pub async fn send_message(&self, payload: &Payload) -> bool {
        send_data_frame(&self.writer, payload, &self.local_identity, self.name()).await
    }
}

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("name", &self.name)
            .field("identity", &self.identity)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

/// The connected server, as seen by a client engine
#[derive(Clone)]
pub struct RemoteServer {
    identity: Identity,
    host: IpAddr,
    port: u16,
    local_identity: Identity,
    writer: SharedWriter,
}

impl RemoteServer {
    pub(crate) fn new(
        identity: Identity,
        host: IpAddr,
        port: u16,
        local_identity: Identity,
        writer: SharedWriter,
    ) -> Self {
        RemoteServer {
            identity,
            host,
            port,
            local_identity,
            writer,
        }
    }

    /// Stable identity of the server's host
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Transport address of the server
    pub fn host(&self) -> IpAddr {
        self.host
    }

    /// Transport port of the server
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Send a payload to the server
    ///
    /// Stamps the routing fields, compiles and writes the frame. Returns
    /// whether the frame was written; failures are reported, never raised.
    pub async fn send_message(&self, payload: &Payload) -> bool {
        send_data_frame(&self.writer, payload, &self.local_identity, "server").await
    }
}

impl fmt::Debug for RemoteServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteServer")
            .field("identity", &self.identity)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

async fn send_data_frame(
    writer: &SharedWriter,
    payload: &Payload,
    sender: &Identity,
    peer: &str,
) -> bool {
    let bytes = match compile_data_frame(payload, sender) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(peer = peer, error = %e, "Failed to compile outbound frame");
            return false;
        }
    };

    let mut guard = writer.lock().await;
    match write_frame_bytes(&mut *guard, &bytes).await {
        Ok(()) => true,
        Err(e) => {
            debug!(peer = peer, error = %e, "Failed to write outbound frame");
            false
        }
    }
}
