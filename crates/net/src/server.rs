//! Server engine
//!
//! Accepts connections, runs one read loop per connection, and keeps the
//! registry of authenticated clients. Inbound control frames drive the
//! command state machine; data frames are acknowledged and handed to
//! listeners. The administrative surface (broadcast, redirect, ban, kick)
//! routes frames through the registered peer handles.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock as SyncRwLock;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use tether_wire::{keys, read_frame, CodecError, Payload};

use crate::ban::{BanList, BanStore, JsonBanStore};
use crate::config::ServerConfig;
use crate::control::{self, Reply};
use crate::error::{Error, Result};
use crate::event::{DisconnectReason, ServerInfo, ServerSideEvent};
use crate::identity::Identity;
use crate::listener::ListenerRegistry;
use crate::registry::{ClientRegistry, RenameOutcome};
use crate::remote::RemoteClient;
use crate::transport::{split, BoxedStream, SharedWriter};

const NOT_CONNECTED: &str = "You are not connected to this server";

/// Server engine handle
///
/// Engines are self-contained: any number of servers can live in one
/// process without sharing registries, bans or listeners.
pub struct Server {
    shared: Arc<ServerShared>,
}

struct ServerShared {
    identity: Identity,
    access_key: Option<String>,
    bind_addr: SocketAddr,
    local_addr: SyncRwLock<Option<SocketAddr>>,
    registry: ClientRegistry,
    bans: BanList,
    listeners: ListenerRegistry,
    shutdown: broadcast::Sender<()>,
    /// Frames read off a connection, and frames fully handled; broadcast
    /// and redirect wait for the two to meet before transmitting.
    admitted: AtomicU64,
    handled: AtomicU64,
    quiesce: Notify,
}

impl Server {
    /// Create a server engine; call [`start`](Self::start) to bind and
    /// accept. Listeners registered before starting observe every
    /// connection.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Server {
            shared: Arc::new(ServerShared {
                identity: config.identity,
                access_key: config.access_key,
                bind_addr: config.bind_addr,
                local_addr: SyncRwLock::new(None),
                registry: ClientRegistry::new(),
                bans: BanList::new(),
                listeners: ListenerRegistry::new(),
                shutdown,
                admitted: AtomicU64::new(0),
                handled: AtomicU64::new(0),
                quiesce: Notify::new(),
            }),
        }
    }

    /// Listener registry fed by this engine
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.shared.listeners
    }

    /// This server's stable identity
    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// Bound address, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.shared.local_addr.read()
    }

    /// Currently registered clients
    pub fn clients(&self) -> Vec<RemoteClient> {
        self.shared
            .registry
            .snapshot()
            .into_iter()
            .map(|reg| reg.remote.clone())
            .collect()
    }

    /// Look up a registered client by display name
    pub fn client_named(&self, name: &str) -> Option<RemoteClient> {
        self.shared
            .registry
            .get_by_name(name)
            .map(|reg| reg.remote.clone())
    }

    /// Bind the listening transport and enter the accept loop
    ///
    /// Returns the bound address. Only a bind failure is fatal; everything
    /// that happens on individual connections afterwards is isolated to
    /// them. A server engine starts once.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.local_addr().is_some() {
            return Err(Error::Protocol("Server already started".into()));
        }

        let listener =
            TcpListener::bind(self.shared.bind_addr)
                .await
                .map_err(|source| Error::Bind {
                    addr: self.shared.bind_addr,
                    source,
                })?;
        let addr = listener.local_addr()?;
        *self.shared.local_addr.write() = Some(addr);

        info!(addr = %addr, "Server started");

        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown.subscribe();
        tokio::spawn(accept_loop(listener, shared, shutdown));

        Ok(addr)
    }

    /// Drive an externally established stream as an inbound connection
    ///
    /// This is the seam for secured transports: the caller accepts and
    /// wraps the stream (TLS session setup included), then hands it over
    /// together with the peer address.
    pub fn serve_connection(&self, stream: BoxedStream, peer: SocketAddr) {
        let shared = self.shared.clone();
        let shutdown = self.shared.shutdown.subscribe();
        tokio::spawn(connection_task(shared, stream, peer, shutdown));
    }

    /// Send a payload to every registered client
    ///
    /// Waits until every frame admitted before this call has been handled,
    /// then transmits. Returns the number of clients reached.
    pub async fn broadcast(&self, payload: &Payload) -> usize {
        self.shared.await_quiescent().await;

        let mut delivered = 0;
        for reg in self.shared.registry.snapshot() {
            if reg.remote.send_message(payload).await {
                delivered += 1;
            } else {
                debug!(name = reg.remote.name(), "Failed to deliver broadcast frame");
            }
        }
        delivered
    }

    /// Send a payload to every registered client whose display name or
    /// stable identity equals `target`
    ///
    /// Zero matches is not an error. Returns the number of clients reached.
    pub async fn redirect(&self, target: &str, payload: &Payload) -> usize {
        self.shared.await_quiescent().await;

        let mut delivered = 0;
        for reg in self.shared.registry.matching(target) {
            if reg.remote.send_message(payload).await {
                delivered += 1;
            } else {
                debug!(
                    name = reg.remote.name(),
                    target = target,
                    "Failed to deliver redirected frame"
                );
            }
        }
        delivered
    }

    /// Ban identities and expel any connected client holding one
    pub async fn ban(&self, identities: impl IntoIterator<Item = Identity>) {
        for identity in identities {
            self.shared.bans.ban(identity.clone());
            info!(identity = %identity, "Identity banned");
            self.shared
                .expel(
                    &identity,
                    DisconnectReason::Banned,
                    "You have been banned from this server",
                )
                .await;
        }
    }

    /// Expel connected clients holding these identities without banning
    pub async fn kick(&self, identities: impl IntoIterator<Item = Identity>) {
        for identity in identities {
            self.shared
                .expel(
                    &identity,
                    DisconnectReason::KilledByServer,
                    "You have been kicked from this server",
                )
                .await;
        }
    }

    /// Remove identities from the ban list; live connections are untouched
    pub fn unban(&self, identities: impl IntoIterator<Item = Identity>) {
        for identity in identities {
            if self.shared.bans.unban(&identity) {
                info!(identity = %identity, "Identity unbanned");
            }
        }
    }

    pub fn is_banned(&self, identity: &Identity) -> bool {
        self.shared.bans.contains(identity)
    }

    /// Persist the current ban list
    pub fn export_bans(&self, path: impl AsRef<Path>) -> Result<()> {
        let store = JsonBanStore::new(path.as_ref());
        store.save(&self.shared.bans.snapshot())?;
        Ok(())
    }

    /// Load a persisted ban list, banning (and expelling) every loaded
    /// identity
    pub async fn load_bans(&self, path: impl AsRef<Path>) -> Result<()> {
        let store = JsonBanStore::new(path.as_ref());
        let loaded = store.load()?;
        self.ban(loaded).await;
        Ok(())
    }

    /// Notify every connected client and stop the engine
    pub async fn close(&self) {
        for reg in self.shared.registry.clear() {
            let mut frame = control::control(&self.shared.identity, keys::command::DISCONNECT);
            frame.write_text(keys::ARGUMENT, keys::command::DISCONNECT);
            frame.write_text(keys::ARGUMENT_DATA, "Server closed");
            let _ = control::send_control(reg.remote.writer(), &frame).await;
        }

        let _ = self.shared.shutdown.send(());
        info!("Server shutdown initiated");
    }
}

impl ServerShared {
    fn info(&self) -> ServerInfo {
        ServerInfo {
            identity: self.identity.clone(),
            addr: self.local_addr.read().unwrap_or(self.bind_addr),
        }
    }

    /// Block (without spinning) until every frame admitted before now has
    /// been handled.
    async fn await_quiescent(&self) {
        let target = self.admitted.load(Ordering::SeqCst);
        loop {
            let notified = self.quiesce.notified();
            tokio::pin!(notified);
            // Register for wakeups before the check, or a notification
            // landing in between would be lost
            notified.as_mut().enable();
            if self.handled.load(Ordering::SeqCst) >= target {
                return;
            }
            notified.await;
        }
    }

    /// Notify, deregister and report every connection held by `identity`
    async fn expel(&self, identity: &Identity, reason: DisconnectReason, message: &str) {
        for reg in self.registry.remove_by_identity(identity) {
            let mut frame = control::control(&self.identity, keys::command::DISCONNECT);
            frame.write_text(keys::ARGUMENT, keys::command::DISCONNECT);
            frame.write_text(keys::ARGUMENT_DATA, message);
            let _ = control::send_control(reg.remote.writer(), &frame).await;

            info!(name = reg.remote.name(), identity = %identity, "Client expelled");
            self.listeners
                .dispatch_server(&ServerSideEvent::ClientDisconnected {
                    client: reg.remote.clone(),
                    server: self.info(),
                    reason,
                    message: message.to_string(),
                });
        }
    }

    /// A connection died without a disconnect request; if it was
    /// registered, drop it and report an unknown-reason disconnect.
    fn implicit_disconnect(&self, addr_key: &str, message: &str) {
        if let Some(reg) = self.registry.remove_by_addr(addr_key) {
            info!(name = reg.remote.name(), "Client connection lost");
            self.listeners
                .dispatch_server(&ServerSideEvent::ClientDisconnected {
                    client: reg.remote.clone(),
                    server: self.info(),
                    reason: DisconnectReason::Unknown,
                    message: message.to_string(),
                });
        }
    }
}

/// Accept incoming connections until shutdown
async fn accept_loop(
    listener: TcpListener,
    shared: Arc<ServerShared>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        let shared = shared.clone();
                        let shutdown = shared.shutdown.subscribe();
                        tokio::spawn(connection_task(shared, Box::new(stream), addr, shutdown));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Read/process loop for a single connection
async fn connection_task(
    shared: Arc<ServerShared>,
    stream: BoxedStream,
    peer: SocketAddr,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (mut reader, writer) = split(stream);
    // The address key tracks this socket until the handshake names it
    let addr_key = format!("{}/{}", peer.ip(), peer.port());

    loop {
        tokio::select! {
            result = read_frame(&mut reader) => {
                match result {
                    Ok(payload) => {
                        shared.admitted.fetch_add(1, Ordering::SeqCst);
                        handle_frame(&shared, &writer, &addr_key, peer, payload).await;
                        shared.handled.fetch_add(1, Ordering::SeqCst);
                        shared.quiesce.notify_waiters();
                    }
                    Err(CodecError::ConnectionClosed) => {
                        debug!(addr = %peer, "Connection closed");
                        shared.implicit_disconnect(&addr_key, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(addr = %peer, error = %e, "Read error");
                        shared.implicit_disconnect(&addr_key, &format!("Read failure: {}", e));
                        break;
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!(addr = %peer, "Connection loop shutting down");
                break;
            }
        }
    }
}

/// Route one inbound frame through the command state machine
async fn handle_frame(
    shared: &Arc<ServerShared>,
    writer: &SharedWriter,
    addr_key: &str,
    peer: SocketAddr,
    payload: Payload,
) {
    let Some(identity) = payload.text(keys::MAC).map(Identity::from) else {
        debug!(addr = %peer, "Frame missing sender identity");
        let reply = Reply::new(keys::command::FAILED, keys::command::MALFORMED)
            .reason("Frame is missing the sender identity");
        let _ = control::send_reply(writer, &shared.identity, reply).await;
        return;
    };

    if !control::is_control(&payload) {
        handle_data(shared, writer, addr_key, payload).await;
        return;
    }

    let Some(command) = control::command_of(&payload) else {
        debug!(addr = %peer, "Control frame missing command");
        let reply = Reply::new(keys::command::FAILED, keys::command::MALFORMED)
            .reason("Control frame is missing its command");
        let _ = control::send_reply(writer, &shared.identity, reply).await;
        return;
    };
    let argument = payload.text(keys::ARGUMENT).map(str::to_string);

    match command.as_str() {
        keys::command::CONNECT => {
            handle_connect(shared, writer, addr_key, peer, identity, argument, &payload).await;
        }
        keys::command::RENAME => {
            handle_rename(shared, writer, addr_key, argument).await;
        }
        keys::command::DISCONNECT => {
            handle_disconnect(shared, writer, addr_key, argument).await;
        }
        _ => {
            // Preserve the wire-level casing for observers
            let original = payload.text(keys::COMMAND).unwrap_or(&command).to_string();
            handle_custom(shared, writer, addr_key, original, argument).await;
        }
    }
}

async fn handle_connect(
    shared: &Arc<ServerShared>,
    writer: &SharedWriter,
    addr_key: &str,
    peer: SocketAddr,
    identity: Identity,
    argument: Option<String>,
    payload: &Payload,
) {
    let Some(name) = argument else {
        let reply = Reply::new(keys::command::FAILED, keys::command::CONNECT)
            .reason("Connect request is missing a display name");
        let _ = control::send_reply(writer, &shared.identity, reply).await;
        return;
    };

    // Two independent checks; ban takes precedence in the reported reason
    let banned = shared.bans.contains(&identity);
    let valid_key = match &shared.access_key {
        Some(expected) => payload.text(keys::ACCESS_KEY) == Some(expected.as_str()),
        None => true,
    };

    if banned || !valid_key {
        let reason = if banned {
            "You are banned from this server"
        } else {
            "The provided access key is not valid for this server"
        };
        warn!(addr = %peer, name = %name, reason = reason, "Declining connection");
        let reply = Reply::new(keys::command::DECLINE, keys::command::CONNECT)
            .data(&name)
            .reason(reason);
        let _ = control::send_reply(writer, &shared.identity, reply).await;
        return;
    }

    let remote = RemoteClient::new(
        &name,
        identity,
        peer.ip(),
        peer.port(),
        shared.identity.clone(),
        writer.clone(),
    );
    shared.registry.register(addr_key, remote.clone());

    info!(addr = %peer, name = %name, "Client connected");
    shared
        .listeners
        .dispatch_server(&ServerSideEvent::ClientConnected {
            client: remote,
            server: shared.info(),
        });

    let reply = Reply::new(keys::command::ACCEPT, keys::command::CONNECT);
    let _ = control::send_reply(writer, &shared.identity, reply).await;
}

async fn handle_rename(
    shared: &Arc<ServerShared>,
    writer: &SharedWriter,
    addr_key: &str,
    argument: Option<String>,
) {
    let Some(new_name) = argument else {
        let reply = Reply::new(keys::command::FAILED, keys::command::RENAME)
            .reason("Rename request is missing the new name");
        let _ = control::send_reply(writer, &shared.identity, reply).await;
        return;
    };

    match shared.registry.rename(addr_key, &new_name) {
        RenameOutcome::Renamed(remote) => {
            info!(name = %new_name, "Client renamed");
            shared
                .listeners
                .dispatch_server(&ServerSideEvent::ClientCommand {
                    client: remote,
                    server: shared.info(),
                    command: keys::command::RENAME.to_string(),
                    argument: new_name.clone(),
                });

            let reply =
                Reply::new(keys::command::SUCCESS, keys::command::RENAME).data(&new_name);
            let _ = control::send_reply(writer, &shared.identity, reply).await;
        }
        RenameOutcome::Collision => {
            let reply = Reply::new(keys::command::FAILED, keys::command::RENAME)
                .data(&new_name)
                .reason("A client with that name already exists");
            let _ = control::send_reply(writer, &shared.identity, reply).await;
        }
        RenameOutcome::NotRegistered => {
            let reply = Reply::new(keys::command::FAILED, keys::command::RENAME)
                .data(&new_name)
                .reason(NOT_CONNECTED);
            let _ = control::send_reply(writer, &shared.identity, reply).await;
        }
    }
}

async fn handle_disconnect(
    shared: &Arc<ServerShared>,
    writer: &SharedWriter,
    addr_key: &str,
    argument: Option<String>,
) {
    let message = argument.unwrap_or_else(|| "Client disconnect request".to_string());

    match shared.registry.remove_by_addr(addr_key) {
        Some(reg) => {
            info!(name = reg.remote.name(), reason = %message, "Client left the server");
            shared
                .listeners
                .dispatch_server(&ServerSideEvent::ClientDisconnected {
                    client: reg.remote.clone(),
                    server: shared.info(),
                    reason: DisconnectReason::KilledByClient,
                    message,
                });
        }
        None => {
            let reply = Reply::new(keys::command::FAILED, keys::command::DISCONNECT)
                .reason(NOT_CONNECTED);
            let _ = control::send_reply(writer, &shared.identity, reply).await;
        }
    }
}

async fn handle_custom(
    shared: &Arc<ServerShared>,
    writer: &SharedWriter,
    addr_key: &str,
    command: String,
    argument: Option<String>,
) {
    match shared.registry.get_by_addr(addr_key) {
        Some(reg) => {
            debug!(
                name = reg.remote.name(),
                command = %command,
                "Custom command passed through"
            );
            shared
                .listeners
                .dispatch_server(&ServerSideEvent::ClientCommand {
                    client: reg.remote.clone(),
                    server: shared.info(),
                    command,
                    argument: argument.unwrap_or_default(),
                });
        }
        None => {
            let reply = Reply::new(keys::command::FAILED, keys::command::UNKNOWN)
                .data(&command)
                .reason(NOT_CONNECTED);
            let _ = control::send_reply(writer, &shared.identity, reply).await;
        }
    }
}

async fn handle_data(
    shared: &Arc<ServerShared>,
    writer: &SharedWriter,
    addr_key: &str,
    payload: Payload,
) {
    match shared.registry.get_by_addr(addr_key) {
        Some(reg) => {
            let reply = Reply::new(keys::command::SUCCESS, keys::command::MESSAGE)
                .data(reg.remote.name());
            let _ = control::send_reply(writer, &shared.identity, reply).await;

            shared
                .listeners
                .dispatch_server(&ServerSideEvent::ClientMessage {
                    client: reg.remote.clone(),
                    server: shared.info(),
                    payload,
                });
        }
        None => {
            debug!(addr_key = addr_key, "Denying message from unauthenticated connection");
            let reply =
                Reply::new(keys::command::FAILED, keys::command::MESSAGE).reason(NOT_CONNECTED);
            let _ = control::send_reply(writer, &shared.identity, reply).await;
        }
    }
}
