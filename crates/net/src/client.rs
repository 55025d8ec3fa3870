//! Client engine
//!
//! Drives the outbound connection state machine: open the transport, run
//! the connect handshake under a bounded retry policy, queue frames until
//! the server accepts, then relay inbound frames to listeners until either
//! side tears the connection down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use tether_wire::{keys, read_frame, write_frame_bytes, CodecError, Payload};

use crate::config::{ClientConfig, RetryPolicy};
use crate::control;
use crate::error::{Error, Result};
use crate::event::{ClientSideEvent, DisconnectReason};
use crate::identity::Identity;
use crate::listener::ListenerRegistry;
use crate::remote::{compile_data_frame, RemoteServer};
use crate::transport::{split, BoxedStream, SharedWriter, StreamReader};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AwaitingAccept,
    Operative,
    Disconnecting,
}

/// Client engine handle
///
/// Engines are self-contained: any number of clients can live in one
/// process without sharing state.
pub struct Client {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    server_addr: std::net::SocketAddr,
    access_key: Option<String>,
    identity: Identity,
    retry: RetryPolicy,
    name: SyncRwLock<String>,
    state: SyncMutex<ConnectionState>,
    instant_close: AtomicBool,
    writer: SyncRwLock<Option<SharedWriter>>,
    server: SyncRwLock<Option<RemoteServer>>,
    /// Compiled frames awaiting transmission
    queue: SyncMutex<Vec<Vec<u8>>>,
    listeners: ListenerRegistry,
    read_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Create a client engine; call [`connect`](Self::connect) to open the
    /// transport. Listeners registered before connecting observe the
    /// handshake events.
    pub fn new(config: ClientConfig) -> Self {
        Client {
            shared: Arc::new(ClientShared {
                server_addr: config.server_addr,
                access_key: config.access_key,
                identity: config.identity,
                retry: config.retry,
                name: SyncRwLock::new(config.name),
                state: SyncMutex::new(ConnectionState::Disconnected),
                instant_close: AtomicBool::new(false),
                writer: SyncRwLock::new(None),
                server: SyncRwLock::new(None),
                queue: SyncMutex::new(Vec::new()),
                listeners: ListenerRegistry::new(),
                read_task: SyncMutex::new(None),
            }),
        }
    }

    /// Listener registry fed by this engine
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.shared.listeners
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Current display name (server-confirmed renames update it)
    pub fn name(&self) -> String {
        self.shared.name.read().clone()
    }

    /// This client's stable identity
    pub fn identity(&self) -> &Identity {
        &self.shared.identity
    }

    /// Handle to the connected server, once operative
    pub fn server(&self) -> Option<RemoteServer> {
        self.shared.server()
    }

    /// Connect over plain TCP and run the handshake
    ///
    /// Fails with [`Error::AlreadyConnected`] if a connection attempt is
    /// already underway or established; with [`Error::Rejected`] when the
    /// server declines; with [`Error::HandshakeTimeout`] when the retry
    /// deadline elapses without a reply.
    pub async fn connect(&self) -> Result<()> {
        self.shared.begin_connect()?;

        info!(addr = %self.shared.server_addr, "Connecting to server");
        let stream = match TcpStream::connect(self.shared.server_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                self.shared.teardown_silent();
                return Err(e.into());
            }
        };

        self.handshake(Box::new(stream)).await
    }

    /// Run the handshake over an externally established stream
    ///
    /// This is the seam for secured transports: the caller performs the
    /// TLS (or any other) session setup and hands over the duplex stream.
    pub async fn connect_with(&self, stream: BoxedStream) -> Result<()> {
        self.shared.begin_connect()?;
        self.handshake(stream).await
    }

    async fn handshake(&self, stream: BoxedStream) -> Result<()> {
        let shared = &self.shared;
        let (reader, writer) = split(stream);
        *shared.writer.write() = Some(writer.clone());
        shared.set_state(ConnectionState::AwaitingAccept);

        // A dedicated pump owns the read half; recv() is cancellation-safe,
        // so handshake timeouts can never desync the frame stream.
        let (frame_tx, mut frame_rx) = mpsc::channel(16);
        let pump = tokio::spawn(pump_frames(reader, frame_tx));
        *shared.read_task.lock() = Some(pump);

        match self.await_acceptance(&writer, &mut frame_rx).await {
            Ok(()) => {
                tokio::spawn(read_loop(shared.clone(), frame_rx));
                Ok(())
            }
            Err(e) => {
                if let Some(task) = shared.read_task.lock().take() {
                    task.abort();
                }
                Err(e)
            }
        }
    }

    async fn await_acceptance(
        &self,
        writer: &SharedWriter,
        frames: &mut mpsc::Receiver<tether_wire::Result<Payload>>,
    ) -> Result<()> {
        let shared = &self.shared;
        let deadline = Instant::now() + shared.retry.deadline;

        loop {
            if shared.instant_close.load(Ordering::SeqCst) {
                debug!("Connection attempt aborted by close request");
                shared.teardown_silent();
                return Err(Error::ConnectionClosed);
            }

            // (Re)send the connect request until the server answers
            let request = shared.connect_frame();
            if !control::send_control(writer, &request).await {
                shared.teardown_silent();
                return Err(Error::ConnectionClosed);
            }

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                shared.teardown_silent();
                return Err(Error::HandshakeTimeout);
            };
            let wait = shared.retry.interval.min(remaining);

            let payload = match timeout(wait, frames.recv()).await {
                Err(_) => {
                    if Instant::now() >= deadline {
                        warn!(addr = %shared.server_addr, "Handshake deadline elapsed");
                        shared.teardown_silent();
                        return Err(Error::HandshakeTimeout);
                    }
                    continue;
                }
                Ok(None) => {
                    shared.teardown_silent();
                    return Err(Error::ConnectionClosed);
                }
                Ok(Some(Err(e))) => {
                    shared.teardown_silent();
                    return Err(e.into());
                }
                Ok(Some(Ok(payload))) => payload,
            };

            if !control::is_control(&payload) {
                continue;
            }

            match control::command_of(&payload).as_deref() {
                Some(keys::command::ACCEPT) => {
                    let Some(mac) = payload.text(keys::MAC) else {
                        debug!("Dropping accept reply without server identity");
                        continue;
                    };

                    let remote = RemoteServer::new(
                        Identity::from(mac),
                        shared.server_addr.ip(),
                        shared.server_addr.port(),
                        shared.identity.clone(),
                        writer.clone(),
                    );
                    *shared.server.write() = Some(remote.clone());

                    // Everything queued before acceptance goes out first
                    shared.drain_queue().await;
                    shared.set_state(ConnectionState::Operative);

                    if shared.instant_close.load(Ordering::SeqCst) {
                        let mut frame =
                            control::control(&shared.identity, keys::command::DISCONNECT);
                        frame.write_text(keys::ARGUMENT, "Client disconnect request");
                        let _ = control::send_control(writer, &frame).await;
                        shared.teardown(
                            DisconnectReason::KilledByClient,
                            "Client disconnect request",
                            false,
                        );
                        return Err(Error::ConnectionClosed);
                    }

                    info!(addr = %shared.server_addr, "Connection accepted by server");
                    shared
                        .listeners
                        .dispatch_client(&ClientSideEvent::ServerConnected { server: remote });

                    return Ok(());
                }
                Some(keys::command::DECLINE) => {
                    // A decline racing a local close request is a no-op
                    if shared.instant_close.load(Ordering::SeqCst) {
                        shared.teardown_silent();
                        return Err(Error::ConnectionClosed);
                    }
                    let reason = payload
                        .text(keys::COMMAND_ARGUMENT)
                        .or_else(|| payload.text(keys::ARGUMENT_DATA))
                        .unwrap_or("Connection declined by the server")
                        .to_string();
                    warn!(reason = %reason, "Connection declined by server");
                    shared.instant_close.store(true, Ordering::SeqCst);
                    shared.teardown_silent();
                    return Err(Error::Rejected(reason));
                }
                _ => continue,
            }
        }
    }

    /// Send a payload to the server
    ///
    /// Allowed while awaiting acceptance (the frame is queued and drained
    /// on transition to operative) and while operative (a transient write
    /// failure queues the frame for retry).
    pub async fn send(&self, payload: &Payload) -> Result<()> {
        match self.state() {
            ConnectionState::AwaitingAccept | ConnectionState::Operative => {}
            _ => return Err(Error::NotConnected),
        }

        let bytes = compile_data_frame(payload, &self.shared.identity)?;
        self.shared.write_or_queue(bytes).await;
        Ok(())
    }

    /// Ask the server to rebind this client under a new display name
    ///
    /// The local name only changes once the server confirms the rename.
    pub async fn rename(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        match self.state() {
            ConnectionState::AwaitingAccept | ConnectionState::Operative => {}
            _ => return Err(Error::NotConnected),
        }

        let mut frame = control::control(&self.shared.identity, keys::command::RENAME);
        frame.write_text(keys::ARGUMENT, name.clone());
        let bytes = frame.compile()?;

        info!(name = %name, "Requesting rename");
        self.shared.write_or_queue(bytes).await;
        Ok(())
    }

    /// Close the connection
    ///
    /// Operative: a disconnect request is sent (fire-and-forget) and the
    /// connection tears down locally. Before the handshake completes the
    /// engine instead flags instant close, and teardown happens as soon as
    /// the handshake loop observes it. Closing an already-disconnected
    /// client does nothing.
    pub async fn close(&self) {
        match self.state() {
            ConnectionState::Operative => {
                self.shared.set_state(ConnectionState::Disconnecting);

                let mut frame = control::control(&self.shared.identity, keys::command::DISCONNECT);
                frame.write_text(keys::ARGUMENT, "Client disconnect request");
                if let Some(writer) = self.shared.writer() {
                    let _ = control::send_control(&writer, &frame).await;
                }

                info!("Disconnecting from server");
                self.shared.teardown(
                    DisconnectReason::KilledByClient,
                    "Client disconnect request",
                    true,
                );
                if let Some(task) = self.shared.read_task.lock().take() {
                    task.abort();
                }
            }
            ConnectionState::Connecting | ConnectionState::AwaitingAccept => {
                debug!("Close requested before handshake completion");
                self.shared.instant_close.store(true, Ordering::SeqCst);
            }
            ConnectionState::Disconnected | ConnectionState::Disconnecting => {}
        }
    }
}

impl ClientShared {
    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn server(&self) -> Option<RemoteServer> {
        self.server.read().clone()
    }

    fn writer(&self) -> Option<SharedWriter> {
        self.writer.read().clone()
    }

    /// Guard against concurrent connect attempts; resets the instant-close
    /// flag for the fresh attempt.
    fn begin_connect(&self) -> Result<()> {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Disconnected => {
                *state = ConnectionState::Connecting;
                self.instant_close.store(false, Ordering::SeqCst);
                Ok(())
            }
            _ => Err(Error::AlreadyConnected),
        }
    }

    fn connect_frame(&self) -> Payload {
        let mut frame = control::control(&self.identity, keys::command::CONNECT);
        frame.write_text(keys::ARGUMENT, self.name.read().clone());
        if let Some(key) = &self.access_key {
            frame.write_text(keys::ACCESS_KEY, key.clone());
        }
        frame
    }

    /// Write each queued frame, removing it only once written; a failure
    /// puts the frame back and stops the drain.
    async fn drain_queue(&self) {
        let Some(writer) = self.writer() else {
            return;
        };

        loop {
            let next = { self.queue.lock().pop() };
            let Some(bytes) = next else {
                break;
            };

            let mut guard = writer.lock().await;
            if let Err(e) = write_frame_bytes(&mut *guard, &bytes).await {
                debug!(error = %e, "Queue drain interrupted");
                drop(guard);
                self.queue.lock().push(bytes);
                break;
            }
        }
    }

    /// Transmit now when operative, otherwise hold the frame in the
    /// pending queue.
    async fn write_or_queue(&self, bytes: Vec<u8>) {
        if self.state() != ConnectionState::Operative {
            self.queue.lock().push(bytes);
            return;
        }

        self.drain_queue().await;

        match self.writer() {
            Some(writer) => {
                let mut guard = writer.lock().await;
                if let Err(e) = write_frame_bytes(&mut *guard, &bytes).await {
                    debug!(error = %e, "Write failed, frame queued for retry");
                    drop(guard);
                    self.queue.lock().push(bytes);
                }
            }
            None => self.queue.lock().push(bytes),
        }
    }

    /// Drop the transport and, for an established connection, tell the
    /// listeners why. Idempotent: only the first teardown does anything.
    fn teardown(&self, reason: DisconnectReason, message: &str, emit: bool) {
        {
            let mut state = self.state.lock();
            if *state == ConnectionState::Disconnected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }

        *self.writer.write() = None;
        let server = self.server.write().take();

        if emit {
            if let Some(server) = server {
                self.listeners
                    .dispatch_client(&ClientSideEvent::ServerDisconnected {
                        server,
                        reason,
                        message: message.to_string(),
                    });
            }
        }
    }

    fn teardown_silent(&self) {
        self.teardown(DisconnectReason::Unknown, "", false);
    }
}

/// Read frames off the transport and hand them to the engine; the single
/// owner of the read half.
async fn pump_frames(mut reader: StreamReader, frames: mpsc::Sender<tether_wire::Result<Payload>>) {
    loop {
        let result = read_frame(&mut reader).await;
        let failed = result.is_err();
        if frames.send(result).await.is_err() || failed {
            break;
        }
    }
}

/// Per-connection inbound loop; runs until the transport drops or the
/// server kills the connection.
async fn read_loop(shared: Arc<ClientShared>, mut frames: mpsc::Receiver<tether_wire::Result<Payload>>) {
    loop {
        match frames.recv().await {
            Some(Ok(payload)) => {
                if !handle_frame(&shared, payload) {
                    break;
                }
            }
            Some(Err(CodecError::ConnectionClosed)) | None => {
                debug!("Server closed connection");
                shared.teardown(DisconnectReason::Unknown, "Connection closed", true);
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "Read error");
                shared.teardown(DisconnectReason::Unknown, &format!("Read failure: {}", e), true);
                break;
            }
        }

        // Frames that failed a direct write retry behind inbound traffic
        let pending = { !shared.queue.lock().is_empty() };
        if pending {
            shared.drain_queue().await;
        }
    }

    // The pump has no consumer anymore; stop it reading a dead connection
    if let Some(task) = shared.read_task.lock().take() {
        task.abort();
    }
}

/// Returns whether the loop should keep reading
fn handle_frame(shared: &Arc<ClientShared>, payload: Payload) -> bool {
    let Some(server) = shared.server() else {
        return false;
    };

    let origin = match payload.text(keys::MAC) {
        Some(mac) if mac == server.identity().as_str() => None,
        Some(mac) => Some(Identity::from(mac)),
        None => {
            debug!("Dropping frame without sender identity");
            return true;
        }
    };

    if control::is_control(&payload) {
        if origin.is_some() {
            debug!("Dropping control frame not issued by the server");
            return true;
        }

        let Some(command) = control::command_of(&payload) else {
            debug!("Dropping control frame without command");
            return true;
        };
        let argument = control::argument_of(&payload).unwrap_or_default();

        match command.as_str() {
            keys::command::DISCONNECT => {
                let message = payload
                    .text(keys::ARGUMENT_DATA)
                    .unwrap_or("Connection killed by server")
                    .to_string();
                warn!(reason = %message, "Connection killed by server");
                shared.teardown(DisconnectReason::KilledByServer, &message, true);
                return false;
            }
            keys::command::SUCCESS => {
                let data = payload.text(keys::ARGUMENT_DATA).unwrap_or_default();
                if argument == keys::command::RENAME && !data.is_empty() {
                    info!(name = %data, "Server accepted the new client name");
                    *shared.name.write() = data.to_string();
                } else {
                    debug!(argument = %argument, data = %data, "Server reported success");
                }
            }
            keys::command::FAILED | keys::command::DECLINE => {
                let data = payload.text(keys::ARGUMENT_DATA).unwrap_or_default();
                let reason = payload.text(keys::COMMAND_ARGUMENT).unwrap_or_default();
                warn!(
                    argument = %argument,
                    data = %data,
                    reason = %reason,
                    "Server reported failure"
                );
            }
            other => {
                debug!(command = %other, "Unexpected command from server");
            }
        }
    } else {
        shared
            .listeners
            .dispatch_client(&ClientSideEvent::ServerMessage {
                server,
                origin,
                payload,
            });
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn local_config() -> ClientConfig {
        ClientConfig::new("127.0.0.1:49305".parse().unwrap(), "tester").retry(RetryPolicy {
            interval: Duration::from_millis(20),
            deadline: Duration::from_millis(100),
        })
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = Client::new(local_config());
        let result = client.send(&Payload::new()).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_rename_before_connect_fails() {
        let client = Client::new(local_config());
        let result = client.rename("other").await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_close_when_disconnected_is_noop() {
        let client = Client::new(local_config());
        client.close().await;
        client.close().await;
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_handshake_times_out_without_reply() {
        let (near, far) = tokio::io::duplex(4096);
        let client = Client::new(local_config());

        // The far end never answers; the bounded retry policy must give up
        let result = client.connect_with(Box::new(near)).await;
        assert!(matches!(result, Err(Error::HandshakeTimeout)));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        drop(far);
    }

    #[tokio::test]
    async fn test_connect_frame_carries_access_key() {
        let client = Client::new(local_config().access_key("secret"));
        let frame = client.shared.connect_frame();
        assert_eq!(frame.text(keys::ACCESS_KEY), Some("secret"));
        assert_eq!(frame.text(keys::ARGUMENT), Some("tester"));
        assert_eq!(
            control::command_of(&frame).as_deref(),
            Some(keys::command::CONNECT)
        );
    }
}
