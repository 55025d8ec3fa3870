#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use tether_net::{
    DisconnectReason, EventListener, Identity, RemoteClient, RemoteServer, ServerInfo,
};
use tether_wire::Payload;

/// Listener that records everything it observes, for assertions
#[derive(Default)]
pub struct Recorder {
    pub server_connects: AtomicUsize,
    pub server_disconnects: AtomicUsize,
    pub client_connects: AtomicUsize,
    pub client_disconnects: AtomicUsize,
    pub client_messages: Mutex<Vec<Payload>>,
    pub server_messages: Mutex<Vec<Payload>>,
    pub commands: Mutex<Vec<(String, String)>>,
    pub last_client_disconnect: Mutex<Option<(DisconnectReason, String)>>,
    pub last_server_disconnect: Mutex<Option<(DisconnectReason, String)>>,
}

impl EventListener for Recorder {
    fn on_server_connected(&self, _server: &RemoteServer) {
        self.server_connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_server_disconnected(
        &self,
        _server: &RemoteServer,
        reason: DisconnectReason,
        message: &str,
    ) {
        self.server_disconnects.fetch_add(1, Ordering::SeqCst);
        *self.last_server_disconnect.lock() = Some((reason, message.to_string()));
    }

    fn on_server_message(
        &self,
        _server: &RemoteServer,
        _origin: Option<&Identity>,
        payload: &Payload,
    ) {
        self.client_messages.lock().push(payload.clone());
    }

    fn on_client_connected(&self, _client: &RemoteClient, _server: &ServerInfo) {
        self.client_connects.fetch_add(1, Ordering::SeqCst);
    }

    fn on_client_disconnected(
        &self,
        _client: &RemoteClient,
        _server: &ServerInfo,
        reason: DisconnectReason,
        message: &str,
    ) {
        self.client_disconnects.fetch_add(1, Ordering::SeqCst);
        *self.last_client_disconnect.lock() = Some((reason, message.to_string()));
    }

    fn on_client_command(
        &self,
        _client: &RemoteClient,
        _server: &ServerInfo,
        command: &str,
        argument: &str,
    ) {
        self.commands
            .lock()
            .push((command.to_string(), argument.to_string()));
    }

    fn on_client_message(&self, _client: &RemoteClient, _server: &ServerInfo, payload: &Payload) {
        self.server_messages.lock().push(payload.clone());
    }
}

/// Poll a condition until it holds or the deadline passes
pub async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
