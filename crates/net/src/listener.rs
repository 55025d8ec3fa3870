//! Listener registration and event dispatch
//!
//! A [`ListenerRegistry`] is owned by the engine that emits into it; two
//! engines in one process never share listener state unless handed the
//! same registry. Each registration is independent: registering one
//! listener twice delivers every event twice, once per handle.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;
use uuid::Uuid;

use tether_wire::Payload;

use crate::event::{ClientSideEvent, DisconnectReason, ServerInfo, ServerSideEvent};
use crate::identity::Identity;
use crate::remote::{RemoteClient, RemoteServer};

/// Handle returned by [`ListenerRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

/// Observer of engine events
///
/// Every method defaults to a no-op; implement only the handlers you care
/// about. Handlers run on the emitting connection's task and should return
/// quickly.
#[allow(unused_variables)]
pub trait EventListener: Send + Sync {
    fn on_server_connected(&self, server: &RemoteServer) {}

    fn on_server_disconnected(
        &self,
        server: &RemoteServer,
        reason: DisconnectReason,
        message: &str,
    ) {
    }

    fn on_server_message(
        &self,
        server: &RemoteServer,
        origin: Option<&Identity>,
        payload: &Payload,
    ) {
    }

    fn on_client_connected(&self, client: &RemoteClient, server: &ServerInfo) {}

    fn on_client_disconnected(
        &self,
        client: &RemoteClient,
        server: &ServerInfo,
        reason: DisconnectReason,
        message: &str,
    ) {
    }

    fn on_client_command(
        &self,
        client: &RemoteClient,
        server: &ServerInfo,
        command: &str,
        argument: &str,
    ) {
    }

    fn on_client_message(&self, client: &RemoteClient, server: &ServerInfo, payload: &Payload) {}
}

/// Table of registered listeners
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<Uuid, Arc<dyn EventListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener; the returned handle removes exactly this
    /// registration
    pub fn register(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = Uuid::new_v4();
        self.listeners.write().insert(id, listener);
        ListenerId(id)
    }

    /// Remove a registration; returns whether the handle was known
    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id.0).is_some()
    }

    /// Number of live registrations
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    /// Deliver a client-side event to every registered listener
    pub fn dispatch_client(&self, event: &ClientSideEvent) {
        for listener in self.snapshot() {
            deliver(|| match event {
                ClientSideEvent::ServerConnected { server } => {
                    listener.on_server_connected(server);
                }
                ClientSideEvent::ServerDisconnected {
                    server,
                    reason,
                    message,
                } => {
                    listener.on_server_disconnected(server, *reason, message);
                }
                ClientSideEvent::ServerMessage {
                    server,
                    origin,
                    payload,
                } => {
                    listener.on_server_message(server, origin.as_ref(), payload);
                }
            });
        }
    }

    /// Deliver a server-side event to every registered listener
    pub fn dispatch_server(&self, event: &ServerSideEvent) {
        for listener in self.snapshot() {
            deliver(|| match event {
                ServerSideEvent::ClientConnected { client, server } => {
                    listener.on_client_connected(client, server);
                }
                ServerSideEvent::ClientDisconnected {
                    client,
                    server,
                    reason,
                    message,
                } => {
                    listener.on_client_disconnected(client, server, *reason, message);
                }
                ServerSideEvent::ClientCommand {
                    client,
                    server,
                    command,
                    argument,
                } => {
                    listener.on_client_command(client, server, command, argument);
                }
                ServerSideEvent::ClientMessage {
                    client,
                    server,
                    payload,
                } => {
                    listener.on_client_message(client, server, payload);
                }
            });
        }
    }

    fn snapshot(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners.read().values().cloned().collect()
    }
}

/// Run one handler, isolating a panic so remaining listeners still receive
/// the event.
fn deliver(handler: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(handler)) {
        let detail = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        warn!(detail = %detail, "Event listener panicked");
    }
}
