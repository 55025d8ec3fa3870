//! Tether Network Library
//!
//! A peer-identification messaging protocol: a server accepts connections
//! from named clients, authenticates them, and relays typed payloads
//! between peers over a reliable byte stream.
//!
//! # Architecture
//!
//! - **Server**: accepts connections, runs the per-connection command
//!   state machine, owns the client registry and ban list
//! - **Client**: drives the outbound handshake and connection lifecycle
//! - **Listeners**: observe lifecycle and data events without touching
//!   the transport
//!
//! Both engines speak compiled [`tether_wire::Payload`] frames; secured
//! transports plug in as externally established duplex streams.
//!
//! # Usage
//!
//! ```ignore
//! // Host a server
//! let server = Server::new(ServerConfig::new("0.0.0.0:49305".parse()?));
//! server.listeners().register(Arc::new(MyObserver));
//! server.start().await?;
//!
//! // Connect a client
//! let client = Client::new(ClientConfig::new(addr, "alice"));
//! client.connect().await?;
//!
//! // Exchange payloads
//! let mut payload = Payload::new();
//! payload.write_text("note", "hello");
//! client.send(&payload).await?;
//! server.broadcast(&payload).await;
//! ```

pub mod ban;
pub mod client;
pub mod config;
mod control;
pub mod error;
pub mod event;
pub mod identity;
pub mod listener;
mod registry;
pub mod remote;
pub mod server;
pub mod transport;

pub use ban::{BanList, BanStore, JsonBanStore};
pub use client::{Client, ConnectionState};
pub use config::{ClientConfig, RetryPolicy, ServerConfig};
pub use error::{Error, Result};
pub use event::{ClientSideEvent, DisconnectReason, ServerInfo, ServerSideEvent};
pub use identity::{GeneratedIdentity, Identity, IdentityProvider};
pub use listener::{EventListener, ListenerId, ListenerRegistry};
pub use remote::{RemoteClient, RemoteServer};
pub use server::Server;
pub use transport::{BoxedStream, Duplex};

/// Default port for tether servers
pub const DEFAULT_PORT: u16 = 49305;
