//! Engine configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::identity::{GeneratedIdentity, Identity, IdentityProvider};

/// Handshake retry policy
///
/// The connect frame is resent every `interval` until the server answers;
/// the whole attempt fails with a timeout once `deadline` has elapsed.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            interval: Duration::from_millis(500),
            deadline: Duration::from_secs(10),
        }
    }
}

/// Client engine configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub name: String,
    pub access_key: Option<String>,
    pub identity: Identity,
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// Configuration with a generated identity and default retry policy
    pub fn new(server_addr: SocketAddr, name: impl Into<String>) -> Self {
        ClientConfig {
            server_addr,
            name: name.into(),
            access_key: None,
            identity: GeneratedIdentity::new().identity(),
            retry: RetryPolicy::default(),
        }
    }

    /// Present an access key with the connect request
    pub fn access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    /// Use an externally supplied stable identity
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Server engine configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub access_key: Option<String>,
    pub identity: Identity,
}

impl ServerConfig {
    /// Configuration with a generated identity and no access key
    pub fn new(bind_addr: SocketAddr) -> Self {
        ServerConfig {
            bind_addr,
            access_key: None,
            identity: GeneratedIdentity::new().identity(),
        }
    }

    /// Require clients to present this access key
    pub fn access_key(mut self, key: impl Into<String>) -> Self {
        self.access_key = Some(key.into());
        self
    }

    /// Use an externally supplied stable identity
    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }
}
