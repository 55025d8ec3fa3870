//! Live client registry
//!
//! One canonical registration record per authenticated connection, reached
//! through two indices: the transport address key (`ip/port`, assigned
//! before the handshake names the peer) and the display name. Both indices
//! mutate together under one lock, so rename and removal can never leave a
//! stale binding behind. Identity lookups scan records, matching the
//! registry's small working set.
//!
//! The lock is held only for index mutation and snapshots; all frame I/O
//! happens outside it, so unrelated connections never serialize on each
//! other.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::identity::Identity;
use crate::remote::RemoteClient;

/// One authenticated connection
#[derive(Debug, Clone)]
pub struct Registration {
    pub remote: RemoteClient,
    pub connected_at: DateTime<Utc>,
}

/// Outcome of a rename request
#[derive(Debug)]
pub(crate) enum RenameOutcome {
    /// New handle bound under the new name
    Renamed(RemoteClient),
    /// A different peer already holds the requested name
    Collision,
    /// The connection never completed a handshake
    NotRegistered,
}

#[derive(Default)]
struct Inner {
    by_addr: HashMap<String, Arc<Registration>>,
    /// display name -> address key
    by_name: HashMap<String, String>,
}

/// Registry of authenticated connections
#[derive(Default)]
pub(crate) struct ClientRegistry {
    inner: RwLock<Inner>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly authenticated connection under its address key
    /// and display name. A re-handshake on the same connection replaces
    /// the previous record.
    pub fn register(&self, addr_key: &str, remote: RemoteClient) -> Arc<Registration> {
        let registration = Arc::new(Registration {
            remote,
            connected_at: Utc::now(),
        });

        let mut inner = self.inner.write();
        if let Some(previous) = inner.by_addr.remove(addr_key) {
            inner.by_name.remove(previous.remote.name());
        }
        inner
            .by_name
            .insert(registration.remote.name().to_string(), addr_key.to_string());
        inner.by_addr.insert(addr_key.to_string(), registration.clone());
        registration
    }

    /// Rebind a connection under a new display name
    pub fn rename(&self, addr_key: &str, new_name: &str) -> RenameOutcome {
        let mut inner = self.inner.write();

        let Some(current) = inner.by_addr.get(addr_key).cloned() else {
            return RenameOutcome::NotRegistered;
        };

        // Renaming to a name held by a different connection is a collision;
        // renaming to your own name is a no-op rebind.
        if let Some(holder) = inner.by_name.get(new_name) {
            if holder != addr_key {
                return RenameOutcome::Collision;
            }
        }

        let renamed = current.remote.renamed(new_name);
        let registration = Arc::new(Registration {
            remote: renamed.clone(),
            connected_at: current.connected_at,
        });

        inner.by_name.remove(current.remote.name());
        inner.by_name.insert(new_name.to_string(), addr_key.to_string());
        inner.by_addr.insert(addr_key.to_string(), registration);

        RenameOutcome::Renamed(renamed)
    }

    /// Remove a connection; both indices drop together
    pub fn remove_by_addr(&self, addr_key: &str) -> Option<Arc<Registration>> {
        let mut inner = self.inner.write();
        let registration = inner.by_addr.remove(addr_key)?;
        inner.by_name.remove(registration.remote.name());
        Some(registration)
    }

    /// Remove every connection whose stable identity matches
    pub fn remove_by_identity(&self, identity: &Identity) -> Vec<Arc<Registration>> {
        let mut inner = self.inner.write();
        let keys: Vec<String> = inner
            .by_addr
            .iter()
            .filter(|(_, reg)| reg.remote.identity() == identity)
            .map(|(key, _)| key.clone())
            .collect();

        let mut removed = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(registration) = inner.by_addr.remove(&key) {
                inner.by_name.remove(registration.remote.name());
                removed.push(registration);
            }
        }
        removed
    }

    /// Whether the connection behind this address key is authenticated
    pub fn contains_addr(&self, addr_key: &str) -> bool {
        self.inner.read().by_addr.contains_key(addr_key)
    }

    pub fn get_by_addr(&self, addr_key: &str) -> Option<Arc<Registration>> {
        self.inner.read().by_addr.get(addr_key).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<Registration>> {
        let inner = self.inner.read();
        let addr_key = inner.by_name.get(name)?;
        inner.by_addr.get(addr_key).cloned()
    }

    /// Every registered connection
    pub fn snapshot(&self) -> Vec<Arc<Registration>> {
        self.inner.read().by_addr.values().cloned().collect()
    }

    /// Connections whose display name or stable identity equals `target`
    pub fn matching(&self, target: &str) -> Vec<Arc<Registration>> {
        self.inner
            .read()
            .by_addr
            .values()
            .filter(|reg| {
                reg.remote.name() == target || reg.remote.identity().as_str() == target
            })
            .cloned()
            .collect()
    }

    pub fn clear(&self) -> Vec<Arc<Registration>> {
        let mut inner = self.inner.write();
        inner.by_name.clear();
        inner.by_addr.drain().map(|(_, reg)| reg).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_addr.is_empty()
    }
}
