//! Ban list and its persistence collaborator
//!
//! Bans are keyed by stable identity and live independently of any
//! connection: banning an identity outlives the session that earned it.
//! Persistence is a collaborator contract; [`JsonBanStore`] is the shipped
//! implementation, one JSON array of identity tokens per file.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::identity::Identity;

/// Shared set of banned identities
#[derive(Default)]
pub struct BanList {
    inner: RwLock<HashSet<Identity>>,
}

impl BanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity; returns whether it was newly banned
    pub fn ban(&self, identity: Identity) -> bool {
        self.inner.write().insert(identity)
    }

    /// Remove an identity; returns whether it was banned
    pub fn unban(&self, identity: &Identity) -> bool {
        self.inner.write().remove(identity)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.inner.read().contains(identity)
    }

    pub fn snapshot(&self) -> HashSet<Identity> {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

/// Ban-list persistence contract
pub trait BanStore: Send + Sync {
    /// Load the persisted set; a missing store yields the empty set
    fn load(&self) -> io::Result<HashSet<Identity>>;

    /// Persist a snapshot, replacing any previous contents
    fn save(&self, bans: &HashSet<Identity>) -> io::Result<()>;
}

/// JSON snapshot file store
pub struct JsonBanStore {
    path: PathBuf,
}

impl JsonBanStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonBanStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BanStore for JsonBanStore {
    fn load(&self) -> io::Result<HashSet<Identity>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e),
        };

        let tokens: Vec<Identity> = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        Ok(tokens.into_iter().collect())
    }

    fn save(&self, bans: &HashSet<Identity>) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Sorted so repeated exports of the same set are byte-identical
        let mut tokens: Vec<&Identity> = bans.iter().collect();
        tokens.sort_by_key(|id| id.as_str());

        let bytes = serde_json::to_vec_pretty(&tokens)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&self.path, bytes)
    }
}
