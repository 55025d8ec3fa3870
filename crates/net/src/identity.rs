//! Stable peer identity
//!
//! An [`Identity`] is an opaque, connection-independent token identifying a
//! peer's underlying host. Where it comes from (hardware address, machine
//! id, anything stable) is the business of an [`IdentityProvider`]; the
//! engines only compare and transmit it.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque stable identity token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an externally supplied token
    pub fn new(token: impl Into<String>) -> Self {
        Identity(token.into())
    }

    /// Generate a fresh random token
    pub fn generate() -> Self {
        Identity(Uuid::new_v4().to_string().replace('-', ""))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(token: &str) -> Self {
        Identity(token.to_string())
    }
}

impl From<String> for Identity {
    fn from(token: String) -> Self {
        Identity(token)
    }
}

/// Supplies the stable identity for "this machine"
pub trait IdentityProvider: Send + Sync {
    fn identity(&self) -> Identity;
}

/// Default provider: one generated token held for the provider's lifetime
pub struct GeneratedIdentity {
    token: Identity,
}

impl GeneratedIdentity {
    pub fn new() -> Self {
        GeneratedIdentity {
            token: Identity::generate(),
        }
    }
}

impl Default for GeneratedIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for GeneratedIdentity {
    fn identity(&self) -> Identity {
        self.token.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_is_stable() {
        let provider = GeneratedIdentity::new();
        assert_eq!(provider.identity(), provider.identity());
    }

    #[test]
    fn test_generated_identities_differ() {
        assert_ne!(Identity::generate(), Identity::generate());
    }

    #[test]
    fn test_identity_serde_is_transparent() {
        let id = Identity::new("AA:BB:CC:DD:EE:FF");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"AA:BB:CC:DD:EE:FF\"");
        let back: Identity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
