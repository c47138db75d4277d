use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier for stored records.
///
/// Aggregation providers represent some identifiers as integers wider than
/// any native number type, so external ids are always carried as strings and
/// hashed into a deterministic UUID when they become local ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    /// Namespace for deterministic ids derived from provider identifiers.
    const NAMESPACE: Uuid = Uuid::from_u128(0x8f0e4c64_2f2b_4c11_9d3e_5a6b70d1b2c9);

    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create an id from an arbitrary string, verbatim.
    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Create a deterministic id from a provider-side identifier.
    ///
    /// Uses UUIDv5 so the same provider id always maps to the same local id,
    /// which keeps repeated reconciliation runs from minting duplicates.
    pub fn from_external(value: &str) -> Self {
        Self(Uuid::new_v5(&Self::NAMESPACE, value.as_bytes()).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_external_is_deterministic() {
        let first = Id::from_external("provider-account-10293847566473");
        let second = Id::from_external("provider-account-10293847566473");
        assert_eq!(first, second);
    }

    #[test]
    fn from_external_differs_for_different_inputs() {
        let first = Id::from_external("remote-account-1");
        let second = Id::from_external("remote-account-2");
        assert_ne!(first, second);
    }

    #[test]
    fn from_string_keeps_value() {
        let id = Id::from_string("link-123");
        assert_eq!(id.as_str(), "link-123");
        assert_eq!(id.to_string(), "link-123");
    }
}
