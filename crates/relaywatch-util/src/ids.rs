//! Strongly-typed identifiers for relaywatch

use std::fmt;
use uuid::Uuid;

/// Unique identifier for a single launch attempt
///
/// A new ID is minted for every call to launch, including attempts that
/// fail to spawn, so events from an older child can never be mistaken for
/// events of its replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaunchId(Uuid);

impl LaunchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LaunchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LaunchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
