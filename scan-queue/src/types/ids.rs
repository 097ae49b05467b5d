use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a consumer; heartbeats and commands are addressed by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(pub Uuid);

impl ConsumerId {
    /// Generate a new unique consumer ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ConsumerId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Generate a new unique bean ID
pub fn new_bean_id() -> String {
    Uuid::new_v4().to_string()
}
