use serde::{Deserialize, Serialize};

use crate::memory::DEFAULT_MAX_CONNECTIONS;

/// Connection settings for a document store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store location, e.g. `memory:arbor`.
    pub url: String,
    pub user: String,
    pub password: String,
    /// Upper bound on concurrently acquired connections.
    pub max_connections: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "memory:arbor".to_string(),
            user: "admin".to_string(),
            password: "admin".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}
