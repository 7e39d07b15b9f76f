//! Serializable connection configuration.

use serde::{Deserialize, Serialize};

use crate::handle::{ConnectFlags, ConnectParams};
use crate::highlevel::QueryMode;

/// Everything needed to open a high-level connection.
///
/// Connection parameters sit at the top level next to `flags` and `mode`:
///
/// ```json
/// { "host": "db.internal", "user": "app", "port": 3306, "flags": 32, "mode": "streamed" }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(flatten)]
    pub params: ConnectParams,

    #[serde(default)]
    pub flags: ConnectFlags,

    #[serde(default)]
    pub mode: QueryMode,
}

impl ConnectionConfig {
    pub fn new(params: ConnectParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn flags(mut self, flags: ConnectFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
