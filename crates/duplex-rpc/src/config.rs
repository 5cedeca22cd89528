//! Peer configuration
//!
//! Loaded from TOML or built in code. Every field has a default, so an empty
//! document is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{PeerError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Label attached to this peer's log spans
    pub name: String,
    /// First invocation id handed out by the call table
    pub initial_id: u64,
    /// Give up on an outstanding call after this many milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_ms: Option<u64>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: "peer".to_string(),
            initial_id: 1,
            call_timeout_ms: None,
        }
    }
}

impl PeerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PeerError::InvalidConfig(e.to_string()))
    }

    /// Read a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_initial_id(mut self, initial_id: u64) -> Self {
        self.initial_id = initial_id;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}
