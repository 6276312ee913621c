use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::BofangError;

/// Server configuration for the loopback proxy endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Preferred listen port; 0 means "pick any free port"
    #[serde(default)]
    pub port: u16,
    /// Maximum number of concurrently handled connections.
    /// Sockets accepted beyond this are closed immediately (load shedding).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Directory served for static resource paths
    #[serde(default = "default_resources_dir")]
    pub resources_dir: String,
    /// Read timeout for a single inbound request, in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,
    /// Upper bound for an inbound request body, in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,
}

fn default_max_connections() -> usize {
    64
}

fn default_resources_dir() -> String {
    "www".to_string()
}

fn default_read_timeout() -> u64 {
    15
}

fn default_max_body_bytes() -> u64 {
    4 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            max_connections: default_max_connections(),
            resources_dir: default_resources_dir(),
            read_timeout: default_read_timeout(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(BofangError::config("server.max_connections must be greater than 0").into());
        }
        if self.read_timeout == 0 {
            return Err(BofangError::config("server.read_timeout must be greater than 0").into());
        }
        Ok(())
    }
}
