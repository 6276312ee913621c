use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Access control configuration for inbound peers
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AccessConfig {
    /// Allowed peer addresses. Empty, or any `*` entry, allows everyone;
    /// otherwise the peer address must match one entry exactly.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

/// Allow-list check on inbound peer addresses
#[derive(Debug, Clone)]
pub struct AccessGuard {
    config: AccessConfig,
}

impl AccessGuard {
    pub fn new(config: AccessConfig) -> Self {
        Self { config }
    }

    /// Whether a peer may talk to the server
    pub fn is_allowed(&self, peer: IpAddr) -> bool {
        if self.config.allowed_ips.is_empty() {
            return true;
        }
        if self.config.allowed_ips.iter().any(|entry| entry == "*") {
            return true;
        }
        let peer = peer.to_string();
        self.config.allowed_ips.iter().any(|entry| entry == &peer)
    }
}
