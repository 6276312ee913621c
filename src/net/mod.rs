pub mod access;
pub mod bandwidth;
pub mod client;
pub mod hosts;

pub use access::{AccessConfig, AccessGuard};
pub use bandwidth::{BandwidthConfig, BandwidthLimiter, ConnectionBandwidth};
pub use client::HttpClient;
pub use hosts::{DnsCacheEntry, HostEntry, HostsConfig, HostsResolver};
