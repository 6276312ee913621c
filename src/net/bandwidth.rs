use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::error::BofangError;

/// Bandwidth budget configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BandwidthConfig {
    /// Whether throttling is active
    #[serde(default)]
    pub enabled: bool,
    /// Byte budget per window; 0 means unlimited
    #[serde(default)]
    pub max_bytes_per_window: u64,
    /// Window length in milliseconds
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_window_ms() -> u64 {
    1000
}

impl Default for BandwidthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_bytes_per_window: 0,
            window_ms: default_window_ms(),
        }
    }
}

impl BandwidthConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_ms == 0 {
            return Err(BofangError::config("bandwidth.window_ms must be greater than 0").into());
        }
        Ok(())
    }
}

/// Per-connection transfer record; used for reporting only.
/// Throttling decisions always come from the shared window state.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionBandwidth {
    /// Bytes moved by this connection in the current window
    pub bytes: u64,
    /// When this connection first transferred in the current window
    pub started: Instant,
}

#[derive(Debug)]
struct WindowState {
    window_start: Instant,
    window_bytes: u64,
    per_connection: HashMap<u64, ConnectionBandwidth>,
}

/// Per-window byte budget shared across all connections.
///
/// The window rollover is the sole synchronization point: it clears the
/// global counter and the per-connection tracking in one step. The internal
/// lock is only held for bookkeeping, never across actual I/O.
#[derive(Debug)]
pub struct BandwidthLimiter {
    config: BandwidthConfig,
    state: Mutex<WindowState>,
}

impl BandwidthLimiter {
    pub fn new(config: BandwidthConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                window_bytes: 0,
                per_connection: HashMap::new(),
            }),
        }
    }

    fn unlimited(&self) -> bool {
        !self.config.enabled || self.config.max_bytes_per_window == 0
    }

    fn window(&self) -> Duration {
        Duration::from_millis(self.config.window_ms)
    }

    /// Roll the window forward if its boundary has passed
    fn roll(&self, state: &mut WindowState) {
        if state.window_start.elapsed() >= self.window() {
            state.window_start = Instant::now();
            state.window_bytes = 0;
            state.per_connection.clear();
        }
    }

    /// Whether a transfer of `bytes` fits the current window's budget
    pub fn can_transfer(&self, bytes: u64) -> bool {
        if self.unlimited() {
            return true;
        }
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state);
        state.window_bytes + bytes <= self.config.max_bytes_per_window
    }

    /// Account a completed transfer against the window and the connection
    pub fn record_transfer(&self, conn_id: u64, bytes: u64) {
        if self.unlimited() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state);
        state.window_bytes += bytes;
        let record = state
            .per_connection
            .entry(conn_id)
            .or_insert(ConnectionBandwidth {
                bytes: 0,
                started: Instant::now(),
            });
        record.bytes += bytes;
    }

    /// How long the caller should wait before `bytes` fit the budget,
    /// proportional to the excess over the window budget
    pub fn calculate_delay(&self, bytes: u64) -> Duration {
        if self.unlimited() {
            return Duration::ZERO;
        }
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state);
        let projected = state.window_bytes + bytes;
        if projected <= self.config.max_bytes_per_window {
            return Duration::ZERO;
        }
        let excess = projected - self.config.max_bytes_per_window;
        let delay_ms =
            (self.config.window_ms as u128 * excess as u128) / self.config.max_bytes_per_window as u128;
        Duration::from_millis(delay_ms.min(u64::MAX as u128) as u64)
    }

    /// Sleep out the computed delay (if any), then account the transfer.
    /// The lock is taken inside the called methods, never across the sleep.
    pub async fn admit(&self, conn_id: u64, bytes: u64) {
        if self.unlimited() {
            return;
        }
        let delay = self.calculate_delay(bytes);
        if !delay.is_zero() {
            trace!("throttling connection {} for {:?}", conn_id, delay);
            tokio::time::sleep(delay).await;
        }
        self.record_transfer(conn_id, bytes);
    }

    /// Bytes a connection moved in the current window (reporting only)
    pub fn connection_bytes(&self, conn_id: u64) -> u64 {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state);
        state
            .per_connection
            .get(&conn_id)
            .map(|record| record.bytes)
            .unwrap_or(0)
    }

    /// Bytes moved globally in the current window
    pub fn window_bytes(&self) -> u64 {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state);
        state.window_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(budget: u64, window_ms: u64) -> BandwidthLimiter {
        BandwidthLimiter::new(BandwidthConfig {
            enabled: true,
            max_bytes_per_window: budget,
            window_ms,
        })
    }

    #[test]
    fn test_unlimited_always_allows() {
        let limiter = BandwidthLimiter::new(BandwidthConfig::default());
        assert!(limiter.can_transfer(u64::MAX));
        assert_eq!(limiter.calculate_delay(u64::MAX), Duration::ZERO);
    }

    #[test]
    fn test_budget_enforced_within_window() {
        let limiter = limiter(1000, 60_000);
        assert!(limiter.can_transfer(1000));
        assert!(!limiter.can_transfer(1001));

        limiter.record_transfer(1, 800);
        assert!(limiter.can_transfer(200));
        assert!(!limiter.can_transfer(201));
    }

    #[tokio::test]
    async fn test_window_rollover_resets_counters() {
        let limiter = limiter(100, 20);
        limiter.record_transfer(1, 100);
        assert!(!limiter.can_transfer(1));
        assert_eq!(limiter.connection_bytes(1), 100);

        tokio::time::sleep(Duration::from_millis(40)).await;

        // Boundary passed: both the global and per-connection state reset
        assert!(limiter.can_transfer(100));
        assert_eq!(limiter.connection_bytes(1), 0);
        assert_eq!(limiter.window_bytes(), 0);
    }

    #[test]
    fn test_delay_proportional_to_excess() {
        let limiter = limiter(1000, 1000);
        limiter.record_transfer(1, 1000);

        // 500 excess bytes over a 1000-byte/1s budget is a 500ms delay
        let delay = limiter.calculate_delay(500);
        assert_eq!(delay, Duration::from_millis(500));

        let bigger = limiter.calculate_delay(2000);
        assert_eq!(bigger, Duration::from_millis(2000));
    }

    #[test]
    fn test_per_connection_tracking() {
        let limiter = limiter(10_000, 60_000);
        limiter.record_transfer(1, 100);
        limiter.record_transfer(2, 300);
        limiter.record_transfer(1, 50);

        assert_eq!(limiter.connection_bytes(1), 150);
        assert_eq!(limiter.connection_bytes(2), 300);
        assert_eq!(limiter.connection_bytes(3), 0);
        assert_eq!(limiter.window_bytes(), 450);
    }

    #[tokio::test]
    async fn test_admit_accounts_transfer() {
        let limiter = limiter(10_000, 60_000);
        limiter.admit(7, 2500).await;
        assert_eq!(limiter.connection_bytes(7), 2500);
    }
}
