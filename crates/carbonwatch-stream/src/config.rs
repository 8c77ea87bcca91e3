//! Listener configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy. Disabled by default: a transport failure ends the
/// process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Re-establish the session after a transport failure
    #[serde(default)]
    pub enabled: bool,
    /// Maximum reconnect attempts per outage
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Random jitter of ±`jitter_fraction * backoff`
    #[serde(default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
    /// Replay logs missed during the outage via a historical query
    #[serde(default = "bool_true")]
    pub backfill: bool,
}

fn default_max_attempts() -> u32 { 5 }
fn default_initial_backoff_ms() -> u64 { 500 }
fn default_max_backoff_ms() -> u64 { 30_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_jitter_fraction() -> f64 { 0.2 }
fn bool_true() -> bool { true }

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter_fraction: default_jitter_fraction(),
            backfill: true,
        }
    }
}

/// Top-level listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bound on connect + subscription acknowledgement
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_handshake_timeout_ms() -> u64 { 10_000 }

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ListenerConfig {
    /// Fail-fast configuration with reconnects turned on.
    pub fn resilient() -> Self {
        Self {
            reconnect: ReconnectConfig { enabled: true, ..Default::default() },
            ..Default::default()
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}
