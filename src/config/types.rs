use serde::{Deserialize, Serialize};

use crate::device::constants::{DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_TX_TIMEOUT_MS};
use crate::telemetry::heart_rate::DEFAULT_SCAN_SECS;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Preferred serial port; when absent the first enumerated port is used.
    pub port: Option<String>,
    pub volume: u8,
    pub squelch: u8,
    pub tx_timeout_ms: u32,
    pub idle_timeout_ms: u32,
    pub heart_rate_scan_secs: u64,
    /// ISO country code override for the emergency number; when absent the
    /// process locale decides.
    pub region: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: None,
            volume: 5,
            squelch: 2,
            tx_timeout_ms: DEFAULT_TX_TIMEOUT_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
            heart_rate_scan_secs: DEFAULT_SCAN_SECS,
            region: None,
        }
    }
}
