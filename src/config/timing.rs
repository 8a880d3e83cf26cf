//! Global timing configuration with compile-time defaults and runtime overrides
//!
//! These knobs tune how the prober waits, not what it measures. Per-run values
//! such as the probe timeout live in [`crate::ProbeOptions`]; the values here
//! apply process-wide and can be overridden once at startup.

use once_cell::sync::OnceCell;
use std::time::Duration;

// Compile-time defaults as public constants (in milliseconds)
/// Default slice length for a single blocking receive while waiting on a probe
pub const DEFAULT_RECEIVE_POLL_INTERVAL_MS: u64 = 50;
/// Default upper bound for one reverse DNS lookup
pub const DEFAULT_REVERSE_DNS_TIMEOUT_MS: u64 = 1000;

/// Smallest receive slice handed to a socket.
///
/// A zero read timeout means "block forever" for `SO_RCVTIMEO`, so slices are
/// never allowed to reach zero.
pub const MIN_RECEIVE_SLICE: Duration = Duration::from_millis(1);

/// Runtime timing overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    /// Longest single blocking receive; cancellation is checked between slices
    pub receive_poll_interval: Duration,
    /// Upper bound for one reverse DNS lookup
    pub reverse_dns_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            receive_poll_interval: Duration::from_millis(DEFAULT_RECEIVE_POLL_INTERVAL_MS),
            reverse_dns_timeout: Duration::from_millis(DEFAULT_REVERSE_DNS_TIMEOUT_MS),
        }
    }
}

// Runtime override storage - set once at program startup
static OVERRIDE_CONFIG: OnceCell<TimingConfig> = OnceCell::new();

/// Get the receive poll interval
pub fn receive_poll_interval() -> Duration {
    OVERRIDE_CONFIG
        .get()
        .map(|c| c.receive_poll_interval)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_RECEIVE_POLL_INTERVAL_MS))
        .max(MIN_RECEIVE_SLICE)
}

/// Get the reverse DNS lookup timeout
pub fn reverse_dns_timeout() -> Duration {
    OVERRIDE_CONFIG
        .get()
        .map(|c| c.reverse_dns_timeout)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_REVERSE_DNS_TIMEOUT_MS))
}

/// Set the global timing configuration
///
/// This should be called once at program startup if custom timing is needed.
/// Returns the rejected configuration if one has already been set.
pub fn set_config(config: TimingConfig) -> Result<(), TimingConfig> {
    OVERRIDE_CONFIG.set(config)
}

/// Check if custom timing configuration has been set
pub fn is_custom_config_set() -> bool {
    OVERRIDE_CONFIG.get().is_some()
}
