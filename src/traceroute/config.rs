//! Probe options for a traceroute run

use crate::socket::{ProbeProtocol, SocketMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default destination UDP base port
pub const DEFAULT_PORT: u16 = 33434;
/// Default highest TTL probed
pub const DEFAULT_MAX_HOPS: u8 = 64;
/// Default starting TTL
pub const DEFAULT_FIRST_HOP: u8 = 1;
/// Default per-probe timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
/// Default number of probe attempts per TTL
pub const DEFAULT_RETRIES: u8 = 3;
/// Default total probe packet size in bytes
pub const DEFAULT_PACKET_SIZE: u16 = 512;

/// IPv4 header plus UDP or ICMP echo header
pub const MIN_PACKET_SIZE: u16 = 28;
/// Receive buffers never shrink below the size every ICMP error fits in
pub const MIN_RECEIVE_BUFFER: usize = 576;

/// Options for a single traceroute run
///
/// Options that are not set resolve to their defaults once, when the options
/// are built (or deserialized), and cannot change afterwards.
///
/// # Examples
///
/// ```
/// use hoptrace::ProbeOptions;
/// use std::time::Duration;
///
/// let options = ProbeOptions::builder()
///     .max_hops(20)
///     .timeout(Duration::from_millis(500))
///     .build()
///     .unwrap();
///
/// assert_eq!(options.max_hops(), 20);
/// assert_eq!(options.retries(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeOptions {
    port: u16,
    max_hops: u8,
    first_hop: u8,
    timeout: Duration,
    retries: u8,
    packet_size: u16,
    protocol: ProbeProtocol,
    socket_mode: Option<SocketMode>,
    resolve_hostnames: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_hops: DEFAULT_MAX_HOPS,
            first_hop: DEFAULT_FIRST_HOP,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            retries: DEFAULT_RETRIES,
            packet_size: DEFAULT_PACKET_SIZE,
            protocol: ProbeProtocol::default(),
            socket_mode: None,
            resolve_hostnames: true,
        }
    }
}

impl ProbeOptions {
    /// Create a new options builder
    pub fn builder() -> ProbeOptionsBuilder {
        ProbeOptionsBuilder::new()
    }

    /// Destination UDP base port; probe `n` of a run targets `port + n`
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Highest TTL probed (inclusive)
    pub fn max_hops(&self) -> u8 {
        self.max_hops
    }

    /// First TTL probed
    pub fn first_hop(&self) -> u8 {
        self.first_hop
    }

    /// Per-probe wait before declaring the probe lost
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe attempts per TTL
    pub fn retries(&self) -> u8 {
        self.retries
    }

    /// Total probe packet size, IPv4 header included
    pub fn packet_size(&self) -> u16 {
        self.packet_size
    }

    /// Size of the buffer responses are received into
    pub fn receive_buffer_size(&self) -> usize {
        usize::from(self.packet_size).max(MIN_RECEIVE_BUFFER)
    }

    /// Probe protocol
    pub fn protocol(&self) -> ProbeProtocol {
        self.protocol
    }

    /// Preferred socket mode for ICMP probing
    pub fn socket_mode(&self) -> Option<SocketMode> {
        self.socket_mode
    }

    /// Whether hop addresses are reverse-resolved
    pub fn resolve_hostnames(&self) -> bool {
        self.resolve_hostnames
    }

    /// Largest number of hops a run with these options can record
    pub fn hop_budget(&self) -> usize {
        usize::from(self.max_hops.saturating_sub(self.first_hop)) + 1
    }

    /// Validate the options
    pub fn validate(&self) -> Result<(), String> {
        if self.first_hop < 1 {
            return Err("first_hop must be at least 1".to_string());
        }
        if self.max_hops < self.first_hop {
            return Err("max_hops must be greater than or equal to first_hop".to_string());
        }
        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }
        if self.retries < 1 {
            return Err("retries must be at least 1".to_string());
        }
        if self.packet_size < MIN_PACKET_SIZE {
            return Err(format!("packet_size must be at least {MIN_PACKET_SIZE} bytes"));
        }
        Ok(())
    }
}

/// Builder for [`ProbeOptions`]
#[derive(Debug, Clone, Default)]
pub struct ProbeOptionsBuilder {
    port: Option<u16>,
    max_hops: Option<u8>,
    first_hop: Option<u8>,
    timeout: Option<Duration>,
    retries: Option<u8>,
    packet_size: Option<u16>,
    protocol: Option<ProbeProtocol>,
    socket_mode: Option<SocketMode>,
    resolve_hostnames: Option<bool>,
}

impl ProbeOptionsBuilder {
    /// Create a new builder with nothing set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the destination UDP base port
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the highest TTL probed
    pub fn max_hops(mut self, hops: u8) -> Self {
        self.max_hops = Some(hops);
        self
    }

    /// Set the first TTL probed
    pub fn first_hop(mut self, ttl: u8) -> Self {
        self.first_hop = Some(ttl);
        self
    }

    /// Set the per-probe timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the number of attempts per TTL
    pub fn retries(mut self, retries: u8) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Set the total probe packet size
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = Some(size);
        self
    }

    /// Set the probe protocol
    pub fn protocol(mut self, protocol: ProbeProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Set the preferred socket mode
    pub fn socket_mode(mut self, mode: SocketMode) -> Self {
        self.socket_mode = Some(mode);
        self
    }

    /// Enable or disable reverse DNS for hop addresses
    pub fn resolve_hostnames(mut self, enable: bool) -> Self {
        self.resolve_hostnames = Some(enable);
        self
    }

    /// Resolve unset options to their defaults and validate the result
    pub fn build(self) -> Result<ProbeOptions, String> {
        let defaults = ProbeOptions::default();
        let options = ProbeOptions {
            port: self.port.unwrap_or(defaults.port),
            max_hops: self.max_hops.unwrap_or(defaults.max_hops),
            first_hop: self.first_hop.unwrap_or(defaults.first_hop),
            timeout: self.timeout.unwrap_or(defaults.timeout),
            retries: self.retries.unwrap_or(defaults.retries),
            packet_size: self.packet_size.unwrap_or(defaults.packet_size),
            protocol: self.protocol.unwrap_or(defaults.protocol),
            socket_mode: self.socket_mode.or(defaults.socket_mode),
            resolve_hostnames: self.resolve_hostnames.unwrap_or(defaults.resolve_hostnames),
        };
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ProbeOptions::default();
        assert_eq!(options.port(), 33434);
        assert_eq!(options.max_hops(), 64);
        assert_eq!(options.first_hop(), 1);
        assert_eq!(options.timeout().as_millis(), 1000);
        assert_eq!(options.retries(), 3);
        assert_eq!(options.packet_size(), 512);
        assert_eq!(options.protocol(), ProbeProtocol::Udp);
        assert_eq!(options.socket_mode(), None);
        assert!(options.resolve_hostnames());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder_resolves_unset_options_to_defaults() {
        let options = ProbeOptions::builder().build().unwrap();
        assert_eq!(options, ProbeOptions::default());
    }

    #[test]
    fn test_options_builder() {
        let options = ProbeOptions::builder()
            .port(40000)
            .max_hops(20)
            .first_hop(3)
            .timeout(Duration::from_millis(500))
            .retries(1)
            .packet_size(60)
            .protocol(ProbeProtocol::Icmp)
            .socket_mode(SocketMode::Dgram)
            .resolve_hostnames(false)
            .build()
            .unwrap();

        assert_eq!(options.port(), 40000);
        assert_eq!(options.max_hops(), 20);
        assert_eq!(options.first_hop(), 3);
        assert_eq!(options.timeout().as_millis(), 500);
        assert_eq!(options.retries(), 1);
        assert_eq!(options.packet_size(), 60);
        assert_eq!(options.protocol(), ProbeProtocol::Icmp);
        assert_eq!(options.socket_mode(), Some(SocketMode::Dgram));
        assert!(!options.resolve_hostnames());
        assert_eq!(options.hop_budget(), 18);
    }

    #[test]
    fn test_options_validation() {
        assert!(ProbeOptions::builder().first_hop(0).build().is_err());
        assert!(ProbeOptions::builder()
            .first_hop(10)
            .max_hops(5)
            .build()
            .is_err());
        assert!(ProbeOptions::builder()
            .timeout(Duration::from_millis(0))
            .build()
            .is_err());
        assert!(ProbeOptions::builder().retries(0).build().is_err());
        assert!(ProbeOptions::builder().packet_size(27).build().is_err());
        assert!(ProbeOptions::builder().packet_size(28).build().is_ok());
    }

    #[test]
    fn test_receive_buffer_never_below_minimum() {
        let small = ProbeOptions::builder().packet_size(52).build().unwrap();
        assert_eq!(small.receive_buffer_size(), MIN_RECEIVE_BUFFER);

        let large = ProbeOptions::builder().packet_size(1500).build().unwrap();
        assert_eq!(large.receive_buffer_size(), 1500);
    }

    #[test]
    fn test_deserialize_fills_missing_fields_with_defaults() {
        let options: ProbeOptions = serde_json::from_str(r#"{"max_hops": 12}"#).unwrap();
        assert_eq!(options.max_hops(), 12);
        assert_eq!(options.retries(), DEFAULT_RETRIES);
        assert_eq!(options.port(), DEFAULT_PORT);
    }
}
