//! Probe transport abstraction for raw-socket traceroute
//!
//! The prober never touches sockets directly. It drives a [`ProbeTransport`],
//! which hides how a probe is put on the wire and how the ICMP answer is
//! captured. Real transports live in [`udp`] and [`icmp_v4`]; [`simulated`]
//! provides a deterministic fake network for tests.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

pub mod factory;
#[cfg(unix)]
pub mod icmp_v4;
pub mod reply;
pub mod simulated;
#[cfg(unix)]
pub mod udp;
pub mod utils;

/// Protocol to use for probing
///
/// Both protocols elicit ICMP Time Exceeded from intermediate routers in the
/// same way; they differ only in how the destination answers:
/// - **UDP**: the destination replies with ICMP Port Unreachable
/// - **ICMP**: the destination replies with ICMP Echo Reply
///
/// # Examples
///
/// ```
/// use hoptrace::ProbeProtocol;
///
/// let protocol = ProbeProtocol::Udp;
/// println!("Using {} protocol", protocol.description());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProbeProtocol {
    /// UDP datagrams to a high port, answered over a raw ICMP socket
    #[default]
    Udp,
    /// ICMP Echo Request
    Icmp,
}

impl ProbeProtocol {
    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            ProbeProtocol::Udp => "UDP",
            ProbeProtocol::Icmp => "ICMP",
        }
    }
}

/// Socket mode (affects permissions required)
///
/// - **Raw**: full control, requires root or `CAP_NET_RAW`
/// - **Dgram**: ICMP datagram socket; on Linux gated by
///   `net.ipv4.ping_group_range`, on macOS available unprivileged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocketMode {
    /// Raw socket - always requires CAP_NET_RAW or root
    Raw,
    /// Datagram socket - permissions vary by platform
    Dgram,
}

impl SocketMode {
    /// Get a human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            SocketMode::Raw => "Raw",
            SocketMode::Dgram => "Datagram",
        }
    }
}

/// Combined probe configuration actually in use by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMode {
    /// Protocol used for probing
    pub protocol: ProbeProtocol,
    /// Socket mode used to capture responses
    pub socket_mode: SocketMode,
}

impl ProbeMode {
    /// Get a human-readable description of this mode
    pub fn description(&self) -> String {
        format!(
            "{} {} IPv4",
            self.socket_mode.description(),
            self.protocol.description()
        )
    }
}

/// Information about a probe being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Time-to-live value written into the outbound IP header
    pub ttl: u8,
    /// Zero-based attempt number within the hop
    pub attempt: u8,
    /// Run-wide probe sequence number
    pub sequence: u16,
    /// When the probe was handed to the transport
    pub sent_at: Instant,
}

/// Type of response received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// ICMP Time Exceeded (TTL expired in transit)
    TimeExceeded,
    /// ICMP Destination Unreachable, with ICMP code
    DestinationUnreachable(u8),
    /// ICMP Echo Reply
    EchoReply,
}

/// Response matched to the probe currently in flight
#[derive(Debug, Clone)]
pub struct ProbeResponse {
    /// Address that sent the response
    pub from_addr: Ipv4Addr,
    /// Type of response
    pub response_type: ResponseType,
    /// Probe that triggered this response
    pub probe_info: ProbeInfo,
    /// When the response was captured
    pub received_at: Instant,
}

/// A send/receive socket pair able to emit TTL-limited probes
///
/// A transport is owned by exactly one run. Dropping it closes its sockets.
pub trait ProbeTransport: Send {
    /// Get the mode this transport is operating in
    fn mode(&self) -> ProbeMode;

    /// Set the TTL for subsequent outgoing probes
    fn set_ttl(&mut self, ttl: u8) -> Result<()>;

    /// Send a probe to the destination
    ///
    /// The transport remembers the probe as the one in flight; responses to
    /// earlier probes are discarded from then on.
    fn send_probe(&mut self, destination: Ipv4Addr, probe: &ProbeInfo) -> Result<()>;

    /// Wait up to `timeout` for a response to the probe in flight
    ///
    /// Returns `Ok(None)` when nothing matching arrived in time.
    fn recv_response(&mut self, timeout: Duration) -> Result<Option<ProbeResponse>>;
}

impl std::fmt::Debug for dyn ProbeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProbeTransport({})", self.mode().description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_mode_description() {
        let mode = ProbeMode {
            protocol: ProbeProtocol::Icmp,
            socket_mode: SocketMode::Dgram,
        };
        assert_eq!(mode.description(), "Datagram ICMP IPv4");

        let mode = ProbeMode {
            protocol: ProbeProtocol::Udp,
            socket_mode: SocketMode::Raw,
        };
        assert_eq!(mode.description(), "Raw UDP IPv4");
    }

    #[test]
    fn test_default_protocol_is_udp() {
        assert_eq!(ProbeProtocol::default(), ProbeProtocol::Udp);
    }

    #[test]
    fn test_response_types() {
        let resp = ResponseType::DestinationUnreachable(3);
        match resp {
            ResponseType::DestinationUnreachable(code) => assert_eq!(code, 3),
            _ => panic!("Wrong response type"),
        }
    }
}
