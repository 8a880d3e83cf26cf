//! Result types for traceroute operations

use crate::socket::ProbeProtocol;
use crate::traceroute::types::HopRecord;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The destination itself answered a probe
    ReachedDestination,
    /// Every TTL up to `max_hops` was probed without reaching the destination
    MaxHopsExceeded,
    /// The run was cut short by an error or cancellation
    Aborted,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::ReachedDestination => write!(f, "reached destination"),
            Termination::MaxHopsExceeded => write!(f, "max hops exceeded"),
            Termination::Aborted => write!(f, "aborted"),
        }
    }
}

/// Result of a traceroute operation
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let result = hoptrace::trace("example.com").await?;
///
/// println!("Reached destination: {}", result.destination_reached());
/// println!("Total hops: {}", result.hop_count());
///
/// for hop in &result.hops {
///     println!("Hop {}: {}", hop.ttl, hop.host_or_address());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteResult {
    /// Target host as provided
    pub target: String,
    /// Resolved destination address
    pub destination: Ipv4Addr,
    /// Local egress address, when known
    pub source: Option<Ipv4Addr>,
    /// Hops in probing order
    pub hops: Vec<HopRecord>,
    /// Why the run stopped
    pub termination: Termination,
    /// Protocol used for probing
    pub protocol: ProbeProtocol,
    /// Total duration of the run
    pub total_duration: Duration,
}

impl TracerouteResult {
    /// Get the number of hops recorded
    pub fn hop_count(&self) -> usize {
        self.hops.len()
    }

    /// Whether the destination answered
    pub fn destination_reached(&self) -> bool {
        self.termination == Termination::ReachedDestination
    }

    /// Get the hop at which the destination answered, if any
    pub fn destination_hop(&self) -> Option<&HopRecord> {
        self.hops
            .iter()
            .find(|hop| hop.is_destination(self.destination))
    }

    /// Get the highest TTL recorded
    pub fn max_ttl(&self) -> Option<u8> {
        self.hops.iter().map(|h| h.ttl).max()
    }

    /// Check if a specific TTL had a response
    pub fn has_response_at_ttl(&self, ttl: u8) -> bool {
        self.hops.iter().any(|h| h.ttl == ttl && h.is_success())
    }

    /// Hops where at least one attempt got a response
    pub fn responding_hops(&self) -> Vec<&HopRecord> {
        self.hops.iter().filter(|h| h.is_success()).collect()
    }

    /// Mean of the per-hop RTTs in milliseconds, over hops that responded
    pub fn average_rtt_ms(&self) -> Option<f64> {
        let rtts: Vec<f64> = self.hops.iter().filter_map(HopRecord::rtt_ms).collect();

        if rtts.is_empty() {
            None
        } else {
            Some(rtts.iter().sum::<f64>() / rtts.len() as f64)
        }
    }
}
