//! Core types for traceroute operations

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Outcome of a single probe attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeAttempt {
    /// A matching ICMP response arrived
    Reply {
        /// Address that answered
        address: Ipv4Addr,
        /// Time from send to receipt
        rtt: Duration,
    },
    /// Nothing matching arrived before the timeout
    TimedOut,
}

impl ProbeAttempt {
    /// Responder address, if the attempt succeeded
    pub fn address(&self) -> Option<Ipv4Addr> {
        match self {
            ProbeAttempt::Reply { address, .. } => Some(*address),
            ProbeAttempt::TimedOut => None,
        }
    }

    /// Round-trip time, if the attempt succeeded
    pub fn rtt(&self) -> Option<Duration> {
        match self {
            ProbeAttempt::Reply { rtt, .. } => Some(*rtt),
            ProbeAttempt::TimedOut => None,
        }
    }

    /// Whether the attempt got a response
    pub fn is_reply(&self) -> bool {
        matches!(self, ProbeAttempt::Reply { .. })
    }
}

/// Everything observed at one TTL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopRecord {
    /// Time-to-live value
    pub ttl: u8,
    /// Attempts in the order they were made
    pub attempts: Vec<ProbeAttempt>,
    /// First address that answered at this TTL
    pub address: Option<Ipv4Addr>,
    /// Reverse DNS hostname
    pub hostname: Option<String>,
}

impl HopRecord {
    /// Create an empty record for `ttl`
    pub fn new(ttl: u8) -> Self {
        Self {
            ttl,
            attempts: Vec::new(),
            address: None,
            hostname: None,
        }
    }

    /// Append an attempt; the first reply fixes the hop address
    pub fn push(&mut self, attempt: ProbeAttempt) {
        if self.address.is_none() {
            self.address = attempt.address();
        }
        self.attempts.push(attempt);
    }

    /// Hop address as text, `*` when nothing answered
    pub fn address_string(&self) -> String {
        self.address
            .map_or_else(|| "*".to_string(), |addr| addr.to_string())
    }

    /// Hostname if known, otherwise the address text
    pub fn host_or_address(&self) -> String {
        self.hostname
            .clone()
            .unwrap_or_else(|| self.address_string())
    }

    /// Whether any attempt got a response
    pub fn is_success(&self) -> bool {
        self.attempts.iter().any(ProbeAttempt::is_reply)
    }

    /// Round-trip times of the successful attempts, in attempt order
    pub fn rtts(&self) -> Vec<Duration> {
        self.attempts.iter().filter_map(ProbeAttempt::rtt).collect()
    }

    /// RTT of the first successful attempt
    pub fn rtt(&self) -> Option<Duration> {
        self.attempts.iter().find_map(ProbeAttempt::rtt)
    }

    /// Get RTT in milliseconds
    pub fn rtt_ms(&self) -> Option<f64> {
        self.rtt().map(|d| d.as_secs_f64() * 1000.0)
    }

    /// Check if any attempt at this hop was answered by the destination
    pub fn is_destination(&self, destination: Ipv4Addr) -> bool {
        self.attempts
            .iter()
            .any(|attempt| attempt.address() == Some(destination))
    }
}
