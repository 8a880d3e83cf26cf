//! Deterministic simulated network
//!
//! [`SimulatedNetwork`] describes which address answers at each TTL and which
//! attempts are lost. Every transport it hands out shares one probe log, so a
//! test can inspect exactly what was sent after the run has consumed the
//! transport.
//!
//! ```
//! use hoptrace::socket::simulated::SimulatedNetwork;
//! use std::net::Ipv4Addr;
//!
//! let destination = Ipv4Addr::new(93, 184, 216, 34);
//! let network = SimulatedNetwork::new(destination)
//!     .hop(1, Ipv4Addr::new(192, 168, 1, 1))
//!     .silent(2)
//!     .destination_at(3);
//! let _transport = network.transport();
//! assert_eq!(network.sent_count(), 0);
//! ```

use super::{
    ProbeInfo, ProbeMode, ProbeProtocol, ProbeResponse, ProbeTransport, ResponseType, SocketMode,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How a single TTL behaves
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HopBehavior {
    /// Every probe at this TTL is lost
    Silent,
    /// Every probe at this TTL is answered by the given address
    Responds(Ipv4Addr),
    /// Attempt `n` is answered by entry `n`; `None` or a missing entry is a loss
    Script(Vec<Option<Ipv4Addr>>),
}

/// A probe observed by the simulated network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentProbe {
    /// TTL the probe was sent with
    pub ttl: u8,
    /// Attempt number within the hop
    pub attempt: u8,
    /// Run-wide sequence number
    pub sequence: u16,
}

/// Description of a deterministic network path
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    destination: Ipv4Addr,
    destination_ttl: Option<u8>,
    hops: HashMap<u8, HopBehavior>,
    rtt_per_hop: Duration,
    protocol: ProbeProtocol,
    set_ttl_failure: Option<(u8, i32)>,
    send_failure: Option<(u8, i32)>,
    recv_failure: Option<(u8, i32)>,
    log: Arc<Mutex<Vec<SentProbe>>>,
}

impl SimulatedNetwork {
    /// Create a network where nothing answers until configured otherwise
    pub fn new(destination: Ipv4Addr) -> Self {
        Self {
            destination,
            destination_ttl: None,
            hops: HashMap::new(),
            rtt_per_hop: Duration::from_millis(2),
            protocol: ProbeProtocol::Udp,
            set_ttl_failure: None,
            send_failure: None,
            recv_failure: None,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The destination address of this path
    pub fn destination(&self) -> Ipv4Addr {
        self.destination
    }

    /// Router at `ttl` answers every probe
    pub fn hop(mut self, ttl: u8, addr: Ipv4Addr) -> Self {
        self.hops.insert(ttl, HopBehavior::Responds(addr));
        self
    }

    /// Router at `ttl` never answers
    pub fn silent(mut self, ttl: u8) -> Self {
        self.hops.insert(ttl, HopBehavior::Silent);
        self
    }

    /// Per-attempt script for `ttl`
    pub fn scripted(mut self, ttl: u8, attempts: Vec<Option<Ipv4Addr>>) -> Self {
        self.hops.insert(ttl, HopBehavior::Script(attempts));
        self
    }

    /// The destination answers any probe whose TTL is at least `ttl`,
    /// unless that TTL has its own behavior
    pub fn destination_at(mut self, ttl: u8) -> Self {
        self.destination_ttl = Some(ttl);
        self
    }

    /// Simulated round-trip time added per hop of distance
    pub fn rtt_per_hop(mut self, rtt: Duration) -> Self {
        self.rtt_per_hop = rtt;
        self
    }

    /// Protocol the simulated transport reports and answers with
    pub fn protocol(mut self, protocol: ProbeProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Setting the TTL to `ttl` fails with the given OS error code
    pub fn fail_set_ttl_at(mut self, ttl: u8, os_error: i32) -> Self {
        self.set_ttl_failure = Some((ttl, os_error));
        self
    }

    /// Every send at `ttl` fails with the given OS error code
    pub fn fail_send_at(mut self, ttl: u8, os_error: i32) -> Self {
        self.send_failure = Some((ttl, os_error));
        self
    }

    /// Every receive at `ttl` fails with the given OS error code
    pub fn fail_recv_at(mut self, ttl: u8, os_error: i32) -> Self {
        self.recv_failure = Some((ttl, os_error));
        self
    }

    /// Create a transport driving this network
    pub fn transport(&self) -> SimulatedTransport {
        SimulatedTransport {
            network: self.clone(),
            ttl: 0,
            pending: None,
        }
    }

    /// Create a boxed transport driving this network
    pub fn boxed_transport(&self) -> Box<dyn ProbeTransport> {
        Box::new(self.transport())
    }

    /// All probes sent so far, in order
    pub fn probes(&self) -> Vec<SentProbe> {
        self.log.lock().expect("mutex poisoned").clone()
    }

    /// Number of probes sent so far
    pub fn sent_count(&self) -> usize {
        self.log.lock().expect("mutex poisoned").len()
    }

    /// Distinct TTLs probed, in probing order
    pub fn probed_ttls(&self) -> Vec<u8> {
        let mut ttls: Vec<u8> = self.probes().iter().map(|p| p.ttl).collect();
        ttls.dedup();
        ttls
    }

    /// Address answering attempt `attempt` at `ttl`, if any
    pub fn responder(&self, ttl: u8, attempt: u8) -> Option<Ipv4Addr> {
        let behavior = match self.hops.get(&ttl) {
            Some(behavior) => behavior.clone(),
            None => match self.destination_ttl {
                Some(dest_ttl) if ttl >= dest_ttl => HopBehavior::Responds(self.destination),
                _ => HopBehavior::Silent,
            },
        };
        match behavior {
            HopBehavior::Silent => None,
            HopBehavior::Responds(addr) => Some(addr),
            HopBehavior::Script(script) => script.get(usize::from(attempt)).copied().flatten(),
        }
    }

    fn response_type(&self, from: Ipv4Addr) -> ResponseType {
        if from != self.destination {
            ResponseType::TimeExceeded
        } else {
            match self.protocol {
                ProbeProtocol::Udp => ResponseType::DestinationUnreachable(3),
                ProbeProtocol::Icmp => ResponseType::EchoReply,
            }
        }
    }
}

/// Transport bound to a [`SimulatedNetwork`]
pub struct SimulatedTransport {
    network: SimulatedNetwork,
    ttl: u8,
    pending: Option<ProbeResponse>,
}

impl SimulatedTransport {
    fn injected_error(failure: Option<(u8, i32)>, ttl: u8) -> Option<io::Error> {
        match failure {
            Some((at, code)) if at == ttl => Some(io::Error::from_raw_os_error(code)),
            _ => None,
        }
    }
}

impl ProbeTransport for SimulatedTransport {
    fn mode(&self) -> ProbeMode {
        ProbeMode {
            protocol: self.network.protocol,
            socket_mode: SocketMode::Raw,
        }
    }

    fn set_ttl(&mut self, ttl: u8) -> Result<()> {
        if let Some(err) = Self::injected_error(self.network.set_ttl_failure, ttl) {
            return Err(err).context("Failed to set TTL");
        }
        self.ttl = ttl;
        Ok(())
    }

    fn send_probe(&mut self, _destination: Ipv4Addr, probe: &ProbeInfo) -> Result<()> {
        self.pending = None;
        if let Some(err) = Self::injected_error(self.network.send_failure, self.ttl) {
            return Err(err).context("Failed to send simulated probe");
        }

        self.network
            .log
            .lock()
            .expect("mutex poisoned")
            .push(SentProbe {
                ttl: self.ttl,
                attempt: probe.attempt,
                sequence: probe.sequence,
            });

        self.pending = self
            .network
            .responder(self.ttl, probe.attempt)
            .map(|from_addr| ProbeResponse {
                from_addr,
                response_type: self.network.response_type(from_addr),
                probe_info: *probe,
                received_at: probe.sent_at + self.network.rtt_per_hop * u32::from(self.ttl),
            });
        Ok(())
    }

    fn recv_response(&mut self, timeout: Duration) -> Result<Option<ProbeResponse>> {
        if let Some(err) = Self::injected_error(self.network.recv_failure, self.ttl) {
            return Err(err).context("Failed to receive simulated response");
        }
        match self.pending.take() {
            Some(response) => Ok(Some(response)),
            None => {
                // A lost probe costs the whole wait, as on a real socket
                std::thread::sleep(timeout);
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn probe(attempt: u8, sequence: u16) -> ProbeInfo {
        ProbeInfo {
            ttl: 0,
            attempt,
            sequence,
            sent_at: Instant::now(),
        }
    }

    #[test]
    fn test_responder_resolution() {
        let dest = Ipv4Addr::new(10, 9, 9, 9);
        let router = Ipv4Addr::new(10, 0, 0, 1);
        let network = SimulatedNetwork::new(dest)
            .hop(1, router)
            .scripted(2, vec![None, Some(router)])
            .destination_at(4);

        assert_eq!(network.responder(1, 0), Some(router));
        assert_eq!(network.responder(2, 0), None);
        assert_eq!(network.responder(2, 1), Some(router));
        assert_eq!(network.responder(2, 2), None);
        assert_eq!(network.responder(3, 0), None);
        assert_eq!(network.responder(4, 0), Some(dest));
        assert_eq!(network.responder(9, 2), Some(dest));
    }

    #[test]
    fn test_transport_logs_and_answers() {
        let dest = Ipv4Addr::new(10, 9, 9, 9);
        let network = SimulatedNetwork::new(dest).destination_at(2);
        let mut transport = network.transport();

        transport.set_ttl(2).unwrap();
        transport.send_probe(dest, &probe(0, 7)).unwrap();
        let response = transport
            .recv_response(Duration::from_millis(1))
            .unwrap()
            .expect("destination should answer");

        assert_eq!(response.from_addr, dest);
        assert_eq!(response.response_type, ResponseType::DestinationUnreachable(3));
        assert_eq!(
            network.probes(),
            vec![SentProbe {
                ttl: 2,
                attempt: 0,
                sequence: 7
            }]
        );
    }

    #[test]
    fn test_lost_probe_times_out() {
        let network = SimulatedNetwork::new(Ipv4Addr::new(10, 9, 9, 9));
        let mut transport = network.transport();

        transport.set_ttl(1).unwrap();
        transport
            .send_probe(network.destination(), &probe(0, 0))
            .unwrap();
        assert!(transport
            .recv_response(Duration::from_millis(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_injected_failures() {
        let network = SimulatedNetwork::new(Ipv4Addr::new(10, 9, 9, 9))
            .fail_set_ttl_at(3, 1)
            .fail_send_at(2, 101);
        let mut transport = network.transport();

        assert!(transport.set_ttl(3).is_err());
        transport.set_ttl(2).unwrap();
        assert!(transport
            .send_probe(network.destination(), &probe(0, 0))
            .is_err());
        assert_eq!(network.sent_count(), 0);
    }
}
