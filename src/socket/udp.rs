//! UDP probe transport
//!
//! Probes leave through an ordinary UDP socket with its TTL set per hop.
//! Routers answer with ICMP, which only a raw ICMP socket can see, so this
//! transport needs root or `CAP_NET_RAW` for its receive half.

use super::reply::{parse_reply, IcmpReply, QuotedProbe};
use super::utils::{is_receive_timeout, recv_from_v4};
use super::{
    ProbeInfo, ProbeMode, ProbeProtocol, ProbeResponse, ProbeTransport, ResponseType, SocketMode,
};
use crate::config::timing::MIN_RECEIVE_SLICE;
use crate::traceroute::ProbeOptions;
use anyhow::{Context, Result};
use socket2::Socket as Socket2;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

/// IPv4 header plus UDP header, subtracted from the packet size for the payload
const UDP_PROBE_HEADER_LEN: usize = 28;

/// Probe currently awaiting an answer
#[derive(Debug, Clone, Copy)]
struct InFlight {
    probe: ProbeInfo,
    destination: Ipv4Addr,
    destination_port: u16,
}

/// UDP socket with a raw ICMP receiver
pub struct UdpProbeTransport {
    udp_socket: UdpSocket,
    icmp_socket: Socket2,
    local_port: u16,
    base_port: u16,
    payload: Vec<u8>,
    recv_buf: Vec<MaybeUninit<u8>>,
    in_flight: Option<InFlight>,
}

impl UdpProbeTransport {
    /// Create a transport from a bound UDP socket and a raw ICMP socket
    pub fn new(udp_socket: Socket2, icmp_socket: Socket2, options: &ProbeOptions) -> Result<Self> {
        let udp_socket: UdpSocket = udp_socket.into();
        let local_port = udp_socket
            .local_addr()
            .context("Failed to read UDP socket address")?
            .port();

        let payload_len = usize::from(options.packet_size()).saturating_sub(UDP_PROBE_HEADER_LEN);

        Ok(Self {
            udp_socket,
            icmp_socket,
            local_port,
            base_port: options.port(),
            payload: vec![0u8; payload_len],
            recv_buf: vec![MaybeUninit::uninit(); options.receive_buffer_size()],
            in_flight: None,
        })
    }

    /// Destination port for the probe with the given sequence number
    fn dest_port(base_port: u16, sequence: u16) -> u16 {
        base_port.wrapping_add(sequence)
    }
}

/// Match a parsed ICMP message against the probe in flight
///
/// Only errors quoting our source port, the probe's destination and its
/// per-sequence destination port count; everything else is someone else's.
fn classify_reply(
    local_port: u16,
    in_flight: Option<InFlight>,
    reply: &IcmpReply,
) -> Option<ResponseType> {
    let in_flight = in_flight?;
    match *reply {
        IcmpReply::Error {
            response_type,
            quoted:
                QuotedProbe::Udp {
                    destination,
                    source_port,
                    destination_port,
                },
        } if destination == in_flight.destination
            && source_port == local_port
            && destination_port == in_flight.destination_port =>
        {
            Some(response_type)
        }
        _ => None,
    }
}

impl ProbeTransport for UdpProbeTransport {
    fn mode(&self) -> ProbeMode {
        ProbeMode {
            protocol: ProbeProtocol::Udp,
            socket_mode: SocketMode::Raw,
        }
    }

    fn set_ttl(&mut self, ttl: u8) -> Result<()> {
        self.udp_socket
            .set_ttl(u32::from(ttl))
            .context("Failed to set TTL")?;
        Ok(())
    }

    fn send_probe(&mut self, destination: Ipv4Addr, probe: &ProbeInfo) -> Result<()> {
        let destination_port = Self::dest_port(self.base_port, probe.sequence);
        let target_addr = SocketAddr::new(destination.into(), destination_port);

        // Forget the previous probe first so a failed send never leaves a
        // stale match behind
        self.in_flight = None;
        self.udp_socket
            .send_to(&self.payload, target_addr)
            .context("Failed to send UDP packet")?;

        self.in_flight = Some(InFlight {
            probe: *probe,
            destination,
            destination_port,
        });
        Ok(())
    }

    fn recv_response(&mut self, timeout: Duration) -> Result<Option<ProbeResponse>> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.icmp_socket
                .set_read_timeout(Some(remaining.max(MIN_RECEIVE_SLICE)))
                .context("Failed to set receive timeout")?;

            let (reply, from_addr) = match recv_from_v4(&self.icmp_socket, &mut self.recv_buf) {
                Ok((packet, from_addr)) => (parse_reply(packet), from_addr),
                Err(e) if is_receive_timeout(&e) => continue,
                Err(e) => return Err(e).context("Failed to receive ICMP packet"),
            };
            let received_at = Instant::now();

            let (Some(reply), Some(from_addr)) = (reply, from_addr) else {
                continue;
            };
            let Some(response_type) = classify_reply(self.local_port, self.in_flight, &reply)
            else {
                continue;
            };
            let Some(in_flight) = self.in_flight.take() else {
                continue;
            };

            return Ok(Some(ProbeResponse {
                from_addr,
                response_type,
                probe_info: in_flight.probe,
                received_at,
            }));
        }
    }
}
