//! IPv4 ICMP echo transport

use super::reply::{parse_reply, IcmpReply, QuotedProbe};
use super::utils::{is_receive_timeout, recv_from_v4};
use super::{
    ProbeInfo, ProbeMode, ProbeProtocol, ProbeResponse, ProbeTransport, ResponseType, SocketMode,
};
use crate::config::timing::MIN_RECEIVE_SLICE;
use crate::traceroute::ProbeOptions;
use anyhow::{anyhow, Context, Result};
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{IcmpCode, IcmpTypes};
use pnet::packet::Packet;
use pnet::util::checksum as pnet_checksum;
use socket2::Socket as Socket2;
use std::mem::MaybeUninit;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

/// IPv4 header plus ICMP echo header, subtracted from the packet size for the payload
const ICMP_PROBE_HEADER_LEN: usize = 28;

/// ICMP echo transport over a raw or datagram socket
pub struct IcmpEchoTransport {
    socket: Socket2,
    mode: ProbeMode,
    icmp_identifier: u16,
    payload_len: usize,
    recv_buf: Vec<MaybeUninit<u8>>,
    in_flight: Option<(ProbeInfo, Ipv4Addr)>,
}

impl IcmpEchoTransport {
    /// Create a new ICMP echo transport
    ///
    /// The identifier is random so that concurrent runs in one process never
    /// claim each other's replies.
    pub fn new(socket: Socket2, socket_mode: SocketMode, options: &ProbeOptions) -> Result<Self> {
        Ok(Self {
            socket,
            mode: ProbeMode {
                protocol: ProbeProtocol::Icmp,
                socket_mode,
            },
            icmp_identifier: rand::random::<u16>(),
            payload_len: usize::from(options.packet_size()).saturating_sub(ICMP_PROBE_HEADER_LEN),
            recv_buf: vec![MaybeUninit::uninit(); options.receive_buffer_size()],
            in_flight: None,
        })
    }

    /// Build an echo request for the given sequence number
    fn build_echo_request(&self, sequence: u16) -> Result<Vec<u8>> {
        let mut icmp_buf = vec![0u8; MutableEchoRequestPacket::minimum_packet_size() + self.payload_len];
        let mut echo_req_packet = MutableEchoRequestPacket::new(&mut icmp_buf)
            .ok_or_else(|| anyhow!("Failed to create ICMP packet"))?;

        echo_req_packet.set_icmp_type(IcmpTypes::EchoRequest);
        echo_req_packet.set_icmp_code(IcmpCode(0));
        echo_req_packet.set_identifier(self.icmp_identifier);
        echo_req_packet.set_sequence_number(sequence);

        let checksum = pnet_checksum(echo_req_packet.packet(), 1);
        echo_req_packet.set_checksum(checksum);

        Ok(icmp_buf)
    }
}

/// Datagram sockets on Linux rewrite the echo identifier, so only the
/// sequence number can be trusted there
fn identifier_matches(socket_mode: SocketMode, expected: u16, identifier: u16) -> bool {
    socket_mode == SocketMode::Dgram || identifier == expected
}

/// Match a parsed reply against the probe in flight
fn classify_reply(
    socket_mode: SocketMode,
    icmp_identifier: u16,
    in_flight: Option<(ProbeInfo, Ipv4Addr)>,
    reply: &IcmpReply,
    from_addr: Ipv4Addr,
) -> Option<ResponseType> {
    let (probe, destination) = in_flight?;
    match *reply {
        IcmpReply::EchoReply {
            identifier,
            sequence,
        } if sequence == probe.sequence
            && from_addr == destination
            && identifier_matches(socket_mode, icmp_identifier, identifier) =>
        {
            Some(ResponseType::EchoReply)
        }
        IcmpReply::Error {
            response_type,
            quoted:
                QuotedProbe::Echo {
                    destination: quoted_destination,
                    identifier,
                    sequence,
                },
        } if sequence == probe.sequence
            && quoted_destination == destination
            && identifier_matches(socket_mode, icmp_identifier, identifier) =>
        {
            Some(response_type)
        }
        _ => None,
    }
}

impl ProbeTransport for IcmpEchoTransport {
    fn mode(&self) -> ProbeMode {
        self.mode
    }

    fn set_ttl(&mut self, ttl: u8) -> Result<()> {
        self.socket
            .set_ttl_v4(u32::from(ttl))
            .context("Failed to set TTL")?;
        Ok(())
    }

    fn send_probe(&mut self, destination: Ipv4Addr, probe: &ProbeInfo) -> Result<()> {
        let packet = self.build_echo_request(probe.sequence)?;
        let target_addr = SocketAddr::V4(SocketAddrV4::new(destination, 0));

        self.in_flight = None;
        self.socket
            .send_to(&packet, &target_addr.into())
            .context("Failed to send ICMP packet")?;

        self.in_flight = Some((*probe, destination));
        Ok(())
    }

    fn recv_response(&mut self, timeout: Duration) -> Result<Option<ProbeResponse>> {
        let deadline = Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.socket
                .set_read_timeout(Some(remaining.max(MIN_RECEIVE_SLICE)))
                .context("Failed to set receive timeout")?;

            let (reply, from_addr) = match recv_from_v4(&self.socket, &mut self.recv_buf) {
                Ok((packet, from_addr)) => (parse_reply(packet), from_addr),
                Err(e) if is_receive_timeout(&e) => continue,
                Err(e) => return Err(e).context("Failed to receive ICMP packet"),
            };
            let received_at = Instant::now();

            let (Some(reply), Some(from_addr)) = (reply, from_addr) else {
                continue;
            };
            let Some(response_type) = classify_reply(
                self.mode.socket_mode,
                self.icmp_identifier,
                self.in_flight,
                &reply,
                from_addr,
            ) else {
                continue;
            };
            let Some((probe_info, _)) = self.in_flight.take() else {
                continue;
            };

            return Ok(Some(ProbeResponse {
                from_addr,
                response_type,
                probe_info,
                received_at,
            }));
        }
    }
}
