//! Parsing of ICMP messages captured in answer to a probe

use super::ResponseType;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::{IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use std::net::Ipv4Addr;

/// ICMP error header length in bytes (type, code, checksum, unused)
const ICMP_ERROR_HEADER_LEN_BYTES: usize = 8;
/// IPv4 header minimum length in bytes
const IPV4_HEADER_MIN_LEN_BYTES: usize = 20;
/// Leading bytes of a transport header that ICMP errors are guaranteed to quote
const QUOTED_TRANSPORT_LEN_BYTES: usize = 8;

/// The probe quoted inside an ICMP error message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotedProbe {
    /// A UDP probe
    Udp {
        /// Destination of the original datagram
        destination: Ipv4Addr,
        /// Local port the probe left from
        source_port: u16,
        /// Port the probe was addressed to
        destination_port: u16,
    },
    /// An ICMP echo probe
    Echo {
        /// Destination of the original echo request
        destination: Ipv4Addr,
        /// Echo identifier
        identifier: u16,
        /// Echo sequence number
        sequence: u16,
    },
}

/// A parsed ICMP message relevant to traceroute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpReply {
    /// Time Exceeded or Destination Unreachable quoting one of our probes
    Error {
        /// TimeExceeded or DestinationUnreachable
        response_type: ResponseType,
        /// The original probe, as quoted by the router
        quoted: QuotedProbe,
    },
    /// Echo Reply from the destination
    EchoReply {
        /// Echo identifier
        identifier: u16,
        /// Echo sequence number
        sequence: u16,
    },
}

/// Strip the outer IPv4 header when present
///
/// Raw sockets deliver the IP header; Linux ICMP datagram sockets do not.
/// The first nibble tells them apart since no ICMP type we care about has a
/// value of 0x40 or more.
fn icmp_payload(packet: &[u8]) -> Option<&[u8]> {
    if packet.first().map(|b| b >> 4) == Some(4) {
        let outer = Ipv4Packet::new(packet)?;
        let header_len = usize::from(outer.get_header_length()) * 4;
        if header_len < IPV4_HEADER_MIN_LEN_BYTES || packet.len() < header_len {
            return None;
        }
        Some(&packet[header_len..])
    } else {
        Some(packet)
    }
}

/// Parse the original datagram quoted in an ICMP error body
fn parse_quoted(quoted: &[u8]) -> Option<QuotedProbe> {
    let inner = Ipv4Packet::new(quoted)?;
    let header_len = usize::from(inner.get_header_length()) * 4;
    if header_len < IPV4_HEADER_MIN_LEN_BYTES
        || quoted.len() < header_len + QUOTED_TRANSPORT_LEN_BYTES
    {
        return None;
    }
    let destination = inner.get_destination();
    let transport = &quoted[header_len..];

    match inner.get_next_level_protocol() {
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(transport)?;
            Some(QuotedProbe::Udp {
                destination,
                source_port: udp.get_source(),
                destination_port: udp.get_destination(),
            })
        }
        IpNextHeaderProtocols::Icmp if transport[0] == IcmpTypes::EchoRequest.0 => {
            Some(QuotedProbe::Echo {
                destination,
                identifier: u16::from_be_bytes([transport[4], transport[5]]),
                sequence: u16::from_be_bytes([transport[6], transport[7]]),
            })
        }
        _ => None,
    }
}

/// Parse a captured packet into an [`IcmpReply`]
///
/// Returns `None` for anything that cannot be an answer to a probe.
pub fn parse_reply(packet: &[u8]) -> Option<IcmpReply> {
    let icmp_data = icmp_payload(packet)?;
    let icmp_packet = IcmpPacket::new(icmp_data)?;

    match icmp_packet.get_icmp_type() {
        IcmpTypes::TimeExceeded | IcmpTypes::DestinationUnreachable => {
            if icmp_data.len() < ICMP_ERROR_HEADER_LEN_BYTES + IPV4_HEADER_MIN_LEN_BYTES {
                return None;
            }
            let quoted = parse_quoted(&icmp_data[ICMP_ERROR_HEADER_LEN_BYTES..])?;
            let response_type = if icmp_packet.get_icmp_type() == IcmpTypes::TimeExceeded {
                ResponseType::TimeExceeded
            } else {
                ResponseType::DestinationUnreachable(icmp_packet.get_icmp_code().0)
            };
            Some(IcmpReply::Error {
                response_type,
                quoted,
            })
        }
        IcmpTypes::EchoReply => {
            let echo = EchoReplyPacket::new(icmp_data)?;
            Some(IcmpReply::EchoReply {
                identifier: echo.get_identifier(),
                sequence: echo.get_sequence_number(),
            })
        }
        _ => None,
    }
}
