//! Factory for creating probe transports with automatic fallback

use super::{ProbeProtocol, ProbeTransport, SocketMode};
use crate::traceroute::{ProbeOptions, TracerouteError};

/// Create the transport described by `options`
///
/// UDP probing needs a raw ICMP socket for its receive half. ICMP probing
/// tries a raw socket first and falls back to a datagram socket unless a mode
/// was requested explicitly. Sockets opened before a failure are dropped, and
/// with them closed, before the error is returned.
pub fn create_transport(options: &ProbeOptions) -> Result<Box<dyn ProbeTransport>, TracerouteError> {
    #[cfg(unix)]
    {
        match options.protocol() {
            ProbeProtocol::Udp => unix::create_udp_transport(options),
            ProbeProtocol::Icmp => unix::create_icmp_transport(options),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = options;
        Err(TracerouteError::NotImplemented {
            feature: format!("Raw socket probing on {}", std::env::consts::OS),
        })
    }
}

/// Socket modes to try for a protocol, most capable first
pub fn candidate_modes(protocol: ProbeProtocol, preferred: Option<SocketMode>) -> Vec<SocketMode> {
    match (protocol, preferred) {
        (ProbeProtocol::Udp, _) => vec![SocketMode::Raw],
        (ProbeProtocol::Icmp, Some(mode)) => vec![mode],
        (ProbeProtocol::Icmp, None) => vec![SocketMode::Raw, SocketMode::Dgram],
    }
}

fn permission_error(mode: SocketMode, protocol: ProbeProtocol) -> TracerouteError {
    let suggestion = match (protocol, mode) {
        (ProbeProtocol::Icmp, SocketMode::Dgram) => {
            "Run with sudo, or allow ping sockets: sudo sysctl -w net.ipv4.ping_group_range=\"0 65535\""
        }
        _ => "Run with sudo, or grant the binary CAP_NET_RAW",
    };
    TracerouteError::InsufficientPermissions {
        required: format!(
            "root or CAP_NET_RAW for {} {} sockets",
            mode.description(),
            protocol.description()
        ),
        suggestion: suggestion.to_string(),
    }
}

#[cfg(unix)]
mod unix {
    use super::{candidate_modes, permission_error};
    use crate::socket::icmp_v4::IcmpEchoTransport;
    use crate::socket::udp::UdpProbeTransport;
    use crate::socket::utils::is_permission_error;
    use crate::socket::{ProbeProtocol, ProbeTransport, SocketMode};
    use crate::traceroute::{ProbeOptions, TracerouteError};
    use socket2::{Domain, Protocol, Socket, Type};
    use std::net::{Ipv4Addr, SocketAddrV4};

    /// Try to create an IPv4 socket of the given kind
    fn try_create_socket(socket_type: Type, protocol: Protocol) -> Result<Socket, std::io::Error> {
        Socket::new(Domain::IPV4, socket_type, Some(protocol))
    }

    fn bind_unspecified(socket: &Socket, what: &str) -> Result<(), TracerouteError> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
        socket
            .bind(&bind_addr.into())
            .map_err(|e| TracerouteError::SocketError(format!("Failed to bind {what} socket: {e}")))
    }

    pub(super) fn create_udp_transport(
        options: &ProbeOptions,
    ) -> Result<Box<dyn ProbeTransport>, TracerouteError> {
        let udp_socket = try_create_socket(Type::DGRAM, Protocol::UDP)
            .map_err(|e| TracerouteError::SocketError(format!("Failed to create UDP socket: {e}")))?;
        bind_unspecified(&udp_socket, "UDP")?;

        let icmp_socket = match try_create_socket(Type::RAW, Protocol::ICMPV4) {
            Ok(socket) => socket,
            Err(e) if is_permission_error(&e) => {
                return Err(permission_error(SocketMode::Raw, ProbeProtocol::Udp));
            }
            Err(e) => {
                return Err(TracerouteError::SocketError(format!(
                    "Failed to create raw ICMP socket: {e}"
                )));
            }
        };

        let transport = UdpProbeTransport::new(udp_socket, icmp_socket, options)
            .map_err(|e| TracerouteError::SocketError(format!("{e:#}")))?;
        tracing::debug!(port = options.port(), "Using Raw UDP IPv4 mode for traceroute");
        Ok(Box::new(transport))
    }

    pub(super) fn create_icmp_transport(
        options: &ProbeOptions,
    ) -> Result<Box<dyn ProbeTransport>, TracerouteError> {
        let modes = candidate_modes(ProbeProtocol::Icmp, options.socket_mode());
        let user_specified_mode = options.socket_mode().is_some();
        let mut last_error = None;

        for socket_mode in modes {
            let socket_type = match socket_mode {
                SocketMode::Raw => Type::RAW,
                SocketMode::Dgram => Type::DGRAM,
            };

            match try_create_socket(socket_type, Protocol::ICMPV4) {
                Ok(socket) => {
                    if socket_mode == SocketMode::Dgram {
                        bind_unspecified(&socket, "ICMP")?;
                    }
                    let transport = IcmpEchoTransport::new(socket, socket_mode, options)
                        .map_err(|e| TracerouteError::SocketError(format!("{e:#}")))?;
                    tracing::debug!(
                        "Using {} mode for traceroute",
                        transport_description(socket_mode)
                    );
                    return Ok(Box::new(transport));
                }
                Err(io_err) if is_permission_error(&io_err) => {
                    if !user_specified_mode && socket_mode == SocketMode::Raw {
                        tracing::debug!("Raw ICMP mode requires root privileges, trying fallback...");
                    }
                    last_error = Some(permission_error(socket_mode, ProbeProtocol::Icmp));
                }
                Err(io_err) => {
                    tracing::debug!(
                        "Failed to create {}: {}",
                        transport_description(socket_mode),
                        io_err
                    );
                    last_error = Some(TracerouteError::SocketError(format!(
                        "Failed to create {} socket: {io_err}",
                        transport_description(socket_mode)
                    )));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            TracerouteError::SocketError("No ICMP socket mode available".to_string())
        }))
    }

    fn transport_description(socket_mode: SocketMode) -> String {
        format!("{} ICMP IPv4", socket_mode.description())
    }
}
