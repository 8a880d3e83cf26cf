//! Error types for traceroute operations

use crate::traceroute::TracerouteResult;
use thiserror::Error;

/// Errors that can occur during traceroute operations
#[derive(Debug, Error)]
pub enum TracerouteError {
    /// DNS resolution failed
    ///
    /// The target hostname could not be resolved to an IP address. No probe
    /// has been sent when this is returned.
    #[error("Failed to resolve host: {0}")]
    ResolutionError(String),

    /// No interface with a usable IPv4 address is up
    #[error("No network interface with an IPv4 address is available")]
    NoInternet,

    /// Socket creation failed due to insufficient permissions
    ///
    /// This error provides structured information about what permissions
    /// are needed and how to obtain them.
    #[error("Insufficient permissions: {required}")]
    InsufficientPermissions {
        /// Description of required permissions (e.g., "root or CAP_NET_RAW")
        required: String,
        /// Suggested remedy
        suggestion: String,
    },

    /// Socket creation failed for other reasons
    #[error("Failed to create socket: {0}")]
    SocketError(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// IPv6 targets are not supported
    #[error("IPv6 targets are not supported")]
    Ipv6NotSupported,

    /// Feature not implemented on this platform
    #[error("{feature} is not implemented")]
    NotImplemented {
        /// Description of the unimplemented feature
        feature: String,
    },

    /// The run stopped on an unrecoverable socket error
    #[error("Traceroute aborted at TTL {ttl}: {reason}")]
    Aborted {
        /// TTL being probed when the error occurred
        ttl: u8,
        /// Description of the underlying error
        reason: String,
        /// Hops completed before the failure
        partial: Box<TracerouteResult>,
    },

    /// The run was cancelled by the caller
    #[error("Traceroute cancelled")]
    Cancelled {
        /// Hops completed before cancellation
        partial: Box<TracerouteResult>,
    },

    /// General traceroute operation error
    #[error("{0}")]
    Other(String),
}

impl TracerouteError {
    /// Partial result carried by the error, if any
    pub fn partial_result(&self) -> Option<&TracerouteResult> {
        match self {
            TracerouteError::Aborted { partial, .. } | TracerouteError::Cancelled { partial } => {
                Some(partial)
            }
            _ => None,
        }
    }

    /// Take the partial result out of the error
    pub fn into_partial_result(self) -> Option<TracerouteResult> {
        match self {
            TracerouteError::Aborted { partial, .. } | TracerouteError::Cancelled { partial } => {
                Some(*partial)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::ProbeProtocol;
    use crate::traceroute::Termination;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn partial() -> TracerouteResult {
        TracerouteResult {
            target: "example.com".to_string(),
            destination: Ipv4Addr::new(93, 184, 216, 34),
            source: None,
            hops: Vec::new(),
            termination: Termination::Aborted,
            protocol: ProbeProtocol::Udp,
            total_duration: Duration::ZERO,
        }
    }

    #[test]
    fn test_error_messages() {
        let err = TracerouteError::ResolutionError("no such host".to_string());
        assert_eq!(err.to_string(), "Failed to resolve host: no such host");

        let err = TracerouteError::InsufficientPermissions {
            required: "root".to_string(),
            suggestion: "Run with sudo".to_string(),
        };
        assert_eq!(err.to_string(), "Insufficient permissions: root");

        let err = TracerouteError::Aborted {
            ttl: 3,
            reason: "Operation not permitted".to_string(),
            partial: Box::new(partial()),
        };
        assert_eq!(
            err.to_string(),
            "Traceroute aborted at TTL 3: Operation not permitted"
        );
    }

    #[test]
    fn test_partial_result_access() {
        let err = TracerouteError::Cancelled {
            partial: Box::new(partial()),
        };
        assert_eq!(
            err.partial_result().map(|r| r.target.as_str()),
            Some("example.com")
        );
        assert!(err.into_partial_result().is_some());

        assert!(TracerouteError::NoInternet.partial_result().is_none());
        assert!(TracerouteError::Ipv6NotSupported
            .into_partial_result()
            .is_none());
    }
}
