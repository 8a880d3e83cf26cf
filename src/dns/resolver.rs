//! Target resolution and local egress address discovery

use crate::traceroute::TracerouteError;
use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

/// Turns a target host into the IPv4 destination to probe
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolve `host` to an IPv4 address
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr, TracerouteError>;

    /// Address probes leave this host from
    fn local_egress_address(&self) -> Result<Ipv4Addr, TracerouteError>;
}

/// Create a default DNS resolver
pub fn create_default_resolver() -> TokioResolver {
    TokioResolver::builder_with_config(
        ResolverConfig::cloudflare(),
        TokioConnectionProvider::default(),
    )
    .build()
}

/// Handle targets that need no DNS query
///
/// IPv4 literals and `localhost` resolve directly, IPv6 literals are rejected.
/// Returns `None` when the host is a name that has to be looked up.
fn resolve_literal(host: &str) -> Option<Result<Ipv4Addr, TracerouteError>> {
    let host = host.trim();
    if host.is_empty() {
        return Some(Err(TracerouteError::ResolutionError(
            "empty host name".to_string(),
        )));
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => Some(Ok(addr)),
        Ok(IpAddr::V6(_)) => Some(Err(TracerouteError::Ipv6NotSupported)),
        Err(_) if host.eq_ignore_ascii_case("localhost") => Some(Ok(Ipv4Addr::LOCALHOST)),
        Err(_) => None,
    }
}

/// Resolver backed by DNS and the host's network interfaces
pub struct SystemResolver {
    resolver: TokioResolver,
}

impl SystemResolver {
    /// Create a resolver using the default DNS configuration
    pub fn new() -> Self {
        Self {
            resolver: create_default_resolver(),
        }
    }

    /// Create a resolver using a specific hickory resolver
    pub fn with_resolver(resolver: TokioResolver) -> Self {
        Self { resolver }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SystemResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl AddressResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr, TracerouteError> {
        if let Some(result) = resolve_literal(host) {
            return result;
        }

        match self.resolver.ipv4_lookup(host).await {
            Ok(lookup) => {
                if let Some(ipv4) = lookup.iter().next() {
                    return Ok(ipv4.0);
                }
            }
            Err(e) => tracing::debug!(host, error = %e, "A lookup failed"),
        }

        // Names that only have AAAA records get the more useful error
        if let Ok(lookup) = self.resolver.ipv6_lookup(host).await {
            if lookup.iter().next().is_some() {
                return Err(TracerouteError::Ipv6NotSupported);
            }
        }

        Err(TracerouteError::ResolutionError(format!(
            "no IPv4 address found for {host}"
        )))
    }

    fn local_egress_address(&self) -> Result<Ipv4Addr, TracerouteError> {
        egress_from_interfaces()
    }
}

/// First IPv4 address of an up, non-loopback interface
fn egress_from_interfaces() -> Result<Ipv4Addr, TracerouteError> {
    pnet::datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .flat_map(|iface| iface.ips)
        .find_map(|network| match network.ip() {
            IpAddr::V4(addr) if !addr.is_unspecified() && !addr.is_loopback() => Some(addr),
            _ => None,
        })
        .ok_or(TracerouteError::NoInternet)
}

/// Resolver answering from a fixed table, with no network access
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Ipv4Addr>,
    local: Option<Ipv4Addr>,
}

impl StaticResolver {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `host` to `addr`
    pub fn with_host(mut self, host: impl Into<String>, addr: Ipv4Addr) -> Self {
        self.hosts.insert(host.into().to_ascii_lowercase(), addr);
        self
    }

    /// Report `addr` as the local egress address
    pub fn with_local(mut self, addr: Ipv4Addr) -> Self {
        self.local = Some(addr);
        self
    }
}

#[async_trait]
impl AddressResolver for StaticResolver {
    async fn resolve(&self, host: &str) -> Result<Ipv4Addr, TracerouteError> {
        if let Some(result) = resolve_literal(host) {
            return result;
        }
        self.hosts
            .get(&host.trim().to_ascii_lowercase())
            .copied()
            .ok_or_else(|| TracerouteError::ResolutionError(format!("unknown host {host}")))
    }

    fn local_egress_address(&self) -> Result<Ipv4Addr, TracerouteError> {
        self.local.ok_or(TracerouteError::NoInternet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_resolution() {
        assert_eq!(
            resolve_literal("8.8.8.8").unwrap().unwrap(),
            Ipv4Addr::new(8, 8, 8, 8)
        );
        assert_eq!(
            resolve_literal("LocalHost").unwrap().unwrap(),
            Ipv4Addr::LOCALHOST
        );
        assert!(matches!(
            resolve_literal("::1"),
            Some(Err(TracerouteError::Ipv6NotSupported))
        ));
        assert!(matches!(
            resolve_literal("  "),
            Some(Err(TracerouteError::ResolutionError(_)))
        ));
        assert!(resolve_literal("example.com").is_none());
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new()
            .with_host("Router.Example", Ipv4Addr::new(10, 1, 1, 1))
            .with_local(Ipv4Addr::new(192, 168, 1, 5));

        assert_eq!(
            resolver.resolve("router.example").await.unwrap(),
            Ipv4Addr::new(10, 1, 1, 1)
        );
        assert_eq!(
            resolver.resolve("1.2.3.4").await.unwrap(),
            Ipv4Addr::new(1, 2, 3, 4)
        );
        assert!(matches!(
            resolver.resolve("missing.example").await,
            Err(TracerouteError::ResolutionError(_))
        ));
        assert_eq!(
            resolver.local_egress_address().unwrap(),
            Ipv4Addr::new(192, 168, 1, 5)
        );
        assert!(matches!(
            StaticResolver::new().local_egress_address(),
            Err(TracerouteError::NoInternet)
        ));
    }

    #[tokio::test]
    async fn test_system_resolver_literals_skip_dns() {
        let resolver = SystemResolver::new();
        assert_eq!(
            resolver.resolve("127.0.0.1").await.unwrap(),
            Ipv4Addr::LOCALHOST
        );
        assert!(matches!(
            resolver.resolve("2001:db8::1").await,
            Err(TracerouteError::Ipv6NotSupported)
        ));
    }

    #[tokio::test]
    async fn test_resolve_invalid_host() {
        // Resolution may fail for several reasons offline; it must never succeed
        let resolver = SystemResolver::new();
        let result = resolver
            .resolve("invalid.host.that.does.not.exist.invalid")
            .await;
        assert!(result.is_err());
    }
}
