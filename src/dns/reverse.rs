//! Reverse DNS lookup functionality

use crate::config::timing;
use hickory_resolver::TokioResolver;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Error type for reverse DNS operations
#[derive(Debug, thiserror::Error)]
pub enum ReverseDnsError {
    /// DNS resolution failed
    #[error("DNS resolution failed: {0}")]
    ResolutionError(String),

    /// No PTR record found
    #[error("No PTR record found")]
    NotFound,

    /// The lookup did not finish in time
    #[error("Reverse lookup timed out")]
    Timeout,
}

/// Best-effort hostname lookup for hop addresses
///
/// Called from the probing thread. Implementations must return `None` rather
/// than fail, and must not take much longer than
/// [`timing::reverse_dns_timeout`]. A lookup in flight when `cancel` fires
/// gives up and returns `None`.
pub trait ReverseLookup: Send + Sync {
    /// Hostname for `addr`, if one can be found
    fn lookup(&self, addr: Ipv4Addr, cancel: &CancellationToken) -> Option<String>;
}

/// Perform reverse DNS lookup for an IP address
pub async fn reverse_dns_lookup(
    ip: IpAddr,
    resolver: &TokioResolver,
) -> Result<String, ReverseDnsError> {
    let lookup = tokio::time::timeout(timing::reverse_dns_timeout(), resolver.reverse_lookup(ip))
        .await
        .map_err(|_| ReverseDnsError::Timeout)?
        .map_err(|e| ReverseDnsError::ResolutionError(e.to_string()))?;

    lookup
        .iter()
        .next()
        .map(|name| trim_root(&name.to_string()))
        .ok_or(ReverseDnsError::NotFound)
}

/// Strip the trailing root dot from a fully qualified name
fn trim_root(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_string()
}

/// PTR lookups over DNS, driven from a blocking thread
///
/// Each instance caches its answers, negative ones included, so an address
/// seen at several hops or in repeated runs costs one query.
pub struct DnsReverseLookup {
    resolver: Arc<TokioResolver>,
    handle: Handle,
    cache: Mutex<HashMap<Ipv4Addr, Option<String>>>,
}

impl DnsReverseLookup {
    /// Create a lookup service whose queries run on `handle`
    ///
    /// [`ReverseLookup::lookup`] blocks on the runtime, so it must be called
    /// from outside any async context (for example `spawn_blocking`).
    pub fn new(resolver: Arc<TokioResolver>, handle: Handle) -> Self {
        Self {
            resolver,
            handle,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached answers
    pub fn cached_entries(&self) -> usize {
        self.cache.lock().expect("mutex poisoned").len()
    }
}

impl std::fmt::Debug for DnsReverseLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsReverseLookup")
            .field("cached_entries", &self.cached_entries())
            .finish_non_exhaustive()
    }
}

impl ReverseLookup for DnsReverseLookup {
    fn lookup(&self, addr: Ipv4Addr, cancel: &CancellationToken) -> Option<String> {
        if let Some(cached) = self.cache.lock().expect("mutex poisoned").get(&addr) {
            return cached.clone();
        }

        let answer = self.handle.block_on(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                answer = reverse_dns_lookup(IpAddr::V4(addr), &self.resolver) => Some(answer),
            }
        });

        // Abandoned queries are not cached
        let hostname = match answer? {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "Reverse lookup failed");
                None
            }
        };

        self.cache
            .lock()
            .expect("mutex poisoned")
            .insert(addr, hostname.clone());
        hostname
    }
}

/// Reverse lookup answering from a fixed table
#[derive(Debug, Clone, Default)]
pub struct StaticReverseLookup {
    names: HashMap<Ipv4Addr, String>,
}

impl StaticReverseLookup {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `addr` to `name`
    pub fn with_name(mut self, addr: Ipv4Addr, name: impl Into<String>) -> Self {
        self.names.insert(addr, name.into());
        self
    }
}

impl ReverseLookup for StaticReverseLookup {
    fn lookup(&self, addr: Ipv4Addr, _cancel: &CancellationToken) -> Option<String> {
        self.names.get(&addr).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::create_default_resolver;

    #[test]
    fn test_trim_root() {
        assert_eq!(trim_root("one.one.one.one."), "one.one.one.one");
        assert_eq!(trim_root("localhost"), "localhost");
    }

    #[test]
    fn test_static_reverse_lookup() {
        let names = StaticReverseLookup::new().with_name(Ipv4Addr::new(10, 0, 0, 1), "gw.lan");
        let cancel = CancellationToken::new();
        assert_eq!(
            names.lookup(Ipv4Addr::new(10, 0, 0, 1), &cancel).as_deref(),
            Some("gw.lan")
        );
        assert_eq!(names.lookup(Ipv4Addr::new(10, 0, 0, 2), &cancel), None);
    }

    #[tokio::test]
    async fn test_reverse_dns_private_ip() {
        // Private IPs typically don't have PTR records on public DNS
        let resolver = create_default_resolver();
        let ip = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1));
        match reverse_dns_lookup(ip, &resolver).await {
            Ok(name) => assert!(!name.ends_with('.')),
            Err(e) => assert!(matches!(
                e,
                ReverseDnsError::ResolutionError(_)
                    | ReverseDnsError::NotFound
                    | ReverseDnsError::Timeout
            )),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_lookup_caches_answers() {
        let lookup = Arc::new(DnsReverseLookup::new(
            Arc::new(create_default_resolver()),
            Handle::current(),
        ));

        let worker = Arc::clone(&lookup);
        let addr = Ipv4Addr::new(192, 0, 2, 1);
        let first = tokio::task::spawn_blocking(move || worker.lookup(addr, &CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(lookup.cached_entries(), 1);

        let worker = Arc::clone(&lookup);
        let second = tokio::task::spawn_blocking(move || worker.lookup(addr, &CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(lookup.cached_entries(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancelled_lookup_returns_promptly_without_caching() {
        let lookup = Arc::new(DnsReverseLookup::new(
            Arc::new(create_default_resolver()),
            Handle::current(),
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let worker = Arc::clone(&lookup);
        let started = std::time::Instant::now();
        let hostname = tokio::task::spawn_blocking(move || {
            worker.lookup(Ipv4Addr::new(192, 0, 2, 7), &cancel)
        })
        .await
        .unwrap();

        assert_eq!(hostname, None);
        assert!(started.elapsed() < timing::reverse_dns_timeout());
        assert_eq!(lookup.cached_entries(), 0);
    }
}
