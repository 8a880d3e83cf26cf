//! High-level traceroute API

use crate::dns::{create_default_resolver, AddressResolver, DnsReverseLookup, ReverseLookup, SystemResolver};
use crate::socket::factory::create_transport;
use crate::socket::ProbeTransport;
use crate::traceroute::engine::Prober;
use crate::traceroute::recorder::{HopObserver, HopSink};
use crate::traceroute::{ProbeOptions, Termination, TracerouteError, TracerouteResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// High-level traceroute API for performing network path discovery
///
/// Everything a run needs has a default: DNS resolution through the system
/// resolver, a raw-socket transport chosen from the options, and reverse DNS
/// when `resolve_hostnames` is set. Each can be replaced for testing.
///
/// # Examples
///
/// ```no_run
/// use hoptrace::{hop_channel, ProbeOptions, Traceroute};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let options = ProbeOptions::builder().max_hops(20).build()?;
/// let (sink, mut stream) = hop_channel();
///
/// let run = tokio::spawn(Traceroute::new("example.com", options).with_sink(sink).run());
/// while let Some(event) = stream.next_event().await {
///     println!("{event:?}");
/// }
/// let result = run.await??;
/// println!("{} hops", result.hop_count());
/// # Ok(())
/// # }
/// ```
pub struct Traceroute {
    host: String,
    options: ProbeOptions,
    resolver: Option<Arc<dyn AddressResolver>>,
    transport: Option<Box<dyn ProbeTransport>>,
    reverse_lookup: Option<Arc<dyn ReverseLookup>>,
    observer: Option<Box<dyn HopObserver>>,
    cancel: CancellationToken,
}

impl Traceroute {
    /// Create a traceroute towards `host`
    pub fn new(host: impl Into<String>, options: ProbeOptions) -> Self {
        Self {
            host: host.into(),
            options,
            resolver: None,
            transport: None,
            reverse_lookup: None,
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Resolve the target and egress address with `resolver`
    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Probe through `transport` instead of opening sockets
    pub fn with_transport(mut self, transport: Box<dyn ProbeTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Resolve hop hostnames with `lookup` (only when `resolve_hostnames` is set)
    pub fn with_reverse_lookup(mut self, lookup: Arc<dyn ReverseLookup>) -> Self {
        self.reverse_lookup = Some(lookup);
        self
    }

    /// Stream progress into a hop channel
    pub fn with_sink(self, sink: HopSink) -> Self {
        self.with_observer(Box::new(sink))
    }

    /// Stream progress to a custom observer
    pub fn with_observer(mut self, observer: Box<dyn HopObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Stop the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this run
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the traceroute and return the result
    ///
    /// The observer, if any, is told the stream has ended on every path,
    /// including failures before the first probe.
    ///
    /// # Errors
    ///
    /// * `ConfigError` - invalid options
    /// * `ResolutionError` / `Ipv6NotSupported` - the target has no IPv4 address
    /// * `InsufficientPermissions` / `SocketError` - sockets could not be opened
    /// * `Aborted` / `Cancelled` - the run stopped early; the partial result is attached
    pub async fn run(mut self) -> Result<TracerouteResult, TracerouteError> {
        let observer = self.observer.take();
        let span = tracing::info_span!("traceroute", host = %self.host);

        async move {
            let prober = match self.prepare().await {
                Ok(prober) => prober,
                Err(e) => {
                    if let Some(mut observer) = observer {
                        observer.on_finish(Termination::Aborted);
                    }
                    tracing::debug!(error = %e, "Traceroute setup failed");
                    return Err(e);
                }
            };
            let prober = match observer {
                Some(observer) => prober.with_observer(observer),
                None => prober,
            };

            tokio::task::spawn_blocking(move || prober.run())
                .await
                .map_err(|e| TracerouteError::Other(format!("Traceroute worker failed: {e}")))?
        }
        .instrument(span)
        .await
    }

    /// Validate, resolve and open everything the prober needs
    async fn prepare(&mut self) -> Result<Prober, TracerouteError> {
        self.options
            .validate()
            .map_err(TracerouteError::ConfigError)?;

        let resolver = self
            .resolver
            .take()
            .unwrap_or_else(|| Arc::new(SystemResolver::new()));
        let destination = resolver.resolve(&self.host).await?;
        let source = if destination.is_loopback() {
            destination
        } else {
            resolver.local_egress_address()?
        };
        tracing::debug!(%destination, %source, "Resolved target");

        let transport = match self.transport.take() {
            Some(transport) => transport,
            None => create_transport(&self.options)?,
        };

        let mut prober = Prober::new(
            self.host.clone(),
            destination,
            self.options.clone(),
            transport,
        )?
        .with_source(source)
        .with_cancellation(self.cancel.clone());

        if self.options.resolve_hostnames() {
            let lookup = self.reverse_lookup.take().unwrap_or_else(|| {
                Arc::new(DnsReverseLookup::new(
                    Arc::new(create_default_resolver()),
                    tokio::runtime::Handle::current(),
                ))
            });
            prober = prober.with_reverse_lookup(lookup);
        }

        Ok(prober)
    }
}

impl std::fmt::Debug for Traceroute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Traceroute")
            .field("host", &self.host)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Trace the path to `host`, streaming hops into `sink` if given
///
/// # Examples
///
/// ```no_run
/// use hoptrace::{traceroute, ProbeOptions};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let result = traceroute("example.com", ProbeOptions::default(), None).await?;
/// for hop in &result.hops {
///     println!("{:>2}  {}", hop.ttl, hop.host_or_address());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn traceroute(
    host: &str,
    options: ProbeOptions,
    sink: Option<HopSink>,
) -> Result<TracerouteResult, TracerouteError> {
    let mut traceroute = Traceroute::new(host, options);
    if let Some(sink) = sink {
        traceroute = traceroute.with_sink(sink);
    }
    traceroute.run().await
}

/// Trace the path to `host` with default options
pub async fn trace(host: &str) -> Result<TracerouteResult, TracerouteError> {
    traceroute(host, ProbeOptions::default(), None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{StaticResolver, StaticReverseLookup};
    use crate::socket::simulated::SimulatedNetwork;
    use crate::traceroute::recorder::{hop_channel, TraceEvent};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const DEST: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 9);
    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

    fn resolver() -> Arc<StaticResolver> {
        Arc::new(
            StaticResolver::new()
                .with_host("target.example", DEST)
                .with_local(LOCAL),
        )
    }

    fn options() -> ProbeOptions {
        ProbeOptions::builder()
            .max_hops(8)
            .retries(2)
            .timeout(Duration::from_millis(5))
            .resolve_hostnames(false)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_with_injected_collaborators() {
        let network = SimulatedNetwork::new(DEST)
            .hop(1, Ipv4Addr::new(192, 168, 1, 1))
            .destination_at(3);

        let result = Traceroute::new("target.example", options())
            .with_resolver(resolver())
            .with_transport(network.boxed_transport())
            .run()
            .await
            .unwrap();

        assert_eq!(result.target, "target.example");
        assert_eq!(result.destination, DEST);
        assert_eq!(result.source, Some(LOCAL));
        assert_eq!(result.hop_count(), 3);
        assert!(result.destination_reached());
    }

    #[tokio::test]
    async fn test_resolution_failure_sends_nothing_and_closes_stream() {
        let network = SimulatedNetwork::new(DEST).destination_at(1);
        let (sink, mut stream) = hop_channel();

        let err = Traceroute::new("nowhere.example", options())
            .with_resolver(resolver())
            .with_transport(network.boxed_transport())
            .with_sink(sink)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, TracerouteError::ResolutionError(_)));
        assert_eq!(network.sent_count(), 0);
        assert_eq!(
            stream.next_event().await,
            Some(TraceEvent::Finished(Termination::Aborted))
        );
        assert_eq!(stream.next_event().await, None);
    }

    #[tokio::test]
    async fn test_invalid_options_fail_before_resolution() {
        let options: ProbeOptions = serde_json::from_str(r#"{"first_hop": 0}"#).unwrap();
        let err = Traceroute::new("nowhere.example", options)
            .with_resolver(resolver())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, TracerouteError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_missing_egress_interface() {
        let network = SimulatedNetwork::new(DEST).destination_at(1);
        let err = Traceroute::new("203.0.113.9", options())
            .with_resolver(Arc::new(StaticResolver::new()))
            .with_transport(network.boxed_transport())
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, TracerouteError::NoInternet));
    }

    #[tokio::test]
    async fn test_reverse_lookup_only_when_enabled() {
        let router = Ipv4Addr::new(192, 168, 1, 1);
        let names = Arc::new(StaticReverseLookup::new().with_name(router, "gw.lan"));
        let network = SimulatedNetwork::new(DEST).hop(1, router).destination_at(2);

        let enabled = ProbeOptions::builder()
            .retries(1)
            .timeout(Duration::from_millis(5))
            .build()
            .unwrap();
        let result = Traceroute::new("target.example", enabled)
            .with_resolver(resolver())
            .with_transport(network.boxed_transport())
            .with_reverse_lookup(names.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(result.hops[0].hostname.as_deref(), Some("gw.lan"));

        let result = Traceroute::new("target.example", options())
            .with_resolver(resolver())
            .with_transport(network.boxed_transport())
            .with_reverse_lookup(names)
            .run()
            .await
            .unwrap();
        assert_eq!(result.hops[0].hostname, None);
    }

    #[tokio::test]
    async fn test_cancellation_token_stops_run() {
        let network = SimulatedNetwork::new(DEST);
        let traceroute = Traceroute::new("target.example", options())
            .with_resolver(resolver())
            .with_transport(network.boxed_transport());
        traceroute.cancellation_token().cancel();

        let err = traceroute.run().await.unwrap_err();
        assert!(matches!(err, TracerouteError::Cancelled { .. }));
        assert_eq!(network.sent_count(), 0);
    }
}
