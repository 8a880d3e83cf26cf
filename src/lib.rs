//! hoptrace - a TTL-stepping IPv4 traceroute
//!
//! This library walks the path to an IPv4 destination one TTL at a time,
//! retrying each hop, and streams every hop to the caller as soon as it is
//! final.
//!
//! # Examples
//!
//! ```no_run
//! use hoptrace::{hop_channel, traceroute, ProbeOptions, TraceEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (sink, mut stream) = hop_channel();
//!     let run = tokio::spawn(traceroute("example.com", ProbeOptions::default(), Some(sink)));
//!
//!     while let Some(event) = stream.next_event().await {
//!         if let TraceEvent::Hop(hop) = event {
//!             println!("{:>2}  {}", hop.ttl, hop.host_or_address());
//!         }
//!     }
//!
//!     let result = run.await??;
//!     println!("Reached destination: {}", result.destination_reached());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dns;
pub mod socket;
pub mod traceroute;

// Re-export core types for library users
pub use config::TimingConfig;
pub use dns::{AddressResolver, ReverseLookup, StaticResolver, SystemResolver};
pub use socket::factory::create_transport;
pub use socket::{ProbeMode, ProbeProtocol, ProbeTransport, SocketMode};
pub use traceroute::{
    hop_channel, trace, traceroute, HopObserver, HopRecord, HopSink, HopStream, ProbeAttempt,
    ProbeOptions, ProbeOptionsBuilder, Prober, Termination, TraceEvent, Traceroute,
    TracerouteError, TracerouteResult,
};
