//! hoptrace - TTL-stepping IPv4 traceroute
//!
//! This is the command-line interface for the hoptrace library.

use anyhow::{Context, Result};
use clap::Parser;
use hoptrace::config::timing::DEFAULT_RECEIVE_POLL_INTERVAL_MS;
use hoptrace::traceroute::config::{
    DEFAULT_FIRST_HOP, DEFAULT_MAX_HOPS, DEFAULT_PACKET_SIZE, DEFAULT_PORT, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT_MS,
};
use hoptrace::{
    hop_channel, AddressResolver, HopRecord, ProbeAttempt, ProbeOptions, ProbeProtocol,
    SocketMode, SystemResolver, TraceEvent, Traceroute, TracerouteError, TracerouteResult,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Get the version string for hoptrace
fn get_version() -> &'static str {
    if cfg!(debug_assertions) {
        concat!(env!("CARGO_PKG_VERSION"), "-UNRELEASED")
    } else {
        env!("CARGO_PKG_VERSION")
    }
}

/// Command-line arguments for the traceroute tool.
#[derive(Parser, Debug)]
#[clap(author, version, about = "TTL-stepping IPv4 traceroute with per-hop retries", long_about = None)]
struct Args {
    /// Target hostname or IPv4 address
    host: String,

    /// First TTL to probe
    #[clap(short = 'f', long, default_value_t = DEFAULT_FIRST_HOP)]
    first_hop: u8,

    /// Maximum number of hops
    #[clap(short = 'm', long, default_value_t = DEFAULT_MAX_HOPS)]
    max_hops: u8,

    /// Timeout for individual probes in milliseconds
    #[clap(short = 'w', long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Number of probes per hop
    #[clap(short = 'q', long, default_value_t = DEFAULT_RETRIES)]
    queries: u8,

    /// Base destination port for UDP probes
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Total probe packet size in bytes, IP header included
    #[clap(long, default_value_t = DEFAULT_PACKET_SIZE)]
    packet_size: u16,

    /// Protocol to use (udp, icmp)
    #[clap(long, value_enum, default_value = "udp")]
    protocol: ProtocolArg,

    /// Socket mode to use for ICMP (raw, dgram)
    #[clap(long, value_enum)]
    socket_mode: Option<SocketModeArg>,

    /// Disable reverse DNS lookups
    #[clap(short = 'n', long)]
    no_rdns: bool,

    /// Output the final result as JSON
    #[clap(long)]
    json: bool,

    /// Longest single blocking receive in milliseconds (cancellation latency)
    #[clap(long, default_value_t = DEFAULT_RECEIVE_POLL_INTERVAL_MS, hide = true)]
    poll_interval_ms: u64,

    /// Enable verbose logging on stderr (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum ProtocolArg {
    Udp,
    Icmp,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum SocketModeArg {
    Raw,
    Dgram,
}

/// JSON output structure for the entire traceroute result
#[derive(Debug, serde::Serialize)]
struct JsonOutput<'a> {
    version: &'static str,
    #[serde(flatten)]
    result: &'a TracerouteResult,
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // Single-threaded runtime; probing itself runs on a blocking worker
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to create Tokio runtime: {e}");
            std::process::exit(1);
        }
    };

    let code = match runtime.block_on(async_main(args)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

/// Install the stderr log subscriber; `RUST_LOG` wins over `-v`
fn init_logging(verbose: u8) {
    let default_directive = match verbose {
        0 => "warn",
        1 => "hoptrace=info",
        _ => "hoptrace=debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn build_options(args: &Args) -> Result<ProbeOptions, String> {
    let mut builder = ProbeOptions::builder()
        .first_hop(args.first_hop)
        .max_hops(args.max_hops)
        .timeout(Duration::from_millis(args.timeout_ms))
        .retries(args.queries)
        .port(args.port)
        .packet_size(args.packet_size)
        .protocol(match args.protocol {
            ProtocolArg::Udp => ProbeProtocol::Udp,
            ProtocolArg::Icmp => ProbeProtocol::Icmp,
        })
        .resolve_hostnames(!args.no_rdns);

    if let Some(mode) = args.socket_mode {
        builder = builder.socket_mode(match mode {
            SocketModeArg::Raw => SocketMode::Raw,
            SocketModeArg::Dgram => SocketMode::Dgram,
        });
    }
    builder.build()
}

async fn async_main(args: Args) -> Result<i32> {
    let options = match build_options(&args) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("Error: Invalid configuration - {msg}");
            eprintln!("Run 'hoptrace --help' for usage information.");
            return Ok(2);
        }
    };

    if args.poll_interval_ms != DEFAULT_RECEIVE_POLL_INTERVAL_MS {
        let timing = hoptrace::TimingConfig {
            receive_poll_interval: Duration::from_millis(args.poll_interval_ms),
            ..Default::default()
        };
        if hoptrace::config::timing::set_config(timing).is_err() {
            tracing::warn!("Timing configuration already set, ignoring --poll-interval-ms");
        }
    }

    if args.port != DEFAULT_PORT && options.protocol() == ProbeProtocol::Icmp {
        eprintln!(
            "Warning: Port {} specified but will be ignored for ICMP protocol",
            args.port
        );
    }

    // Resolve up front for the header; the shared resolver answers the run's
    // own lookup from its cache
    let resolver = Arc::new(SystemResolver::new());
    let destination = match resolver.resolve(&args.host).await {
        Ok(addr) => addr,
        Err(e) => return Ok(report_error(&e)),
    };

    if !args.json {
        println!(
            "traceroute to {} ({}), {} hops max, {} byte packets",
            args.host,
            destination,
            options.max_hops(),
            options.packet_size()
        );
    }

    let (sink, mut stream) = hop_channel();
    let traceroute = Traceroute::new(args.host.clone(), options)
        .with_resolver(resolver)
        .with_sink(sink);

    let cancel = traceroute.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping traceroute");
            cancel.cancel();
        }
    });

    let run = tokio::spawn(traceroute.run());

    while let Some(event) = stream.next_event().await {
        if let TraceEvent::Hop(hop) = event {
            if !args.json {
                println!("{}", format_hop(&hop));
            }
        }
    }

    let outcome = run.await.context("Traceroute task failed")?;
    match outcome {
        Ok(result) => {
            if args.json {
                display_json_results(&result)?;
            }
            Ok(0)
        }
        Err(TracerouteError::Cancelled { partial }) => {
            if args.json {
                display_json_results(&partial)?;
            }
            eprintln!("Traceroute cancelled after {} hops", partial.hop_count());
            Ok(130)
        }
        Err(e) => {
            if args.json {
                if let Some(partial) = e.partial_result() {
                    display_json_results(partial)?;
                }
            }
            Ok(report_error(&e))
        }
    }
}

/// Print a failure with remediation hints, returning the exit code
fn report_error(err: &TracerouteError) -> i32 {
    match err {
        TracerouteError::InsufficientPermissions {
            required,
            suggestion,
        } => {
            eprintln!("Error: Insufficient permissions");
            eprintln!("Required: {required}");
            eprintln!("Suggestion: {suggestion}");
            if !hoptrace::socket::utils::is_root() {
                eprintln!(
                    "\nTo run with elevated privileges: sudo {}",
                    std::env::args().collect::<Vec<_>>().join(" ")
                );
            }
        }
        TracerouteError::Ipv6NotSupported => {
            eprintln!("Error: IPv6 targets are not supported");
            eprintln!("Please use an IPv4 address or hostname that resolves to IPv4.");
        }
        TracerouteError::ResolutionError(msg) => {
            eprintln!("Error: {msg}");
            eprintln!("Please check the hostname and your network connection.");
        }
        e => eprintln!("Error: {e}"),
    }
    1
}

/// Format one hop as a traceroute output line
fn format_hop(hop: &HopRecord) -> String {
    if !hop.is_success() {
        return format!("{:2}  *", hop.ttl);
    }

    let attempts = hop
        .attempts
        .iter()
        .map(|attempt| match attempt {
            ProbeAttempt::Reply { rtt, .. } => format!("{:.3} ms", rtt.as_secs_f64() * 1000.0),
            ProbeAttempt::TimedOut => "*".to_string(),
        })
        .collect::<Vec<_>>()
        .join("  ");

    format!(
        "{:2}  {} ({})  {}",
        hop.ttl,
        hop.host_or_address(),
        hop.address_string(),
        attempts
    )
}

/// Display results in JSON format
fn display_json_results(result: &TracerouteResult) -> Result<()> {
    let output = JsonOutput {
        version: get_version(),
        result,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
