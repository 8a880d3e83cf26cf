//! Core traceroute functionality

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod recorder;
pub mod result;
pub mod types;

// Re-export commonly used types
pub use api::{trace, traceroute, Traceroute};
pub use config::{ProbeOptions, ProbeOptionsBuilder};
pub use engine::Prober;
pub use error::TracerouteError;
pub use recorder::{hop_channel, HopObserver, HopRecorder, HopSink, HopStream, TraceEvent};
pub use result::{Termination, TracerouteResult};
pub use types::{HopRecord, ProbeAttempt};
