//! Core traceroute engine implementation
//!
//! The [`Prober`] walks TTLs one at a time over a [`ProbeTransport`]. It is
//! synchronous: the async API runs it on a blocking worker thread, and it
//! polls its cancellation token between short receive slices.

use crate::config::timing;
use crate::dns::ReverseLookup;
use crate::socket::utils::is_fatal_transport_error;
use crate::socket::{ProbeInfo, ProbeResponse, ProbeTransport};
use crate::traceroute::recorder::{HopObserver, HopRecorder};
use crate::traceroute::{ProbeAttempt, ProbeOptions, Termination, TracerouteError, TracerouteResult};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why the TTL loop stopped early
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Fatal { ttl: u8, reason: String },
}

/// Traceroute engine
pub struct Prober {
    target: String,
    destination: Ipv4Addr,
    source: Option<Ipv4Addr>,
    options: ProbeOptions,
    transport: Box<dyn ProbeTransport>,
    reverse_lookup: Option<Arc<dyn ReverseLookup>>,
    observer: Option<Box<dyn HopObserver>>,
    cancel: CancellationToken,
    sequence: u16,
}

impl Prober {
    /// Create a prober for `destination`
    pub fn new(
        target: impl Into<String>,
        destination: Ipv4Addr,
        options: ProbeOptions,
        transport: Box<dyn ProbeTransport>,
    ) -> Result<Self, TracerouteError> {
        options.validate().map_err(TracerouteError::ConfigError)?;

        Ok(Self {
            target: target.into(),
            destination,
            source: None,
            options,
            transport,
            reverse_lookup: None,
            observer: None,
            cancel: CancellationToken::new(),
            sequence: 0,
        })
    }

    /// Record the local egress address in the result
    pub fn with_source(mut self, source: Ipv4Addr) -> Self {
        self.source = Some(source);
        self
    }

    /// Resolve hop hostnames with `lookup`
    pub fn with_reverse_lookup(mut self, lookup: Arc<dyn ReverseLookup>) -> Self {
        self.reverse_lookup = Some(lookup);
        self
    }

    /// Stream progress to `observer`
    pub fn with_observer(mut self, observer: Box<dyn HopObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Stop the run when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run the traceroute to completion
    ///
    /// Blocks the calling thread. The transport is dropped, closing its
    /// sockets, before this returns on every path.
    pub fn run(mut self) -> Result<TracerouteResult, TracerouteError> {
        let start = Instant::now();
        let mut recorder = HopRecorder::new(
            self.target.clone(),
            self.destination,
            self.source,
            self.transport.mode().protocol,
            self.observer.take(),
        );

        tracing::info!(
            target_host = %self.target,
            destination = %self.destination,
            mode = %self.transport.mode().description(),
            first_hop = self.options.first_hop(),
            max_hops = self.options.max_hops(),
            "Starting traceroute"
        );

        let outcome = self.probe_path(&mut recorder);
        let total_duration = start.elapsed();

        match outcome {
            Ok(termination) => {
                let result = recorder.into_result(termination, total_duration);
                tracing::info!(
                    hops = result.hop_count(),
                    termination = %termination,
                    elapsed_ms = total_duration.as_millis() as u64,
                    "Traceroute complete"
                );
                Ok(result)
            }
            Err(Interrupt::Cancelled) => {
                tracing::info!(hops = recorder.hops().len(), "Traceroute cancelled");
                let partial = recorder.into_result(Termination::Aborted, total_duration);
                Err(TracerouteError::Cancelled {
                    partial: Box::new(partial),
                })
            }
            Err(Interrupt::Fatal { ttl, reason }) => {
                tracing::warn!(ttl, %reason, "Traceroute aborted");
                let partial = recorder.into_result(Termination::Aborted, total_duration);
                Err(TracerouteError::Aborted {
                    ttl,
                    reason,
                    partial: Box::new(partial),
                })
            }
        }
    }

    /// Walk TTLs from `first_hop` until the destination answers or `max_hops` is done
    fn probe_path(&mut self, recorder: &mut HopRecorder) -> Result<Termination, Interrupt> {
        let mut ttl = self.options.first_hop();
        loop {
            if self.probe_hop(ttl, recorder)? {
                return Ok(Termination::ReachedDestination);
            }
            match ttl.checked_add(1) {
                Some(next) if next <= self.options.max_hops() => ttl = next,
                _ => return Ok(Termination::MaxHopsExceeded),
            }
        }
    }

    /// Probe one TTL; returns whether the destination answered
    fn probe_hop(&mut self, ttl: u8, recorder: &mut HopRecorder) -> Result<bool, Interrupt> {
        self.transport
            .set_ttl(ttl)
            .map_err(|e| Interrupt::Fatal {
                ttl,
                reason: format!("{e:#}"),
            })?;
        recorder.begin_hop(ttl);

        let mut reached = false;
        for attempt in 0..self.options.retries() {
            if self.cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }

            let outcome = self.send_attempt(ttl, attempt)?;
            recorder.record(ttl, outcome);

            if outcome.address() == Some(self.destination) {
                reached = true;
                break;
            }
        }

        let hostname = match (recorder.current_address(), &self.reverse_lookup) {
            (Some(addr), Some(lookup)) => lookup.lookup(addr, &self.cancel),
            _ => None,
        };
        if self.cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        recorder.conclude_hop(hostname);
        Ok(reached)
    }

    /// Send one probe and wait for its answer
    fn send_attempt(&mut self, ttl: u8, attempt: u8) -> Result<ProbeAttempt, Interrupt> {
        let probe = ProbeInfo {
            ttl,
            attempt,
            sequence: self.next_sequence(),
            sent_at: Instant::now(),
        };

        if let Err(e) = self.transport.send_probe(self.destination, &probe) {
            check_transport_error(ttl, &e)?;
            return Ok(ProbeAttempt::TimedOut);
        }

        let outcome = match self.await_response(&probe)? {
            Some(response) => ProbeAttempt::Reply {
                address: response.from_addr,
                rtt: response.received_at.saturating_duration_since(probe.sent_at),
            },
            None => ProbeAttempt::TimedOut,
        };

        tracing::debug!(
            ttl,
            attempt,
            sequence = probe.sequence,
            from = ?outcome.address(),
            rtt_us = outcome.rtt().map(|rtt| rtt.as_micros() as u64),
            "Probe concluded"
        );
        Ok(outcome)
    }

    /// Wait out the probe timeout in short slices, checking for cancellation
    fn await_response(&mut self, probe: &ProbeInfo) -> Result<Option<ProbeResponse>, Interrupt> {
        let deadline = probe.sent_at + self.options.timeout();
        let slice = timing::receive_poll_interval();

        loop {
            if self.cancel.is_cancelled() {
                return Err(Interrupt::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match self.transport.recv_response(remaining.min(slice)) {
                Ok(Some(response)) if response.probe_info.sequence == probe.sequence => {
                    return Ok(Some(response));
                }
                Ok(_) => {}
                Err(e) => {
                    check_transport_error(probe.ttl, &e)?;
                    return Ok(None);
                }
            }
        }
    }

    fn next_sequence(&mut self) -> u16 {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }
}

impl std::fmt::Debug for Prober {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prober")
            .field("target", &self.target)
            .field("destination", &self.destination)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

/// Fatal errors stop the run; anything else costs only the current attempt
fn check_transport_error(ttl: u8, err: &anyhow::Error) -> Result<(), Interrupt> {
    if is_fatal_transport_error(err) {
        return Err(Interrupt::Fatal {
            ttl,
            reason: format!("{err:#}"),
        });
    }
    tracing::warn!(ttl, error = %format!("{err:#}"), "Transport error, counting attempt as lost");
    Ok(())
}
