//! Hop accumulation and streaming delivery
//!
//! A [`HopRecorder`] collects one [`HopRecord`] per TTL and forwards every
//! attempt and every finished hop to an optional [`HopObserver`]. The
//! channel-backed observer, [`HopSink`], pairs with a [`HopStream`] that the
//! caller reads while the run is still in progress.

use crate::socket::ProbeProtocol;
use crate::traceroute::{HopRecord, ProbeAttempt, Termination, TracerouteResult};
use futures::Stream;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;

/// Receives progress from a running traceroute
///
/// Callbacks run on the probing thread and must not block.
pub trait HopObserver: Send {
    /// A probe attempt at `ttl` concluded
    fn on_attempt(&mut self, ttl: u8, attempt: &ProbeAttempt) {
        let _ = (ttl, attempt);
    }

    /// All attempts at a TTL are done and the hop is final
    fn on_hop(&mut self, hop: &HopRecord);

    /// The run is over; called exactly once and nothing follows it
    fn on_finish(&mut self, termination: Termination);
}

/// Event delivered through a [`HopStream`]
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// A single probe attempt concluded
    Attempt {
        /// TTL the attempt was made at
        ttl: u8,
        /// Outcome of the attempt
        attempt: ProbeAttempt,
    },
    /// A hop was finalized
    Hop(HopRecord),
    /// End of stream
    Finished(Termination),
}

/// Sending half of a hop channel
///
/// Sends never block; events pile up in the channel when nobody reads them.
#[derive(Debug)]
pub struct HopSink {
    tx: Option<mpsc::UnboundedSender<TraceEvent>>,
}

impl HopSink {
    fn send(&mut self, event: TraceEvent) {
        if let Some(tx) = &self.tx {
            // The reader may have gone away; the run carries on regardless
            let _ = tx.send(event);
        }
    }

    /// Whether end-of-stream has already been sent
    pub fn is_finished(&self) -> bool {
        self.tx.is_none()
    }
}

impl HopObserver for HopSink {
    fn on_attempt(&mut self, ttl: u8, attempt: &ProbeAttempt) {
        self.send(TraceEvent::Attempt {
            ttl,
            attempt: *attempt,
        });
    }

    fn on_hop(&mut self, hop: &HopRecord) {
        self.send(TraceEvent::Hop(hop.clone()));
    }

    fn on_finish(&mut self, termination: Termination) {
        self.send(TraceEvent::Finished(termination));
        // Dropping the sender closes the channel behind the final event
        self.tx = None;
    }
}

/// Receiving half of a hop channel
#[derive(Debug)]
pub struct HopStream {
    rx: mpsc::UnboundedReceiver<TraceEvent>,
}

impl HopStream {
    /// Wait for the next event; `None` once the channel is closed
    pub async fn next_event(&mut self) -> Option<TraceEvent> {
        self.rx.recv().await
    }
}

impl Stream for HopStream {
    type Item = TraceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Create a connected sink and stream
///
/// ```
/// use hoptrace::hop_channel;
///
/// let (sink, _stream) = hop_channel();
/// assert!(!sink.is_finished());
/// ```
pub fn hop_channel() -> (HopSink, HopStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (HopSink { tx: Some(tx) }, HopStream { rx })
}

/// Accumulates hop records for one run
pub struct HopRecorder {
    target: String,
    destination: Ipv4Addr,
    source: Option<Ipv4Addr>,
    protocol: ProbeProtocol,
    hops: Vec<HopRecord>,
    current: Option<HopRecord>,
    observer: Option<Box<dyn HopObserver>>,
    finished: bool,
}

impl HopRecorder {
    /// Create a recorder for a run towards `destination`
    pub fn new(
        target: impl Into<String>,
        destination: Ipv4Addr,
        source: Option<Ipv4Addr>,
        protocol: ProbeProtocol,
        observer: Option<Box<dyn HopObserver>>,
    ) -> Self {
        Self {
            target: target.into(),
            destination,
            source,
            protocol,
            hops: Vec::new(),
            current: None,
            observer,
            finished: false,
        }
    }

    /// Start the record for `ttl`, discarding any hop left unconcluded
    pub fn begin_hop(&mut self, ttl: u8) {
        if let Some(stale) = self.current.replace(HopRecord::new(ttl)) {
            tracing::warn!(ttl = stale.ttl, "Discarding unconcluded hop");
        }
    }

    /// Append an attempt to the hop in progress. A reply from the
    /// destination becomes the hop address even after a router answered.
    pub fn record(&mut self, ttl: u8, attempt: ProbeAttempt) {
        let destination = self.destination;
        match self.current.as_mut() {
            Some(hop) if hop.ttl == ttl => {
                hop.push(attempt);
                if attempt.address() == Some(destination) {
                    hop.address = Some(destination);
                }
            }
            _ => {
                tracing::warn!(ttl, "Attempt recorded outside its hop; ignoring");
                return;
            }
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_attempt(ttl, &attempt);
        }
    }

    /// Address of the hop in progress, if any attempt got a reply
    pub fn current_address(&self) -> Option<Ipv4Addr> {
        self.current.as_ref().and_then(|hop| hop.address)
    }

    /// Finalize the hop in progress and hand it to the observer
    pub fn conclude_hop(&mut self, hostname: Option<String>) -> Option<&HopRecord> {
        let mut hop = self.current.take()?;
        hop.hostname = hostname;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_hop(&hop);
        }
        self.hops.push(hop);
        self.hops.last()
    }

    /// Hops concluded so far
    pub fn hops(&self) -> &[HopRecord] {
        &self.hops
    }

    /// Signal end-of-stream; later calls do nothing
    pub fn finish(&mut self, termination: Termination) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.current = None;
        if let Some(observer) = self.observer.as_mut() {
            observer.on_finish(termination);
        }
    }

    /// Finish and assemble the result
    pub fn into_result(mut self, termination: Termination, total_duration: Duration) -> TracerouteResult {
        self.finish(termination);
        TracerouteResult {
            target: std::mem::take(&mut self.target),
            destination: self.destination,
            source: self.source,
            hops: std::mem::take(&mut self.hops),
            termination,
            protocol: self.protocol,
            total_duration,
        }
    }
}

impl Drop for HopRecorder {
    fn drop(&mut self) {
        self.finish(Termination::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn recorder(observer: Option<Box<dyn HopObserver>>) -> HopRecorder {
        HopRecorder::new(
            "example.com",
            Ipv4Addr::new(93, 184, 216, 34),
            None,
            ProbeProtocol::Udp,
            observer,
        )
    }

    fn reply(last_octet: u8) -> ProbeAttempt {
        ProbeAttempt::Reply {
            address: Ipv4Addr::new(10, 0, 0, last_octet),
            rtt: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_order_with_single_finish() {
        let (sink, stream) = hop_channel();
        let mut rec = recorder(Some(Box::new(sink)));

        rec.begin_hop(1);
        rec.record(1, reply(1));
        rec.conclude_hop(None);
        rec.begin_hop(2);
        rec.record(2, ProbeAttempt::TimedOut);
        rec.conclude_hop(None);
        rec.finish(Termination::MaxHopsExceeded);
        rec.finish(Termination::ReachedDestination);
        let result = rec.into_result(Termination::MaxHopsExceeded, Duration::ZERO);

        let events: Vec<TraceEvent> = stream.collect().await;
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], TraceEvent::Attempt { ttl: 1, .. }));
        assert!(matches!(&events[1], TraceEvent::Hop(hop) if hop.ttl == 1));
        assert!(matches!(events[2], TraceEvent::Attempt { ttl: 2, .. }));
        assert!(matches!(&events[3], TraceEvent::Hop(hop) if hop.ttl == 2));
        assert_eq!(
            events[4],
            TraceEvent::Finished(Termination::MaxHopsExceeded)
        );
        assert_eq!(result.hop_count(), 2);
    }

    #[tokio::test]
    async fn test_drop_finishes_with_aborted_and_discards_open_hop() {
        let (sink, mut stream) = hop_channel();
        {
            let mut rec = recorder(Some(Box::new(sink)));
            rec.begin_hop(1);
            rec.record(1, reply(1));
        }

        assert!(matches!(
            stream.next_event().await,
            Some(TraceEvent::Attempt { ttl: 1, .. })
        ));
        assert_eq!(
            stream.next_event().await,
            Some(TraceEvent::Finished(Termination::Aborted))
        );
        assert_eq!(stream.next_event().await, None);
    }

    #[test]
    fn test_recording_without_observer() {
        let mut rec = recorder(None);
        rec.begin_hop(3);
        rec.record(3, ProbeAttempt::TimedOut);
        rec.record(3, reply(7));
        assert_eq!(rec.current_address(), Some(Ipv4Addr::new(10, 0, 0, 7)));

        // Attempts for another TTL are ignored
        rec.record(4, reply(9));

        let hop = rec
            .conclude_hop(Some("r7.example.net".to_string()))
            .cloned()
            .unwrap();
        assert_eq!(hop.attempts.len(), 2);
        assert_eq!(hop.hostname.as_deref(), Some("r7.example.net"));
        assert_eq!(rec.current_address(), None);
        assert!(rec.conclude_hop(None).is_none());
    }

    #[test]
    fn test_destination_reply_overrides_router_address() {
        let destination = Ipv4Addr::new(93, 184, 216, 34);
        let mut rec = recorder(None);
        rec.begin_hop(6);
        rec.record(6, reply(4));
        rec.record(
            6,
            ProbeAttempt::Reply {
                address: destination,
                rtt: Duration::from_millis(8),
            },
        );
        assert_eq!(rec.current_address(), Some(destination));

        rec.conclude_hop(None);
        let result = rec.into_result(Termination::ReachedDestination, Duration::ZERO);
        assert_eq!(result.hops[0].address, Some(destination));
        assert_eq!(result.destination_hop().map(|h| h.ttl), Some(6));
    }

    #[test]
    fn test_events_survive_dropped_reader() {
        let (sink, stream) = hop_channel();
        drop(stream);
        let mut rec = recorder(Some(Box::new(sink)));
        rec.begin_hop(1);
        rec.record(1, reply(1));
        rec.conclude_hop(None);
        let result = rec.into_result(Termination::ReachedDestination, Duration::ZERO);
        assert_eq!(result.hop_count(), 1);
    }
}
