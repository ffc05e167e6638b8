//! Event multiplexer.
//!
//! Merges N adapter streams into one bounded queue drained by the engine
//! task. Per-adapter ordering is preserved; cross-adapter ordering is
//! arrival order. Producers block when the consumer lags (no drops); a
//! producer stalled past the limit is fatal for that feed.

use crate::feed::events::{CanonicalEvent, VenueEvent};
use crate::model::VenueId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A producer blocked this long means the engine is not keeping up; the
/// feed detaches rather than buffering unboundedly.
const PUSH_STALL_LIMIT: Duration = Duration::from_secs(5);

pub struct EventMux {
    tx: mpsc::Sender<VenueEvent>,
    rx: mpsc::Receiver<VenueEvent>,
    forwarders: Vec<JoinHandle<()>>,
}

impl EventMux {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx,
            forwarders: Vec::new(),
        }
    }

    /// Forward one adapter's event stream into the shared queue.
    pub fn attach(&mut self, venue: VenueId, mut events: mpsc::Receiver<CanonicalEvent>) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match timeout(PUSH_STALL_LIMIT, tx.send(VenueEvent { venue, event })).await {
                    Ok(Ok(())) => {}
                    // Consumer dropped: engine is shutting down.
                    Ok(Err(_)) => return,
                    Err(_) => {
                        error!(
                            venue = %venue,
                            stall_secs = PUSH_STALL_LIMIT.as_secs(),
                            "event queue stalled; detaching feed"
                        );
                        // Fatal for this producer: the engine must stop
                        // trusting this venue's book, so deliver a terminal
                        // marker once the queue drains.
                        let _ = tx
                            .send(VenueEvent {
                                venue,
                                event: CanonicalEvent::Disconnected {
                                    reason: "event push stalled".to_string(),
                                },
                            })
                            .await;
                        return;
                    }
                }
            }
            // The adapter closed its channel; make sure the engine stops
            // trusting this venue's book even if no Disconnected was sent.
            warn!(venue = %venue, "adapter event stream ended");
            let _ = tx
                .send(VenueEvent {
                    venue,
                    event: CanonicalEvent::Disconnected {
                        reason: "event stream ended".to_string(),
                    },
                })
                .await;
        });
        self.forwarders.push(handle);
    }

    /// Next event in arrival order. `None` only after shutdown.
    pub async fn recv(&mut self) -> Option<VenueEvent> {
        self.rx.recv().await
    }

    /// Abort all forwarding tasks. In-flight events already queued remain
    /// readable until the queue drains.
    pub fn shutdown(&mut self) {
        for task in self.forwarders.drain(..) {
            task.abort();
        }
    }
}

impl Drop for EventMux {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn per_venue_order_preserved() {
        let mut mux = EventMux::new(16);
        let (tx_a, rx_a) = mpsc::channel(8);
        let (tx_b, rx_b) = mpsc::channel(8);
        mux.attach(VenueId(0), rx_a);
        mux.attach(VenueId(1), rx_b);

        for seq in 1..=3u64 {
            tx_a.send(CanonicalEvent::OrderBookUpdate {
                changes: vec![],
                sequence: Some(seq),
            })
            .await
            .unwrap();
        }
        tx_b.send(CanonicalEvent::Heartbeat).await.unwrap();

        let mut venue_a_seqs = Vec::new();
        let mut saw_heartbeat = false;
        for _ in 0..4 {
            let ev = mux.recv().await.unwrap();
            match (ev.venue, ev.event) {
                (VenueId(0), CanonicalEvent::OrderBookUpdate { sequence, .. }) => {
                    venue_a_seqs.push(sequence.unwrap());
                }
                (VenueId(1), CanonicalEvent::Heartbeat) => saw_heartbeat = true,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(venue_a_seqs, vec![1, 2, 3]);
        assert!(saw_heartbeat);
    }

    #[tokio::test]
    async fn closed_stream_yields_disconnected_marker() {
        let mut mux = EventMux::new(16);
        let (tx, rx) = mpsc::channel(8);
        mux.attach(VenueId(0), rx);

        tx.send(CanonicalEvent::Heartbeat).await.unwrap();
        drop(tx);

        assert_eq!(
            mux.recv().await.unwrap().event,
            CanonicalEvent::Heartbeat
        );
        match mux.recv().await.unwrap().event {
            CanonicalEvent::Disconnected { .. } => {}
            other => panic!("expected disconnect marker, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_consumer_yields_disconnected_marker() {
        // Queue of one, consumer that does not drain: the second push
        // blocks until the stall limit expires and the feed detaches.
        let mut mux = EventMux::new(1);
        let (tx, rx) = mpsc::channel(8);
        mux.attach(VenueId(0), rx);

        tx.send(CanonicalEvent::Heartbeat).await.unwrap();
        tx.send(CanonicalEvent::OrderBookUpdate {
            changes: vec![],
            sequence: Some(7),
        })
        .await
        .unwrap();

        tokio::time::sleep(PUSH_STALL_LIMIT + Duration::from_secs(1)).await;

        // The queued event is still readable; the stalled one was dropped
        // and replaced by the terminal marker.
        assert_eq!(
            mux.recv().await.unwrap().event,
            CanonicalEvent::Heartbeat
        );
        match mux.recv().await.unwrap().event {
            CanonicalEvent::Disconnected { reason } => {
                assert_eq!(reason, "event push stalled");
            }
            other => panic!("expected disconnect marker, got {other:?}"),
        }
    }
}
