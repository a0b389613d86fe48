//! Process-wide event bus.
//!
//! The bus is the publish/subscribe fabric tying the transport, the
//! demultiplexer, the file watcher, and host policy together. Every
//! inbound worker message is republished here tagged with its worker id,
//! so multiple channels can share one bus and each filters its own
//! traffic.
//!
//! Built on `tokio::sync::broadcast`: subscribers that lag are told how
//! many events they missed and keep receiving.

use glossa_types::WorkerId;
use glossa_wire::StreamingMessage;
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Default bus capacity before slow subscribers start lagging.
const BUS_CAPACITY: usize = 256;

/// An event on the bus.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A message received from a worker.
    Inbound {
        /// Channel the message belongs to.
        worker_id: WorkerId,
        /// The received message.
        message: Box<StreamingMessage>,
    },

    /// A worker or its transport failed fatally.
    WorkerError {
        /// Language tag of the failed worker.
        language: String,
        /// Channel the failure belongs to.
        worker_id: WorkerId,
        /// Stable error code of the underlying failure.
        code: &'static str,
        /// Human-readable description.
        error: String,
    },

    /// A watched file changed; the host should restart.
    HostRestart,

    /// A file under a script root changed.
    File {
        /// Path of the changed file.
        path: PathBuf,
    },
}

/// Cloneable handle to the process-wide event bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Publishes an event to all current subscribers.
    ///
    /// An event with no subscribers is dropped; publishing is never an
    /// error for the publisher.
    pub fn publish(&self, event: BusEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribes to all events from this point on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(BusEvent::HostRestart);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, BusEvent::HostRestart));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(BusEvent::HostRestart);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn events_fan_out_to_all_subscribers() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(BusEvent::File {
            path: PathBuf::from("run.py"),
        });

        assert!(matches!(rx1.recv().await.unwrap(), BusEvent::File { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), BusEvent::File { .. }));
    }

    #[tokio::test]
    async fn inbound_events_carry_worker_id() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let worker_id = WorkerId::from("w1");

        bus.publish(BusEvent::Inbound {
            worker_id: worker_id.clone(),
            message: Box::new(StreamingMessage::StartStream {
                worker_id: worker_id.clone(),
            }),
        });

        let BusEvent::Inbound { worker_id: got, .. } = rx.recv().await.unwrap() else {
            panic!("expected inbound event");
        };
        assert_eq!(got, worker_id);
    }
}
