//! Inbound message demultiplexer.
//!
//! Transforms the bus's heterogeneous stream into this channel's typed
//! inbound messages and hands them to subscribers keyed by content case.
//!
//! # Subscriptions
//!
//! | Kind | Lifetime | Delivery |
//! |------|----------|----------|
//! | one-shot | until first match or timeout | exactly one message, or a timeout error |
//! | continuous | until the demux shuts down | every matching message, in bus order |
//!
//! At most one one-shot waiter is armed per content case; arming a new one
//! replaces the previous waiter, which then observes a shutdown error.
//!
//! # Architecture
//!
//! ```text
//! EventBus ──broadcast──► pump task
//!                           │ filter: worker_id == self
//!                           ▼
//!                    waiters[ContentCase]
//!                      ├─ one-shot ──► oneshot::Sender (take on fire)
//!                      └─ continuous ► mpsc::UnboundedSender (retain)
//! ```

use crate::bus::{BusEvent, EventBus};
use crate::error::DemuxError;
use glossa_types::WorkerId;
use glossa_wire::{ContentCase, StreamingMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Default)]
struct CaseWaiters {
    /// Armed one-shot waiter, tagged with its arming generation.
    one_shot: Option<(u64, oneshot::Sender<StreamingMessage>)>,
    /// Continuous subscribers.
    continuous: Vec<mpsc::UnboundedSender<StreamingMessage>>,
}

type WaiterMap = Mutex<HashMap<ContentCase, CaseWaiters>>;

/// Demultiplexer for one channel's inbound messages.
pub struct InboundDemux {
    worker_id: WorkerId,
    waiters: Arc<WaiterMap>,
    generation: AtomicU64,
    cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl InboundDemux {
    /// Starts the pump for `worker_id` against `bus`.
    #[must_use]
    pub fn start(worker_id: WorkerId, bus: &EventBus) -> Self {
        let waiters: Arc<WaiterMap> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let pump = tokio::spawn(pump(
            worker_id.clone(),
            bus.subscribe(),
            Arc::clone(&waiters),
            cancel.clone(),
        ));

        Self {
            worker_id,
            waiters,
            generation: AtomicU64::new(0),
            cancel,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Returns the worker id this demux filters for.
    #[must_use]
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Arms a one-shot waiter for the first `case` message.
    ///
    /// The waiter is armed before this returns, so a message arriving
    /// between arming and awaiting the returned future is not lost.
    /// Arming replaces any waiter already armed for `case`; the replaced
    /// waiter resolves with [`DemuxError::Shutdown`].
    ///
    /// # Errors
    ///
    /// The returned future resolves to [`DemuxError::Timeout`] when no
    /// matching message arrives within `timeout`, and to
    /// [`DemuxError::Shutdown`] when the demux is torn down or the waiter
    /// is replaced while armed.
    pub fn subscribe_once(
        &self,
        case: ContentCase,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<StreamingMessage, DemuxError>> {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let waiters = Arc::clone(&self.waiters);

        waiters.lock().entry(case).or_default().one_shot = Some((generation, tx));

        async move {
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(message)) => Ok(message),
                Ok(Err(_)) => Err(DemuxError::Shutdown { case: case.name() }),
                Err(_) => {
                    // Disarm, unless a newer waiter has replaced this one.
                    let mut map = waiters.lock();
                    if let Some(case_waiters) = map.get_mut(&case) {
                        if matches!(case_waiters.one_shot, Some((gen, _)) if gen == generation) {
                            case_waiters.one_shot = None;
                        }
                    }
                    Err(DemuxError::Timeout {
                        case: case.name(),
                        timeout_ms: timeout.as_millis(),
                    })
                }
            }
        }
    }

    /// Subscribes to every `case` message until the demux shuts down.
    #[must_use]
    pub fn subscribe_stream(&self, case: ContentCase) -> mpsc::UnboundedReceiver<StreamingMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.waiters.lock().entry(case).or_default().continuous.push(tx);
        rx
    }

    /// Stops the pump and releases every waiter.
    ///
    /// Pending one-shot subscriptions resolve with
    /// [`DemuxError::Shutdown`]; continuous streams end.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.waiters.lock().clear();
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

impl Drop for InboundDemux {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn pump(
    worker_id: WorkerId,
    mut rx: broadcast::Receiver<BusEvent>,
    waiters: Arc<WaiterMap>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(BusEvent::Inbound {
                worker_id: id,
                message,
            }) if id == worker_id => dispatch(&waiters, *message),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Closed) => {
                debug!(worker_id = %worker_id, "bus closed, stopping demux pump");
                break;
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(worker_id = %worker_id, missed = n, "demux pump lagged behind the bus");
            }
        }
    }
}

fn dispatch(waiters: &WaiterMap, message: StreamingMessage) {
    let case = message.content_case();
    let mut map = waiters.lock();
    let Some(case_waiters) = map.get_mut(&case) else {
        debug!(case = %case, "no subscriber for inbound message");
        return;
    };

    case_waiters
        .continuous
        .retain(|tx| tx.send(message.clone()).is_ok());

    if let Some((_, tx)) = case_waiters.one_shot.take() {
        // A waiter whose caller already timed out is simply dropped here.
        let _ = tx.send(message);
    }
}
