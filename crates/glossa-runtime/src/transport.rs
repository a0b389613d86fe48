//! Framed transport to the worker.
//!
//! One long-lived loopback TCP connection carries the whole stream for
//! the lifetime of the channel. Frames are a 4-byte big-endian length
//! prefix followed by the JSON body of one
//! [`StreamingMessage`](glossa_wire::StreamingMessage).
//!
//! # Architecture
//!
//! ```text
//!  send() ──mpsc──► writer task ──frames──► worker
//!                                             │
//!  EventBus ◄──Inbound{worker_id, msg}── receive pump
//! ```
//!
//! Concurrent senders are serialized by the writer task; `send()` resolves
//! once the message is handed to the transport, not when the peer has
//! processed it. Any I/O error on either half is fatal: both halves stop
//! and a single `WorkerError` is published on the bus.

use crate::bus::{BusEvent, EventBus};
use crate::error::TransportError;
use glossa_types::{ErrorCode, WorkerId};
use glossa_wire::StreamingMessage;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on a single frame body.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Outbound queue depth before senders await the writer.
const SEND_QUEUE_DEPTH: usize = 64;

/// Delay between connect attempts while the worker is still binding.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Writes one length-prefixed frame.
///
/// # Errors
///
/// Fails when the message does not encode or the stream rejects the write.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    stream: &mut W,
    message: &StreamingMessage,
) -> Result<(), TransportError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            size: body.len(),
            limit: MAX_FRAME_BYTES,
        });
    }
    stream.write_all(&(body.len() as u32).to_be_bytes()).await?;
    stream.write_all(&body).await?;
    stream.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// # Errors
///
/// Fails on EOF, oversized frames, or a body that does not decode.
pub async fn read_frame<R: AsyncRead + Unpin>(
    stream: &mut R,
) -> Result<StreamingMessage, TransportError> {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await?;
    let size = u32::from_be_bytes(prefix) as usize;
    if size > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge {
            size,
            limit: MAX_FRAME_BYTES,
        });
    }
    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// The channel's long-lived stream to one worker.
pub struct WorkerTransport {
    tx: mpsc::Sender<StreamingMessage>,
    cancel: CancellationToken,
}

impl WorkerTransport {
    /// Dials `endpoint` until it accepts or `deadline` elapses, then
    /// starts the writer task and the receive pump.
    ///
    /// The worker binds its endpoint while starting up, so refused
    /// connections are retried until the deadline.
    ///
    /// # Errors
    ///
    /// [`TransportError::Connect`] with the last refusal when the
    /// endpoint never accepts.
    pub async fn connect(
        endpoint: SocketAddr,
        worker_id: WorkerId,
        language: String,
        bus: EventBus,
        deadline: Duration,
    ) -> Result<Self, TransportError> {
        let stream = dial(endpoint, deadline).await?;
        stream.set_nodelay(true).ok();
        let (read_half, write_half) = stream.into_split();

        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let failed = Arc::new(AtomicBool::new(false));

        let shared = TaskShared {
            worker_id,
            language,
            bus,
            cancel: cancel.clone(),
            failed,
        };

        tokio::spawn(write_loop(write_half, rx, shared.clone()));
        tokio::spawn(read_loop(read_half, shared));

        Ok(Self { tx, cancel })
    }

    /// Hands `message` to the writer task.
    ///
    /// Resolves when the message is queued for the transport; delivery to
    /// the peer is not acknowledged.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] once the transport has failed or shut
    /// down.
    pub async fn send(&self, message: StreamingMessage) -> Result<(), TransportError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Stops both halves without reporting an error.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WorkerTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn dial(endpoint: SocketAddr, deadline: Duration) -> Result<TcpStream, TransportError> {
    let started = tokio::time::Instant::now();
    loop {
        match TcpStream::connect(endpoint).await {
            Ok(stream) => return Ok(stream),
            Err(source) if started.elapsed() >= deadline => {
                return Err(TransportError::Connect { endpoint, source });
            }
            Err(_) => tokio::time::sleep(CONNECT_RETRY_DELAY).await,
        }
    }
}

#[derive(Clone)]
struct TaskShared {
    worker_id: WorkerId,
    language: String,
    bus: EventBus,
    cancel: CancellationToken,
    failed: Arc<AtomicBool>,
}

impl TaskShared {
    /// Reports a fatal transport error exactly once and stops both halves.
    fn fail(&self, error: &TransportError) {
        if self.failed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(worker_id = %self.worker_id, error = %error, "worker transport failed");
        self.bus.publish(BusEvent::WorkerError {
            language: self.language.clone(),
            worker_id: self.worker_id.clone(),
            code: error.code(),
            error: error.to_string(),
        });
        self.cancel.cancel();
    }
}

async fn write_loop(
    mut stream: tokio::net::tcp::OwnedWriteHalf,
    mut rx: mpsc::Receiver<StreamingMessage>,
    shared: TaskShared,
) {
    loop {
        let message = tokio::select! {
            () = shared.cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        if let Err(error) = write_frame(&mut stream, &message).await {
            shared.fail(&error);
            break;
        }
    }
    debug!(worker_id = %shared.worker_id, "transport writer stopped");
}

async fn read_loop(mut stream: tokio::net::tcp::OwnedReadHalf, shared: TaskShared) {
    loop {
        let result = tokio::select! {
            () = shared.cancel.cancelled() => break,
            result = read_frame(&mut stream) => result,
        };

        match result {
            Ok(message) => shared.bus.publish(BusEvent::Inbound {
                worker_id: shared.worker_id.clone(),
                message: Box::new(message),
            }),
            Err(error) => {
                shared.fail(&error);
                break;
            }
        }
    }
    debug!(worker_id = %shared.worker_id, "transport reader stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use glossa_wire::ContentCase;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn start_stream(worker: &str) -> StreamingMessage {
        StreamingMessage::StartStream {
            worker_id: WorkerId::from(worker),
        }
    }

    #[tokio::test]
    async fn frames_round_trip() {
        let (listener, addr) = listener().await;
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (mut server, _) = listener.accept().await.unwrap();
        let mut client = client.await.unwrap();

        write_frame(&mut client, &start_stream("w1")).await.unwrap();
        let got = read_frame(&mut server).await.unwrap();
        assert_eq!(got, start_stream("w1"));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (listener, addr) = listener().await;
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (mut server, _) = listener.accept().await.unwrap();
        let mut client = client.await.unwrap();

        let huge = (MAX_FRAME_BYTES as u32 + 1).to_be_bytes();
        client.write_all(&huge).await.unwrap();

        assert!(matches!(
            read_frame(&mut server).await,
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn sent_messages_reach_the_peer() {
        let (listener, addr) = listener().await;
        let bus = EventBus::new();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let transport = WorkerTransport::connect(
            addr,
            WorkerId::from("w1"),
            "python".into(),
            bus,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let mut peer = accept.await.unwrap();

        transport.send(start_stream("w1")).await.unwrap();

        let got = read_frame(&mut peer).await.unwrap();
        assert_eq!(got.content_case(), ContentCase::StartStream);
    }

    #[tokio::test]
    async fn inbound_frames_are_republished_on_the_bus() {
        let (listener, addr) = listener().await;
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let _transport = WorkerTransport::connect(
            addr,
            WorkerId::from("w1"),
            "python".into(),
            bus,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let mut peer = accept.await.unwrap();

        write_frame(&mut peer, &start_stream("w1")).await.unwrap();

        let event = rx.recv().await.unwrap();
        let BusEvent::Inbound { worker_id, message } = event else {
            panic!("expected inbound event");
        };
        assert_eq!(worker_id, WorkerId::from("w1"));
        assert_eq!(message.content_case(), ContentCase::StartStream);
    }

    #[tokio::test]
    async fn peer_close_publishes_one_worker_error() {
        let (listener, addr) = listener().await;
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let transport = WorkerTransport::connect(
            addr,
            WorkerId::from("w1"),
            "python".into(),
            bus,
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let peer = accept.await.unwrap();

        drop(peer);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, BusEvent::WorkerError { worker_id, .. }
            if worker_id == WorkerId::from("w1")));

        // Sends after failure observe the closed transport.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            transport.send(start_stream("w1")).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn connect_gives_up_at_deadline() {
        // A port nothing listens on: bind, grab the addr, drop the socket.
        let (listener, addr) = listener().await;
        drop(listener);

        let result = WorkerTransport::connect(
            addr,
            WorkerId::from("w1"),
            "python".into(),
            EventBus::new(),
            Duration::from_millis(80),
        )
        .await;

        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}
