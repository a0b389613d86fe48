//! End-to-end tests for the worker channel against a scripted worker.
//!
//! The fake worker binds a loopback listener, speaks the framed protocol
//! with [`read_frame`]/[`write_frame`], and answers according to a
//! per-test behavior closure. Delayed replies are injected through the
//! worker's reply queue so tests can hold responses open.

use async_trait::async_trait;
use glossa_runtime::{
    read_frame, write_frame, BusEvent, ChannelState, EventBus, InvocationContext, InvocationError,
    LaunchError, WorkerChannel, WorkerHandle, WorkerLauncher,
};
use glossa_types::{
    BindingInfo, FunctionId, FunctionMetadata, WorkerConfig, WorkerId,
};
use glossa_wire::{
    ContentCase, HostValue, ParameterBinding, RpcLog, RpcLogLevel, StatusResult, StreamingMessage,
    TypedData, TYPED_DATA_COLLECTION,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// =============================================================================
// Test Fixtures
// =============================================================================

/// Launcher that spawns nothing; the fake worker is already listening.
struct DetachedLauncher;

#[async_trait]
impl WorkerLauncher for DetachedLauncher {
    async fn launch(
        &self,
        _worker_id: &WorkerId,
        _config: &WorkerConfig,
        _script_root: &Path,
    ) -> Result<WorkerHandle, LaunchError> {
        Ok(WorkerHandle::detached())
    }
}

type Behavior = Box<dyn FnMut(&StreamingMessage) -> Vec<StreamingMessage> + Send>;

/// A scripted worker on the other end of the channel's transport.
struct FakeWorker {
    /// Every message the host has sent, in arrival order.
    requests: Arc<Mutex<Vec<StreamingMessage>>>,
    /// Queue for replies injected by the test after the fact.
    reply_tx: mpsc::UnboundedSender<StreamingMessage>,
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl FakeWorker {
    /// Binds a listener and serves one connection with `behavior`.
    ///
    /// The worker emits `StartStream` as soon as the host connects, then
    /// answers each host message with whatever `behavior` returns. When
    /// `send_start_stream` is false the worker stays silent after
    /// connecting.
    async fn spawn(send_start_stream: bool, mut behavior: Behavior) -> (Self, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<StreamingMessage>();
        let (stream_tx, stream_rx) = tokio::sync::oneshot::channel();

        let writer = tokio::spawn(async move {
            let mut write_half: tokio::net::tcp::OwnedWriteHalf = match stream_rx.await {
                Ok(half) => half,
                Err(_) => return,
            };
            while let Some(reply) = reply_rx.recv().await {
                if write_frame(&mut write_half, &reply).await.is_err() {
                    return;
                }
            }
        });

        let reader = {
            let requests = Arc::clone(&requests);
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                let (mut read_half, write_half) = stream.into_split();
                let _ = stream_tx.send(write_half);

                if send_start_stream {
                    let _ = reply_tx.send(StreamingMessage::StartStream {
                        worker_id: WorkerId::from("worker"),
                    });
                }

                while let Ok(message) = read_frame(&mut read_half).await {
                    requests.lock().push(message.clone());
                    for reply in behavior(&message) {
                        if reply_tx.send(reply).is_err() {
                            return;
                        }
                    }
                }
            })
        };

        (
            Self {
                requests,
                reply_tx,
                reader,
                writer,
            },
            addr,
        )
    }

    /// Injects a reply independent of any received message.
    fn reply(&self, message: StreamingMessage) {
        self.reply_tx.send(message).unwrap();
    }

    /// Returns the host messages received so far for `case`.
    fn received(&self, case: ContentCase) -> Vec<StreamingMessage> {
        self.requests
            .lock()
            .iter()
            .filter(|m| m.content_case() == case)
            .cloned()
            .collect()
    }

    /// Drops the connection, simulating a worker crash.
    fn crash(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

/// Behavior answering init and load requests successfully and holding
/// every invocation open until the test replies.
fn handshake_behavior(capabilities: BTreeMap<String, String>) -> Behavior {
    Box::new(move |message| match message {
        StreamingMessage::WorkerInitRequest { .. } => {
            vec![StreamingMessage::WorkerInitResponse {
                result: StatusResult::ok(),
                capabilities: capabilities.clone(),
                worker_version: Some("4.1.0".into()),
            }]
        }
        StreamingMessage::FunctionLoadRequest { function_id, .. } => {
            vec![StreamingMessage::FunctionLoadResponse {
                function_id: function_id.clone(),
                result: StatusResult::ok(),
                is_dependency_downloaded: false,
            }]
        }
        _ => Vec::new(),
    })
}

/// Behavior that additionally echoes every invocation with one output.
fn echo_behavior(capabilities: BTreeMap<String, String>) -> Behavior {
    let mut inner = handshake_behavior(capabilities);
    Box::new(move |message| match message {
        StreamingMessage::InvocationRequest { invocation_id, .. } => {
            vec![StreamingMessage::InvocationResponse {
                invocation_id: invocation_id.clone(),
                result: StatusResult::ok(),
                output_data: vec![ParameterBinding {
                    name: "out".into(),
                    data: TypedData::String("hello".into()),
                }],
                return_value: None,
            }]
        }
        other => inner(other),
    })
}

fn test_config(addr: SocketAddr) -> WorkerConfig {
    WorkerConfig::new("python", [".py"])
        .with_endpoint(addr)
        .with_handshake_timeout(Duration::from_millis(500))
}

fn http_function(id: &str, name: &str) -> FunctionMetadata {
    FunctionMetadata::new(FunctionId::from(id), name)
        .with_script_file(format!("{name}/run.py"))
        .with_directory(name)
        .with_binding(BindingInfo::input("req", "httpTrigger"))
        .with_binding(BindingInfo::output("out", "http"))
}

fn invocation_for(id: &str, name: &str) -> (InvocationContext, glossa_runtime::ResultFuture) {
    InvocationContext::new(
        Arc::new(http_function(id, name)),
        vec![("req".into(), HostValue::String("ping".into()))],
        BTreeMap::from([("method".to_string(), HostValue::String("GET".into()))]),
    )
}

/// Spawns a fake worker, starts a channel against it, and loads `functions`.
async fn started_channel(
    behavior: Behavior,
    functions: Vec<FunctionMetadata>,
) -> (WorkerChannel, FakeWorker, EventBus) {
    let (worker, addr) = FakeWorker::spawn(true, behavior).await;
    let bus = EventBus::new();
    let channel = WorkerChannel::new(
        "/tmp/scripts",
        test_config(addr),
        bus.clone(),
        Box::new(DetachedLauncher),
    );

    channel.start_worker().await.expect("startup");
    if !functions.is_empty() {
        channel.setup_invocation_buffers(functions);
        channel.send_function_load_requests().await.expect("loads");
    }

    (channel, worker, bus)
}

async fn await_result(
    future: glossa_runtime::ResultFuture,
) -> Result<glossa_runtime::InvocationOutcome, InvocationError> {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("result within deadline")
        .expect("promise completed")
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn happy_path_invocation_round_trip() {
    let caps = BTreeMap::from([(TYPED_DATA_COLLECTION.to_string(), "1".to_string())]);
    let (channel, _worker, _bus) =
        started_channel(echo_behavior(caps), vec![http_function("F1", "HttpTrigger1")]).await;

    assert_eq!(channel.state(), ChannelState::Initialized);
    assert!(channel.capabilities().enabled(TYPED_DATA_COLLECTION));

    let (context, future) = invocation_for("F1", "HttpTrigger1");
    channel.enqueue(context).unwrap();

    let outcome = await_result(future).await.unwrap();
    assert_eq!(
        outcome.outputs.get("out"),
        Some(&HostValue::String("hello".into()))
    );

    channel.dispose().await;
}

#[tokio::test]
async fn startup_times_out_without_start_stream() {
    let (_worker, addr) = FakeWorker::spawn(false, handshake_behavior(BTreeMap::new())).await;
    let bus = EventBus::new();
    let mut errors = bus.subscribe();
    let channel = WorkerChannel::new(
        "/tmp/scripts",
        test_config(addr),
        bus.clone(),
        Box::new(DetachedLauncher),
    );

    let result = channel.start_worker().await;

    assert!(result.is_err());
    assert_eq!(channel.state(), ChannelState::Disposed);
    loop {
        if let BusEvent::WorkerError { worker_id, .. } = errors.recv().await.unwrap() {
            assert_eq!(&worker_id, channel.worker_id());
            break;
        }
    }
}

#[tokio::test]
async fn failed_init_fails_startup() {
    let behavior: Behavior = Box::new(|message| match message {
        StreamingMessage::WorkerInitRequest { .. } => {
            vec![StreamingMessage::WorkerInitResponse {
                result: StatusResult::failure("unsupported host version"),
                capabilities: BTreeMap::new(),
                worker_version: None,
            }]
        }
        _ => Vec::new(),
    });
    let (_worker, addr) = FakeWorker::spawn(true, behavior).await;
    let bus = EventBus::new();
    let channel = WorkerChannel::new(
        "/tmp/scripts",
        test_config(addr),
        bus,
        Box::new(DetachedLauncher),
    );

    let result = channel.start_worker().await;

    assert!(result.is_err());
    assert_eq!(channel.state(), ChannelState::Disposed);
}

#[tokio::test]
async fn load_failure_short_circuits_later_invocations() {
    let behavior: Behavior = {
        let mut inner = handshake_behavior(BTreeMap::new());
        Box::new(move |message| match message {
            StreamingMessage::FunctionLoadRequest { function_id, .. } => {
                vec![StreamingMessage::FunctionLoadResponse {
                    function_id: function_id.clone(),
                    result: StatusResult::failure("syntax error"),
                    is_dependency_downloaded: false,
                }]
            }
            other => inner(other),
        })
    };

    let (channel, worker, _bus) =
        started_channel(behavior, vec![http_function("F2", "Broken")]).await;

    // Give the load response time to arrive and attach the dispatcher.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (context, future) = invocation_for("F2", "Broken");
    channel.enqueue(context).unwrap();

    let result = await_result(future).await;
    assert!(matches!(
        result,
        Err(InvocationError::FunctionLoadFailed { message }) if message == "syntax error"
    ));

    // The failed function never saw an invocation request.
    assert!(worker.received(ContentCase::InvocationRequest).is_empty());

    channel.dispose().await;
}

#[tokio::test]
async fn parallelism_is_bounded_by_six() {
    let (channel, worker, _bus) =
        started_channel(handshake_behavior(BTreeMap::new()), vec![http_function("F1", "Held")])
            .await;

    let mut futures = Vec::new();
    for _ in 0..20 {
        let (context, future) = invocation_for("F1", "Held");
        futures.push(future);
        channel.enqueue(context).unwrap();
    }

    // The worker holds every response: the emission count must settle at
    // the dispatcher bound.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let outstanding = worker.received(ContentCase::InvocationRequest);
    assert_eq!(outstanding.len(), 6);

    // Releasing the responses drains the remaining fourteen.
    let mut answered = 0;
    let mut next = 0usize;
    while answered < 20 {
        let requests = worker.received(ContentCase::InvocationRequest);
        for request in &requests[next..] {
            let StreamingMessage::InvocationRequest { invocation_id, .. } = request else {
                continue;
            };
            worker.reply(StreamingMessage::InvocationResponse {
                invocation_id: invocation_id.clone(),
                result: StatusResult::ok(),
                output_data: Vec::new(),
                return_value: Some(TypedData::Int(1)),
            });
            answered += 1;
        }
        next = requests.len();
        if answered < 20 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    for future in futures {
        let outcome = await_result(future).await.unwrap();
        assert_eq!(outcome.return_value, Some(HostValue::Int(1)));
    }

    channel.dispose().await;
}

#[tokio::test]
async fn worker_logs_do_not_disturb_invocations() {
    let (channel, worker, _bus) =
        started_channel(handshake_behavior(BTreeMap::new()), vec![http_function("F1", "Chatty")])
            .await;

    let (context, future) = invocation_for("F1", "Chatty");
    channel.enqueue(context).unwrap();

    // Wait for the request, then log against it while it is in flight,
    // plus one channel-level record with no invocation id.
    let invocation_id = loop {
        let requests = worker.received(ContentCase::InvocationRequest);
        if let Some(StreamingMessage::InvocationRequest { invocation_id, .. }) = requests.first() {
            break invocation_id.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };

    worker.reply(StreamingMessage::RpcLog(RpcLog {
        invocation_id: Some(invocation_id.clone()),
        level: RpcLogLevel::Warning,
        message: "hi".into(),
        exception: None,
    }));
    worker.reply(StreamingMessage::RpcLog(RpcLog {
        invocation_id: None,
        level: RpcLogLevel::Information,
        message: "channel-level".into(),
        exception: None,
    }));
    worker.reply(StreamingMessage::InvocationResponse {
        invocation_id,
        result: StatusResult::ok(),
        output_data: Vec::new(),
        return_value: Some(TypedData::String("done".into())),
    });

    let outcome = await_result(future).await.unwrap();
    assert_eq!(outcome.return_value, Some(HostValue::String("done".into())));

    channel.dispose().await;
}

#[tokio::test]
async fn environment_reload_round_trips() {
    std::env::set_var("GLOSSA_RELOAD_CANARY", "rotated");

    let seen_canary = Arc::new(Mutex::new(false));
    let behavior: Behavior = {
        let mut inner = handshake_behavior(BTreeMap::new());
        let seen_canary = Arc::clone(&seen_canary);
        Box::new(move |message| match message {
            StreamingMessage::FunctionEnvironmentReloadRequest {
                environment_variables,
            } => {
                *seen_canary.lock() = environment_variables
                    .get("GLOSSA_RELOAD_CANARY")
                    .is_some_and(|v| v == "rotated");
                vec![StreamingMessage::FunctionEnvironmentReloadResponse {
                    result: StatusResult::ok(),
                }]
            }
            other => inner(other),
        })
    };

    let (channel, _worker, _bus) = started_channel(behavior, Vec::new()).await;

    let reloaded = channel.reload_environment().await.unwrap();

    assert!(reloaded);
    assert!(*seen_canary.lock());
    assert_eq!(channel.state(), ChannelState::Initialized);

    channel.dispose().await;
}

#[tokio::test]
async fn reload_failure_leaves_channel_usable() {
    let behavior: Behavior = {
        let mut inner = handshake_behavior(BTreeMap::new());
        Box::new(move |message| match message {
            StreamingMessage::FunctionEnvironmentReloadRequest { .. } => {
                vec![StreamingMessage::FunctionEnvironmentReloadResponse {
                    result: StatusResult::failure("permission denied"),
                }]
            }
            other => inner(other),
        })
    };

    let (channel, _worker, _bus) = started_channel(behavior, Vec::new()).await;

    let reloaded = channel.reload_environment().await.unwrap();

    assert!(!reloaded);
    assert_eq!(channel.state(), ChannelState::Initialized);

    channel.dispose().await;
}

#[tokio::test]
async fn worker_crash_fails_in_flight_invocations() {
    let (channel, worker, bus) =
        started_channel(handshake_behavior(BTreeMap::new()), vec![http_function("F1", "Doomed")])
            .await;
    let mut errors = bus.subscribe();

    let (context, future) = invocation_for("F1", "Doomed");
    channel.enqueue(context).unwrap();

    // Wait until the request is on the wire, then kill the worker.
    while worker.received(ContentCase::InvocationRequest).is_empty() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    worker.crash();

    let result = await_result(future).await;
    assert!(matches!(result, Err(InvocationError::TransportLost)));

    loop {
        if matches!(errors.recv().await.unwrap(), BusEvent::WorkerError { .. }) {
            break;
        }
    }

    channel.dispose().await;
}

#[tokio::test]
async fn file_changes_debounce_into_one_restart() {
    let (channel, _worker, bus) =
        started_channel(handshake_behavior(BTreeMap::new()), Vec::new()).await;
    let mut rx = bus.subscribe();

    for i in 0..4 {
        bus.publish(BusEvent::File {
            path: format!("/tmp/scripts/handler_{i}.py").into(),
        });
    }
    bus.publish(BusEvent::File {
        path: "/tmp/scripts/notes.txt".into(),
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut restarts = 0;
    while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        if matches!(event, BusEvent::HostRestart) {
            restarts += 1;
        }
    }
    assert_eq!(restarts, 1);

    channel.dispose().await;
}
