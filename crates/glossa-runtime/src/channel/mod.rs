//! The worker channel: lifecycle, registration, and dispatch.
//!
//! A [`WorkerChannel`] is the host's single point of contact with one
//! out-of-process language worker. It owns the worker process handle,
//! the framed transport, the inbound demultiplexer, the function
//! registry with its input queues, and the correlation table of in-flight
//! invocations.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        WorkerChannel                          │
//! │                                                               │
//! │  start_worker() ──► launcher ──► worker process               │
//! │        │                                                      │
//! │        └─► transport ◄──frames──► worker                      │
//! │                 │                                             │
//! │                 ▼ (bus)                                       │
//! │           InboundDemux ──┬─► one-shot: handshake, reload      │
//! │                          └─► continuous: loads, responses,    │
//! │                                          logs                 │
//! │                                                               │
//! │  enqueue() ──► per-function queue ──► dispatcher (≤6) ──►     │
//! │                 transport ──► correlation table ──► promise   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Lifecycle
//!
//! 1. [`WorkerChannel::new()`] — `Default`, demux pumping.
//! 2. [`WorkerChannel::start_worker()`] — launch, connect, handshake;
//!    `Initialized` on success, `Disposed` on startup failure.
//! 3. [`WorkerChannel::setup_invocation_buffers()`] +
//!    [`WorkerChannel::send_function_load_requests()`] — register
//!    functions; each load response attaches that function's dispatcher.
//! 4. [`WorkerChannel::enqueue()`] — callers queue invocations and await
//!    their promises.
//! 5. [`WorkerChannel::reload_environment()`] — `Reloading ⇄ Initialized`.
//! 6. [`WorkerChannel::dispose()`] — terminal teardown, cascading to the
//!    worker process.

mod dispatcher;
mod state;

pub use state::ChannelState;

use crate::bus::{BusEvent, EventBus};
use crate::context::{InvocationContext, InvocationOutcome};
use crate::demux::InboundDemux;
use crate::error::{ChannelError, InvocationError};
use crate::process::{WorkerHandle, WorkerLauncher};
use crate::transport::WorkerTransport;
use crate::watch;
use dashmap::DashMap;
use dispatcher::{DispatcherShared, InFlightMap};
use glossa_types::{ErrorCode, FunctionId, FunctionMetadata, WorkerConfig, WorkerId};
use glossa_wire::{
    from_wire, Capabilities, ContentCase, ParameterBinding, RpcException, RpcLog, RpcLogLevel,
    StatusResult, StreamingMessage, TypedData,
};
use parking_lot::{Mutex, RwLock};
use state::StateCell;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

struct FunctionEntry {
    metadata: Arc<FunctionMetadata>,
    queue_tx: mpsc::UnboundedSender<InvocationContext>,
    /// Parked until the function's load response attaches the dispatcher.
    queue_rx: Option<mpsc::UnboundedReceiver<InvocationContext>>,
}

#[derive(Default)]
struct FunctionRegistry {
    /// Registration order, for load-request emission.
    order: Vec<FunctionId>,
    entries: HashMap<FunctionId, FunctionEntry>,
}

/// Host-side control channel for one language worker.
pub struct WorkerChannel {
    worker_id: WorkerId,
    script_root: PathBuf,
    config: WorkerConfig,
    bus: EventBus,
    launcher: Box<dyn WorkerLauncher>,
    demux: Arc<InboundDemux>,
    state: StateCell,
    capabilities: Arc<Capabilities>,
    transport: RwLock<Option<Arc<WorkerTransport>>>,
    functions: Arc<Mutex<FunctionRegistry>>,
    load_errors: Arc<DashMap<FunctionId, RpcException>>,
    in_flight: Arc<InFlightMap>,
    worker: Mutex<Option<WorkerHandle>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl WorkerChannel {
    /// Creates a channel in `Default` state and starts its demultiplexer.
    #[must_use]
    pub fn new(
        script_root: impl Into<PathBuf>,
        config: WorkerConfig,
        bus: EventBus,
        launcher: Box<dyn WorkerLauncher>,
    ) -> Self {
        let worker_id = WorkerId::new();
        let demux = Arc::new(InboundDemux::start(worker_id.clone(), &bus));

        Self {
            worker_id,
            script_root: script_root.into(),
            config,
            bus,
            launcher,
            demux,
            state: StateCell::new(),
            capabilities: Arc::new(Capabilities::new()),
            transport: RwLock::new(None),
            functions: Arc::new(Mutex::new(FunctionRegistry::default())),
            load_errors: Arc::new(DashMap::new()),
            in_flight: Arc::new(InFlightMap::new()),
            worker: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Returns this channel's worker id.
    #[must_use]
    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state.get()
    }

    /// Returns the capability registry established at handshake.
    #[must_use]
    pub fn capabilities(&self) -> &Arc<Capabilities> {
        &self.capabilities
    }

    /// Launches the worker and runs the init handshake.
    ///
    /// Resolves once the handshake settles. On success the channel is
    /// `Initialized` and its continuous handlers are attached; on any
    /// startup failure a `WorkerError` is published and the channel ends
    /// up `Disposed`.
    ///
    /// # Errors
    ///
    /// Launch, connect, timeout, or a failed `WorkerInitResponse`.
    pub async fn start_worker(&self) -> Result<(), ChannelError> {
        if !self.state.transition(ChannelState::Default, ChannelState::Initializing) {
            return Err(ChannelError::InvalidState {
                operation: "start_worker",
                state: self.state.get().to_string(),
            });
        }
        let started = Instant::now();

        // Armed before launch so an eager worker cannot beat the waiter.
        let start_stream = self
            .demux
            .subscribe_once(ContentCase::StartStream, self.config.startup_timeout());

        let handle = match self
            .launcher
            .launch(&self.worker_id, &self.config, &self.script_root)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return Err(self.fail_startup(ChannelError::from(e)).await),
        };
        *self.worker.lock() = Some(handle);

        let transport = match WorkerTransport::connect(
            self.config.endpoint(),
            self.worker_id.clone(),
            self.config.language().to_string(),
            self.bus.clone(),
            self.config.startup_timeout(),
        )
        .await
        {
            Ok(transport) => Arc::new(transport),
            Err(e) => return Err(self.fail_startup(ChannelError::from(e)).await),
        };
        *self.transport.write() = Some(Arc::clone(&transport));

        if let Err(e) = start_stream.await {
            return Err(self.fail_startup(ChannelError::from(e)).await);
        }
        debug!(worker_id = %self.worker_id, "worker stream started");

        let init_response = self
            .demux
            .subscribe_once(ContentCase::WorkerInitResponse, self.config.init_timeout());

        let init_request = StreamingMessage::WorkerInitRequest {
            host_version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: BTreeMap::new(),
        };
        if let Err(e) = transport.send(init_request).await {
            return Err(self.fail_startup(ChannelError::from(e)).await);
        }

        let response = match init_response.await {
            Ok(response) => response,
            Err(e) => return Err(self.fail_startup(ChannelError::from(e)).await),
        };

        let StreamingMessage::WorkerInitResponse {
            result,
            capabilities,
            worker_version,
        } = response
        else {
            unreachable!("demux routed a non-init message to the init waiter");
        };

        if !result.is_success() {
            let message = result.failure_message().unwrap_or("unspecified").to_string();
            return Err(self.fail_startup(ChannelError::InitFailed { message }).await);
        }

        self.capabilities.update(capabilities);
        let _ = self
            .state
            .transition(ChannelState::Initializing, ChannelState::Initialized);

        info!(
            worker_id = %self.worker_id,
            language = self.config.language(),
            worker_version = worker_version.as_deref(),
            startup_ms = started.elapsed().as_millis() as u64,
            "worker initialized"
        );

        self.attach_handlers(transport);
        Ok(())
    }

    /// Installs an empty input queue per function.
    ///
    /// Idempotent per function id: re-entry replaces the queue, so it
    /// must not be called again while that function has work in flight.
    pub fn setup_invocation_buffers(
        &self,
        functions: impl IntoIterator<Item = FunctionMetadata>,
    ) {
        let mut registry = self.functions.lock();
        for metadata in functions {
            let function_id = metadata.function_id.clone();
            let (queue_tx, queue_rx) = mpsc::unbounded_channel();
            let entry = FunctionEntry {
                metadata: Arc::new(metadata),
                queue_tx,
                queue_rx: Some(queue_rx),
            };
            if registry.entries.insert(function_id.clone(), entry).is_none() {
                registry.order.push(function_id);
            }
        }
    }

    /// Writes one `FunctionLoadRequest` per registered function, in
    /// registration order, without awaiting responses.
    ///
    /// # Errors
    ///
    /// [`ChannelError::InvalidState`] before the handshake completes;
    /// transport failure while writing.
    pub async fn send_function_load_requests(&self) -> Result<(), ChannelError> {
        let transport = self.transport_or_invalid("send_function_load_requests")?;

        let requests: Vec<StreamingMessage> = {
            let registry = self.functions.lock();
            registry
                .order
                .iter()
                .filter_map(|id| registry.entries.get(id))
                .map(|entry| StreamingMessage::FunctionLoadRequest {
                    function_id: entry.metadata.function_id.clone(),
                    metadata: (*entry.metadata).clone(),
                    managed_dependency_enabled: self.config.managed_dependencies(),
                })
                .collect()
        };

        for request in requests {
            transport.send(request).await.map_err(ChannelError::from)?;
        }
        Ok(())
    }

    /// Hands an invocation context to its function's input queue.
    ///
    /// # Errors
    ///
    /// [`ChannelError::UnknownFunction`] when no buffer was set up for
    /// the context's function.
    pub fn enqueue(&self, context: InvocationContext) -> Result<(), ChannelError> {
        let function_id = context.metadata.function_id.clone();
        let registry = self.functions.lock();
        let Some(entry) = registry.entries.get(&function_id) else {
            return Err(ChannelError::UnknownFunction(function_id));
        };
        entry
            .queue_tx
            .send(context)
            .map_err(|_| ChannelError::InvalidState {
                operation: "enqueue",
                state: self.state.get().to_string(),
            })
    }

    /// Replaces the worker's environment with a snapshot of the host's.
    ///
    /// Supports secret rotation without restarting the worker. Returns
    /// whether the worker accepted the new environment; the channel is
    /// `Initialized` again either way.
    ///
    /// # Errors
    ///
    /// [`ChannelError::InvalidState`] outside `Initialized`; timeout or
    /// transport failure during the exchange.
    pub async fn reload_environment(&self) -> Result<bool, ChannelError> {
        let transport = self.transport_or_invalid("reload_environment")?;
        if !self
            .state
            .transition(ChannelState::Initialized, ChannelState::Reloading)
        {
            return Err(ChannelError::InvalidState {
                operation: "reload_environment",
                state: self.state.get().to_string(),
            });
        }

        let response = self.demux.subscribe_once(
            ContentCase::FunctionEnvironmentReloadResponse,
            self.config.reload_timeout(),
        );

        let request = StreamingMessage::FunctionEnvironmentReloadRequest {
            environment_variables: std::env::vars().collect(),
        };

        let outcome = async {
            transport.send(request).await.map_err(ChannelError::from)?;
            response.await.map_err(ChannelError::from)
        }
        .await;

        // The channel stays usable whether the reload settled or not.
        let _ = self
            .state
            .transition(ChannelState::Reloading, ChannelState::Initialized);

        let StreamingMessage::FunctionEnvironmentReloadResponse { result } = outcome? else {
            unreachable!("demux routed a non-reload message to the reload waiter");
        };

        if !result.is_success() {
            warn!(
                worker_id = %self.worker_id,
                error = result.failure_message().unwrap_or("unspecified"),
                "environment reload rejected by worker"
            );
        }
        Ok(result.is_success())
    }

    /// Tears the channel down.
    ///
    /// Subscriptions are released, pump tasks stopped, input queues
    /// closed, and the worker process killed. Invocations still enqueued
    /// or in flight are abandoned: their promises resolve with a closed
    /// channel, not a fabricated result.
    pub async fn dispose(&self) {
        info!(worker_id = %self.worker_id, "disposing worker channel");
        self.state.dispose();
        self.cancel.cancel();
        self.demux.shutdown();

        if let Some(transport) = self.transport.write().take() {
            transport.shutdown();
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        {
            let mut registry = self.functions.lock();
            registry.entries.clear();
            registry.order.clear();
        }
        self.in_flight.clear();

        let handle = self.worker.lock().take();
        if let Some(mut handle) = handle {
            handle.kill().await;
        }
    }

    /// Publishes the startup failure, tears the channel down, and
    /// returns the error for the caller's promise.
    async fn fail_startup(&self, error: ChannelError) -> ChannelError {
        error!(worker_id = %self.worker_id, error = %error, "worker startup failed");
        self.bus.publish(BusEvent::WorkerError {
            language: self.config.language().to_string(),
            worker_id: self.worker_id.clone(),
            code: error.code(),
            error: error.to_string(),
        });
        self.dispose().await;
        error
    }

    fn transport_or_invalid(
        &self,
        operation: &'static str,
    ) -> Result<Arc<WorkerTransport>, ChannelError> {
        self.transport
            .read()
            .clone()
            .ok_or(ChannelError::InvalidState {
                operation,
                state: self.state.get().to_string(),
            })
    }

    /// Spawns the continuous inbound handlers and the file watcher.
    fn attach_handlers(&self, transport: Arc<WorkerTransport>) {
        let shared = DispatcherShared {
            transport,
            capabilities: Arc::clone(&self.capabilities),
            in_flight: Arc::clone(&self.in_flight),
            load_errors: Arc::clone(&self.load_errors),
        };

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(handle_load_responses(
            self.demux.subscribe_stream(ContentCase::FunctionLoadResponse),
            Arc::clone(&self.functions),
            self.config.dispatch_parallelism(),
            shared,
        )));
        tasks.push(tokio::spawn(handle_invocation_responses(
            self.demux.subscribe_stream(ContentCase::InvocationResponse),
            Arc::clone(&self.in_flight),
        )));
        tasks.push(tokio::spawn(handle_logs(
            self.demux.subscribe_stream(ContentCase::RpcLog),
            Arc::clone(&self.in_flight),
            self.worker_id.clone(),
        )));
        tasks.push(tokio::spawn(fail_in_flight_on_worker_error(
            self.bus.subscribe(),
            self.worker_id.clone(),
            Arc::clone(&self.in_flight),
            self.cancel.clone(),
        )));
        tasks.push(tokio::spawn(watch::run(
            self.bus.clone(),
            self.config.clone(),
            self.cancel.clone(),
        )));
    }
}

/// Records load failures and attaches each function's dispatcher.
///
/// The dispatcher is attached on success and failure alike; contexts
/// drained after a failure short-circuit to the recorded load error.
async fn handle_load_responses(
    mut rx: mpsc::UnboundedReceiver<StreamingMessage>,
    functions: Arc<Mutex<FunctionRegistry>>,
    parallelism: usize,
    shared: DispatcherShared,
) {
    while let Some(message) = rx.recv().await {
        let StreamingMessage::FunctionLoadResponse {
            function_id,
            result,
            is_dependency_downloaded,
        } = message
        else {
            continue;
        };

        let (name, queue_rx) = {
            let mut registry = functions.lock();
            let Some(entry) = registry.entries.get_mut(&function_id) else {
                warn!(function_id = %function_id, "load response for unregistered function");
                continue;
            };
            (entry.metadata.name.clone(), entry.queue_rx.take())
        };

        if result.is_success() {
            info!(
                function = %name,
                function_id = %function_id,
                dependencies_downloaded = is_dependency_downloaded,
                "function loaded"
            );
        } else {
            let exception = result
                .exception
                .unwrap_or_else(|| RpcException::new("unspecified load failure"));
            warn!(
                function = %name,
                function_id = %function_id,
                error = %exception,
                "function load failed"
            );
            shared.load_errors.insert(function_id.clone(), exception);
        }

        match queue_rx {
            Some(queue_rx) => {
                tokio::spawn(dispatcher::run(
                    function_id,
                    queue_rx,
                    parallelism,
                    shared.clone(),
                ));
            }
            // Duplicate response; the dispatcher is already attached.
            None => debug!(function_id = %function_id, "dispatcher already attached"),
        }
    }
}

/// Correlates `InvocationResponse`s back to their waiting promises.
async fn handle_invocation_responses(
    mut rx: mpsc::UnboundedReceiver<StreamingMessage>,
    in_flight: Arc<InFlightMap>,
) {
    while let Some(message) = rx.recv().await {
        let StreamingMessage::InvocationResponse {
            invocation_id,
            result,
            output_data,
            return_value,
        } = message
        else {
            continue;
        };

        // Absent entries are duplicates or post-disposal strays.
        let Some((_, entry)) = in_flight.remove(&invocation_id) else {
            debug!(invocation_id = %invocation_id, "response without in-flight invocation");
            continue;
        };

        if result.is_success() {
            entry.complete(materialize_outcome(output_data, return_value));
        } else {
            entry.complete(Err(worker_failure(result)));
        }
    }
}

fn materialize_outcome(
    output_data: Vec<ParameterBinding>,
    return_value: Option<TypedData>,
) -> Result<InvocationOutcome, InvocationError> {
    let mut outputs = BTreeMap::new();
    for binding in output_data {
        outputs.insert(binding.name, from_wire(binding.data)?);
    }
    let return_value = return_value.map(from_wire).transpose()?;
    Ok(InvocationOutcome {
        outputs,
        return_value,
    })
}

fn worker_failure(result: StatusResult) -> InvocationError {
    let (message, stack_trace) = match result.exception {
        Some(exception) => (exception.message, exception.stack_trace),
        None => ("unspecified invocation failure".to_string(), None),
    };
    InvocationError::WorkerFailure {
        message,
        stack_trace,
    }
}

/// Routes worker log records.
///
/// Records carrying an in-flight invocation id replay inside that
/// invocation's captured span; everything else is channel-level. Log
/// handling never completes or fails an invocation.
async fn handle_logs(
    mut rx: mpsc::UnboundedReceiver<StreamingMessage>,
    in_flight: Arc<InFlightMap>,
    worker_id: WorkerId,
) {
    while let Some(message) = rx.recv().await {
        let StreamingMessage::RpcLog(log) = message else {
            continue;
        };

        let span = log
            .invocation_id
            .as_ref()
            .and_then(|id| in_flight.get(id))
            .map(|entry| entry.context.span.clone());

        match span {
            Some(span) => span.in_scope(|| emit_worker_log(&log)),
            None => {
                let span = tracing::info_span!("worker", worker_id = %worker_id);
                span.in_scope(|| emit_worker_log(&log));
            }
        }
    }
}

fn emit_worker_log(log: &RpcLog) {
    let exception = log.exception.as_ref().map(|e| e.message.as_str());
    match log.level {
        RpcLogLevel::Trace => trace!(target: "glossa::worker", exception, "{}", log.message),
        RpcLogLevel::Debug => debug!(target: "glossa::worker", exception, "{}", log.message),
        RpcLogLevel::Information => info!(target: "glossa::worker", exception, "{}", log.message),
        RpcLogLevel::Warning => warn!(target: "glossa::worker", exception, "{}", log.message),
        RpcLogLevel::Error | RpcLogLevel::Critical => {
            error!(target: "glossa::worker", exception, "{}", log.message);
        }
    }
}

/// Fails every in-flight invocation when this worker's transport dies.
///
/// Queued contexts that never reached the transport are left to the
/// disposal path; only correlated invocations get the distinguished
/// transport error.
async fn fail_in_flight_on_worker_error(
    mut rx: tokio::sync::broadcast::Receiver<BusEvent>,
    worker_id: WorkerId,
    in_flight: Arc<InFlightMap>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => return,
            event = rx.recv() => event,
        };

        match event {
            Ok(BusEvent::WorkerError { worker_id: id, .. }) if id == worker_id => {
                let ids: Vec<_> = in_flight.iter().map(|e| e.key().clone()).collect();
                if !ids.is_empty() {
                    warn!(
                        worker_id = %worker_id,
                        abandoned = ids.len(),
                        "failing in-flight invocations after transport loss"
                    );
                }
                for id in ids {
                    if let Some((_, entry)) = in_flight.remove(&id) {
                        entry.complete(Err(InvocationError::TransportLost));
                    }
                }
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}
