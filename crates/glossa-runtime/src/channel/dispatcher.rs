//! Per-function bounded dispatcher.
//!
//! One dispatcher consumes one function's input queue. The queue itself
//! is unbounded FIFO; a semaphore bounds the number of invocations in
//! flight, so at most `parallelism` requests per function are
//! outstanding at any time. A permit is taken before a context leaves
//! the queue and rides in the correlation table until the response
//! handler completes the invocation, at which point it frees a slot.
//! Requests may be reordered across the permit holders.
//!
//! The dispatcher is only attached after the function's load response has
//! been observed, which is what keeps any `InvocationRequest` from
//! preceding its `FunctionLoadResponse`.

use crate::context::InvocationContext;
use crate::error::InvocationError;
use crate::transport::WorkerTransport;
use dashmap::DashMap;
use glossa_types::{FunctionId, InvocationId};
use glossa_wire::message::ParameterBinding;
use glossa_wire::{to_wire, Capabilities, RpcException, StreamingMessage};
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// A correlation-table entry: the context plus the dispatch slot it
/// occupies until its promise completes.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub context: InvocationContext,
    _permit: Option<OwnedSemaphorePermit>,
}

impl InFlight {
    /// Completes the invocation and frees the dispatch slot.
    pub(crate) fn complete(self, result: crate::context::InvocationResult) {
        self.context.complete(result);
    }
}

/// Correlation table shared between dispatchers and response handling.
pub(crate) type InFlightMap = DashMap<InvocationId, InFlight>;

/// Shared state the dispatcher needs on the hot path.
#[derive(Clone)]
pub(crate) struct DispatcherShared {
    pub transport: Arc<WorkerTransport>,
    pub capabilities: Arc<Capabilities>,
    pub in_flight: Arc<InFlightMap>,
    pub load_errors: Arc<DashMap<FunctionId, RpcException>>,
}

/// Consumes `queue` for `function_id` until the queue closes.
pub(crate) async fn run(
    function_id: FunctionId,
    mut queue: mpsc::UnboundedReceiver<InvocationContext>,
    parallelism: usize,
    shared: DispatcherShared,
) {
    let semaphore = Arc::new(Semaphore::new(parallelism));
    debug!(function_id = %function_id, parallelism, "dispatcher attached");

    while let Some(context) = queue.recv().await {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let function_id = function_id.clone();
        let shared = shared.clone();
        tokio::spawn(dispatch_one(function_id, context, permit, shared));
    }

    debug!(function_id = %function_id, "dispatcher detached");
}

/// Decision tree for one dequeued context.
async fn dispatch_one(
    function_id: FunctionId,
    context: InvocationContext,
    permit: OwnedSemaphorePermit,
    shared: DispatcherShared,
) {
    if let Some(load_error) = shared.load_errors.get(&function_id) {
        let message = load_error.message.clone();
        drop(load_error);
        context.complete(Err(InvocationError::FunctionLoadFailed { message }));
        return;
    }

    if context.cancellation.is_cancelled() {
        debug!(invocation_id = %context.invocation_id, "cancelled before dispatch");
        context.complete(Err(InvocationError::Cancelled));
        return;
    }

    let invocation_id = context.invocation_id.clone();
    let request = build_request(&function_id, &context, &shared.capabilities);

    // The response handler owns completion, and thereby the permit,
    // from here on.
    shared.in_flight.insert(
        invocation_id.clone(),
        InFlight {
            context,
            _permit: Some(permit),
        },
    );

    if let Err(error) = shared.transport.send(request).await {
        warn!(invocation_id = %invocation_id, error = %error, "invocation request send failed");
        if let Some((_, entry)) = shared.in_flight.remove(&invocation_id) {
            entry.complete(Err(InvocationError::Send(error)));
        }
    }
}

fn build_request(
    function_id: &FunctionId,
    context: &InvocationContext,
    capabilities: &Capabilities,
) -> StreamingMessage {
    let trigger_metadata = context
        .trigger_metadata
        .iter()
        .map(|(name, value)| (name.clone(), to_wire(value, capabilities)))
        .collect();

    let input_data = context
        .inputs
        .iter()
        .map(|(name, value)| ParameterBinding {
            name: name.clone(),
            data: to_wire(value, capabilities),
        })
        .collect();

    StreamingMessage::InvocationRequest {
        invocation_id: context.invocation_id.clone(),
        function_id: function_id.clone(),
        trigger_metadata,
        input_data,
    }
}
