//! Per-invocation context.
//!
//! An [`InvocationContext`] is the bag carried through the function's
//! input queue: inputs, trigger metadata, a cancellation token, the
//! captured span for log replay, and a result promise completable exactly
//! once. The caller keeps the matching [`ResultFuture`] and awaits it.

use crate::error::InvocationError;
use glossa_types::{FunctionMetadata, InvocationId};
use glossa_wire::HostValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Materialized result of a successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationOutcome {
    /// Output binding values by name.
    pub outputs: BTreeMap<String, HostValue>,
    /// Function return value, when the function produced one.
    pub return_value: Option<HostValue>,
}

/// Completion side of an invocation's promise.
pub type InvocationResult = Result<InvocationOutcome, InvocationError>;

/// Caller side of an invocation's promise.
///
/// Resolves with the invocation result, or with a receive error when the
/// channel abandoned the invocation at disposal.
pub type ResultFuture = oneshot::Receiver<InvocationResult>;

/// Everything the channel needs to dispatch one invocation.
#[derive(Debug)]
pub struct InvocationContext {
    /// Unique within the channel; keys the correlation table.
    pub invocation_id: InvocationId,
    /// Metadata of the invoked function.
    pub metadata: Arc<FunctionMetadata>,
    /// Named input values, in binding declaration order.
    pub inputs: Vec<(String, HostValue)>,
    /// Trigger metadata by name.
    pub trigger_metadata: BTreeMap<String, HostValue>,
    /// Cancellation is honored until the request is sent.
    pub cancellation: CancellationToken,
    /// Span captured at creation; worker logs replay inside it.
    pub span: Span,
    result_tx: Option<oneshot::Sender<InvocationResult>>,
}

impl InvocationContext {
    /// Creates a context and the caller's future for its result.
    ///
    /// The current span is captured so worker-emitted logs for this
    /// invocation land in the caller's scope.
    #[must_use]
    pub fn new(
        metadata: Arc<FunctionMetadata>,
        inputs: Vec<(String, HostValue)>,
        trigger_metadata: BTreeMap<String, HostValue>,
    ) -> (Self, ResultFuture) {
        let (result_tx, result_rx) = oneshot::channel();
        let context = Self {
            invocation_id: InvocationId::new(),
            metadata,
            inputs,
            trigger_metadata,
            cancellation: CancellationToken::new(),
            span: Span::current(),
            result_tx: Some(result_tx),
        };
        (context, result_rx)
    }

    /// Replaces the cancellation token with the caller's own.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Completes the promise.
    ///
    /// Consuming `self` makes double-completion unrepresentable; a result
    /// for a caller that stopped waiting is discarded.
    pub fn complete(mut self, result: InvocationResult) {
        if let Some(tx) = self.result_tx.take() {
            let _ = tx.send(result);
        }
    }
}
