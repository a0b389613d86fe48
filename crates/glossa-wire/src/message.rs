//! Streaming message content cases.
//!
//! Every frame on the worker stream is one [`StreamingMessage`]; the
//! variant is the content case the demultiplexer routes on. Routing
//! subscribes by [`ContentCase`], so a subscription never has to pattern
//! match the full payload.
//!
//! # Direction
//!
//! | Direction | Case |
//! |-----------|------|
//! | worker → host | `StartStream`, `WorkerInitResponse`, `FunctionLoadResponse`, `InvocationResponse`, `FunctionEnvironmentReloadResponse`, `RpcLog` |
//! | host → worker | `WorkerInitRequest`, `FunctionLoadRequest`, `InvocationRequest`, `FunctionEnvironmentReloadRequest` |

use crate::typed_data::TypedData;
use glossa_types::{FunctionId, FunctionMetadata, InvocationId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of a worker-side operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Failure detail, present when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<RpcException>,
}

impl StatusResult {
    /// A successful result.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            exception: None,
        }
    }

    /// A failed result carrying `message`.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            exception: Some(RpcException::new(message)),
        }
    }

    /// Returns whether the operation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Returns the failure message, if any.
    #[must_use]
    pub fn failure_message(&self) -> Option<&str> {
        self.exception.as_ref().map(|e| e.message.as_str())
    }
}

/// Worker-side exception detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcException {
    /// Human-readable message.
    pub message: String,
    /// Worker-provided stack trace, when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Origin of the exception within the worker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl RpcException {
    /// Creates an exception with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
            source: None,
        }
    }

    /// Attaches a stack trace.
    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

impl std::fmt::Display for RpcException {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Severity of a worker log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RpcLogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

/// A log record emitted by the worker.
///
/// When `invocation_id` is set the record belongs to that invocation and
/// is replayed under the invocation's captured span; otherwise it is a
/// channel-level record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcLog {
    /// Owning invocation, when the record is invocation-scoped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
    /// Severity.
    pub level: RpcLogLevel,
    /// Message text.
    pub message: String,
    /// Worker-side exception attached to the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<RpcException>,
}

/// A named value crossing the invocation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinding {
    /// Binding name.
    pub name: String,
    /// Bound value.
    pub data: TypedData,
}

/// One frame on the worker stream.
///
/// The serialized form tags each frame with its content case, mirroring a
/// discriminated union: `{"StartStream": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamingMessage {
    /// Worker is connected and ready for the init request.
    StartStream {
        /// Id the worker was launched with.
        worker_id: WorkerId,
    },

    /// Host → worker: begin initialization.
    WorkerInitRequest {
        /// Version of the host.
        host_version: String,
        /// Capabilities the host supports, as a probe.
        capabilities: BTreeMap<String, String>,
    },

    /// Worker → host: initialization outcome and worker capabilities.
    WorkerInitResponse {
        result: StatusResult,
        /// Capabilities advertised by the worker; merged into the
        /// channel's capability registry on success.
        capabilities: BTreeMap<String, String>,
        /// Version of the worker runtime, when reported.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_version: Option<String>,
    },

    /// Host → worker: register one function.
    FunctionLoadRequest {
        function_id: FunctionId,
        metadata: FunctionMetadata,
        /// Whether the worker should resolve managed dependencies.
        managed_dependency_enabled: bool,
    },

    /// Worker → host: outcome of one function load.
    FunctionLoadResponse {
        function_id: FunctionId,
        result: StatusResult,
        /// Whether the worker downloaded managed dependencies.
        is_dependency_downloaded: bool,
    },

    /// Host → worker: execute one invocation.
    InvocationRequest {
        invocation_id: InvocationId,
        function_id: FunctionId,
        /// Trigger metadata mapped through the value converter.
        trigger_metadata: BTreeMap<String, TypedData>,
        /// Input parameter bindings in declaration order.
        input_data: Vec<ParameterBinding>,
    },

    /// Worker → host: outcome of one invocation.
    InvocationResponse {
        invocation_id: InvocationId,
        result: StatusResult,
        /// Output parameter bindings.
        output_data: Vec<ParameterBinding>,
        /// Function return value.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        return_value: Option<TypedData>,
    },

    /// Host → worker: replace the worker's environment variables.
    FunctionEnvironmentReloadRequest {
        environment_variables: BTreeMap<String, String>,
    },

    /// Worker → host: outcome of the environment reload.
    FunctionEnvironmentReloadResponse { result: StatusResult },

    /// Worker → host: a log record.
    RpcLog(RpcLog),
}

impl StreamingMessage {
    /// Returns the content case used for routing.
    #[must_use]
    pub fn content_case(&self) -> ContentCase {
        match self {
            Self::StartStream { .. } => ContentCase::StartStream,
            Self::WorkerInitRequest { .. } => ContentCase::WorkerInitRequest,
            Self::WorkerInitResponse { .. } => ContentCase::WorkerInitResponse,
            Self::FunctionLoadRequest { .. } => ContentCase::FunctionLoadRequest,
            Self::FunctionLoadResponse { .. } => ContentCase::FunctionLoadResponse,
            Self::InvocationRequest { .. } => ContentCase::InvocationRequest,
            Self::InvocationResponse { .. } => ContentCase::InvocationResponse,
            Self::FunctionEnvironmentReloadRequest { .. } => {
                ContentCase::FunctionEnvironmentReloadRequest
            }
            Self::FunctionEnvironmentReloadResponse { .. } => {
                ContentCase::FunctionEnvironmentReloadResponse
            }
            Self::RpcLog(_) => ContentCase::RpcLog,
        }
    }
}

/// Routing key for demultiplexer subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentCase {
    StartStream,
    WorkerInitRequest,
    WorkerInitResponse,
    FunctionLoadRequest,
    FunctionLoadResponse,
    InvocationRequest,
    InvocationResponse,
    FunctionEnvironmentReloadRequest,
    FunctionEnvironmentReloadResponse,
    RpcLog,
}

impl ContentCase {
    /// Returns the display name of this case.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::StartStream => "StartStream",
            Self::WorkerInitRequest => "WorkerInitRequest",
            Self::WorkerInitResponse => "WorkerInitResponse",
            Self::FunctionLoadRequest => "FunctionLoadRequest",
            Self::FunctionLoadResponse => "FunctionLoadResponse",
            Self::InvocationRequest => "InvocationRequest",
            Self::InvocationResponse => "InvocationResponse",
            Self::FunctionEnvironmentReloadRequest => "FunctionEnvironmentReloadRequest",
            Self::FunctionEnvironmentReloadResponse => "FunctionEnvironmentReloadResponse",
            Self::RpcLog => "RpcLog",
        }
    }
}

impl std::fmt::Display for ContentCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
