//! Runtime layer errors.
//!
//! Each layer of the runtime owns one error type; all of them implement
//! [`ErrorCode`] for standardized handling by host policy.
//!
//! # Error Codes
//!
//! | Type | Prefix | Recoverable |
//! |------|--------|-------------|
//! | [`ChannelError`] | `CHANNEL_` | timeouts only |
//! | [`TransportError`] | `TRANSPORT_` | connect failures only |
//! | [`DemuxError`] | `DEMUX_` | timeouts only |
//! | [`LaunchError`] | `LAUNCH_` | no |
//! | [`InvocationError`] | `INVOCATION_` | transport loss only |

use glossa_types::{ErrorCode, FunctionId};
use glossa_wire::ConvertError;
use thiserror::Error;

/// Failure of a channel-level operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The worker process could not be launched.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// The transport to the worker failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A handshake subscription timed out or was torn down.
    #[error(transparent)]
    Demux(#[from] DemuxError),

    /// The worker reported a failed initialization.
    #[error("worker init failed: {message}")]
    InitFailed {
        /// Failure message from the worker.
        message: String,
    },

    /// The operation is not valid in the channel's current state.
    #[error("invalid channel state for {operation}: {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the channel was in.
        state: String,
    },

    /// No input queue has been set up for this function.
    #[error("unknown function: {0}")]
    UnknownFunction(FunctionId),
}

impl ErrorCode for ChannelError {
    fn code(&self) -> &'static str {
        match self {
            Self::Launch(_) => "CHANNEL_LAUNCH_FAILED",
            Self::Transport(_) => "CHANNEL_TRANSPORT_FAILED",
            Self::Demux(_) => "CHANNEL_HANDSHAKE_TIMEOUT",
            Self::InitFailed { .. } => "CHANNEL_INIT_FAILED",
            Self::InvalidState { .. } => "CHANNEL_INVALID_STATE",
            Self::UnknownFunction(_) => "CHANNEL_UNKNOWN_FUNCTION",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Restarting the worker may clear timeouts and transport loss.
        matches!(self, Self::Demux(_) | Self::Transport(_))
    }
}

/// Failure of the framed transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// I/O failed on an established stream.
    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// An inbound frame exceeded the decoder limit.
    #[error("frame of {size} bytes exceeds limit of {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    /// A frame could not be decoded or encoded.
    #[error("frame codec failed: {0}")]
    Codec(#[from] serde_json::Error),

    /// The transport has shut down; no more messages can be sent.
    #[error("transport closed")]
    Closed,
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "TRANSPORT_CONNECT_FAILED",
            Self::Io(_) => "TRANSPORT_IO_FAILED",
            Self::FrameTooLarge { .. } => "TRANSPORT_FRAME_TOO_LARGE",
            Self::Codec(_) => "TRANSPORT_CODEC_FAILED",
            Self::Closed => "TRANSPORT_CLOSED",
        }
    }

    fn is_recoverable(&self) -> bool {
        // A fresh worker gets a fresh connection.
        matches!(self, Self::Connect { .. })
    }
}

/// Failure of an inbound subscription.
#[derive(Debug, Error)]
pub enum DemuxError {
    /// No matching message arrived within the subscription's timeout.
    #[error("no {case} within {timeout_ms} ms")]
    Timeout {
        /// Content case the subscription was armed for.
        case: &'static str,
        /// Timeout that elapsed.
        timeout_ms: u128,
    },

    /// The demultiplexer was shut down while the subscription was armed.
    #[error("demultiplexer shut down while waiting for {case}")]
    Shutdown { case: &'static str },
}

impl ErrorCode for DemuxError {
    fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "DEMUX_TIMEOUT",
            Self::Shutdown { .. } => "DEMUX_SHUTDOWN",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Failure to launch the worker process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The executable could not be spawned.
    #[error("spawn of {program} failed: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl ErrorCode for LaunchError {
    fn code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "LAUNCH_SPAWN_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Failure of a single invocation.
///
/// Always scoped to one invocation; never fails the channel.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The function never loaded; the recorded load error is replayed.
    #[error("function failed to load: {message}")]
    FunctionLoadFailed {
        /// Message recorded from the `FunctionLoadResponse`.
        message: String,
    },

    /// The invocation was cancelled before its request was sent.
    #[error("invocation cancelled before dispatch")]
    Cancelled,

    /// The worker executed the function and reported a failure.
    #[error("function failed in worker: {message}")]
    WorkerFailure {
        /// Failure message from the worker.
        message: String,
        /// Worker stack trace, when provided.
        stack_trace: Option<String>,
    },

    /// A value could not cross the wire boundary.
    #[error(transparent)]
    Conversion(#[from] ConvertError),

    /// The request could not be written to the worker.
    #[error(transparent)]
    Send(#[from] TransportError),

    /// The transport failed while the invocation was in flight.
    #[error("worker channel lost while invocation was in flight")]
    TransportLost,
}

impl ErrorCode for InvocationError {
    fn code(&self) -> &'static str {
        match self {
            Self::FunctionLoadFailed { .. } => "INVOCATION_LOAD_FAILED",
            Self::Cancelled => "INVOCATION_CANCELLED",
            Self::WorkerFailure { .. } => "INVOCATION_WORKER_FAILURE",
            Self::Conversion(_) => "INVOCATION_CONVERSION_FAILED",
            Self::Send(_) => "INVOCATION_SEND_FAILED",
            Self::TransportLost => "INVOCATION_TRANSPORT_LOST",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Re-dispatch on a fresh worker may succeed.
        matches!(self, Self::TransportLost | Self::Send(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glossa_types::assert_error_codes;

    #[test]
    fn channel_error_codes() {
        assert_error_codes(
            &[
                ChannelError::InitFailed {
                    message: "x".into(),
                },
                ChannelError::InvalidState {
                    operation: "start",
                    state: "Disposed".into(),
                },
                ChannelError::UnknownFunction(FunctionId::from("f")),
                ChannelError::Transport(TransportError::Closed),
            ],
            "CHANNEL_",
        );
    }

    #[test]
    fn invocation_error_codes() {
        assert_error_codes(
            &[
                InvocationError::Cancelled,
                InvocationError::TransportLost,
                InvocationError::FunctionLoadFailed {
                    message: "x".into(),
                },
                InvocationError::WorkerFailure {
                    message: "x".into(),
                    stack_trace: None,
                },
            ],
            "INVOCATION_",
        );
    }

    #[test]
    fn timeout_is_recoverable() {
        let err = DemuxError::Timeout {
            case: "StartStream",
            timeout_ms: 30_000,
        };
        assert!(err.is_recoverable());
        assert!(ChannelError::from(err).is_recoverable());
    }

    #[test]
    fn init_failure_is_not_recoverable() {
        let err = ChannelError::InitFailed {
            message: "bad runtime".into(),
        };
        assert!(!err.is_recoverable());
    }
}
