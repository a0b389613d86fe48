//! Worker channel runtime for glossa.
//!
//! This crate is the host side of the control channel to an
//! out-of-process language worker: it owns the worker's lifecycle,
//! registers user functions with it, and dispatches invocations under a
//! bounded concurrency policy while correlating asynchronous responses
//! back to their waiting callers.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                              Host                                │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │                         EventBus                           │  │
//! │  │   Inbound / WorkerError / HostRestart / File               │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! │        ▲                    │                                    │
//! │        │ republish          │ filter by worker id                │
//! │  ┌───────────┐       ┌──────────────┐      ┌──────────────────┐  │
//! │  │ Transport │       │ InboundDemux │      │  file debounce   │  │
//! │  │ (framed)  │       │ (one-shot /  │      │  (300 ms quiet)  │  │
//! │  │           │       │  continuous) │      └──────────────────┘  │
//! │  └─────┬─────┘       └──────┬───────┘                            │
//! │        │                    │                                    │
//! │  ┌─────▼────────────────────▼───────────────────────────────┐    │
//! │  │                     WorkerChannel                        │    │
//! │  │  state machine · function registry · input queues ·      │    │
//! │  │  dispatcher (≤6 per function) · correlation table        │    │
//! │  └──────────────────────────────────────────────────────────┘    │
//! │        │                                                         │
//! │        ▼ spawn / kill                                            │
//! │   worker process (one per channel)                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`WorkerChannel`] | Lifecycle, registration, and dispatch for one worker |
//! | [`EventBus`] | Process-wide typed publish/subscribe fabric |
//! | [`InboundDemux`] | Per-channel routing of inbound messages with timed subscriptions |
//! | [`WorkerTransport`] | One long-lived framed stream to the worker |
//! | [`InvocationContext`] | Per-invocation bag with a one-shot result promise |
//! | [`WorkerLauncher`] | Spawning-policy seam; [`ProcessLauncher`] is the default |
//!
//! # Example
//!
//! ```no_run
//! use glossa_runtime::{EventBus, ProcessLauncher, WorkerChannel};
//! use glossa_types::{FunctionId, FunctionMetadata, WorkerConfig};
//!
//! # async fn example() -> Result<(), glossa_runtime::ChannelError> {
//! let bus = EventBus::new();
//! let launcher = ProcessLauncher::new("/usr/bin/python-worker");
//! let channel = WorkerChannel::new(
//!     "/home/site/wwwroot",
//!     WorkerConfig::new("python", [".py"]),
//!     bus,
//!     Box::new(launcher),
//! );
//!
//! channel.start_worker().await?;
//! channel.setup_invocation_buffers([
//!     FunctionMetadata::new(FunctionId::from("f1"), "HttpTrigger1"),
//! ]);
//! channel.send_function_load_requests().await?;
//! # Ok(())
//! # }
//! ```

mod bus;
mod channel;
mod context;
mod demux;
mod error;
mod process;
mod transport;
mod watch;

pub use bus::{BusEvent, EventBus};
pub use channel::{ChannelState, WorkerChannel};
pub use context::{InvocationContext, InvocationOutcome, InvocationResult, ResultFuture};
pub use demux::InboundDemux;
pub use error::{ChannelError, DemuxError, InvocationError, LaunchError, TransportError};
pub use process::{
    ProcessLauncher, WorkerHandle, WorkerLauncher, ENV_WORKER_ENDPOINT, ENV_WORKER_ID,
};
pub use transport::{read_frame, write_frame, WorkerTransport, MAX_FRAME_BYTES};
