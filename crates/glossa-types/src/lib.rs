//! Core types for the glossa worker runtime.
//!
//! This crate provides the foundational types shared by the wire and
//! runtime layers of glossa, the host-side control channel for
//! out-of-process language workers.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Shared Types Layer                       │
//! │  (SemVer stable, safe to depend on)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  glossa-types   : ids, metadata, config, ErrorCode ◄── HERE  │
//! │  glossa-wire    : StreamingMessage, TypedData, converter     │
//! └─────────────────────────────────────────────────────────────┘
//!                               ↓
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Runtime Layer                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  glossa-runtime : bus, demux, transport, worker channel      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Identifier Design
//!
//! Worker, function, and invocation identifiers are opaque strings on the
//! wire. Freshly minted identifiers are UUID-backed so they are globally
//! unique without coordination, but any non-empty string received from a
//! collaborator round-trips unchanged.
//!
//! # Example
//!
//! ```
//! use glossa_types::{FunctionId, InvocationId, WorkerId};
//!
//! let worker = WorkerId::new();
//! let func = FunctionId::from("HttpTrigger1");
//! let invocation = InvocationId::new();
//!
//! assert_ne!(invocation, InvocationId::new());
//! assert_eq!(func.as_str(), "HttpTrigger1");
//! let _ = worker;
//! ```

mod config;
mod error;
mod id;
mod metadata;

pub use config::WorkerConfig;
pub use error::{assert_error_codes, ErrorCode};
pub use id::{FunctionId, InvocationId, WorkerId};
pub use metadata::{BindingDirection, BindingInfo, FunctionMetadata};
