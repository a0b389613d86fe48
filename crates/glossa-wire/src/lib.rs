//! Wire layer for glossa workers.
//!
//! This crate models the streaming message set exchanged with a language
//! worker and the typed-data representation of values crossing the
//! boundary. Message schema generation is an external concern; the
//! messages here are the host-side model, carried over the runtime's
//! framed transport.
//!
//! # Message Flow
//!
//! ```text
//! worker ──StartStream──────────────────────► host
//! host   ──WorkerInitRequest────────────────► worker
//! worker ──WorkerInitResponse (capabilities)─► host
//! host   ──FunctionLoadRequest (per fn)─────► worker
//! worker ──FunctionLoadResponse─────────────► host
//! host   ──InvocationRequest────────────────► worker
//! worker ──InvocationResponse / RpcLog──────► host
//! host   ──FunctionEnvironmentReloadRequest─► worker
//! worker ──FunctionEnvironmentReloadResponse► host
//! ```
//!
//! # Layers
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`message`] | [`StreamingMessage`] content cases and status results |
//! | [`typed_data`] | [`TypedData`] discriminated union and HTTP substructure |
//! | [`value`] | Host-side [`HostValue`] domain values |
//! | [`convert`] | Stateless `HostValue ↔ TypedData` mapping |
//! | [`capability`] | Worker capability registry established at handshake |

pub mod capability;
pub mod convert;
pub mod message;
pub mod typed_data;
pub mod value;

pub use capability::{Capabilities, RAW_HTTP_BODY_BYTES, TYPED_DATA_COLLECTION};
pub use convert::{from_wire, to_wire, ConvertError};
pub use message::{
    ContentCase, ParameterBinding, RpcException, RpcLog, RpcLogLevel, StatusResult,
    StreamingMessage,
};
pub use typed_data::{RpcHttp, TypedData};
pub use value::{ClaimsIdentity, HostValue, HttpRequestSnapshot};
