//! Typed data: the discriminated-union wire representation of a value.
//!
//! A [`TypedData`] is what actually crosses the worker boundary for
//! trigger metadata, input bindings, output bindings, and return values.
//! JSON payloads travel pre-serialized as strings so the worker decides
//! how to materialize them.

use crate::value::ClaimsIdentity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discriminated union of values crossing the worker boundary.
///
/// Collection variants are only emitted when the worker advertises
/// [`TYPED_DATA_COLLECTION`](crate::TYPED_DATA_COLLECTION).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedData {
    /// Absence of a value.
    None,
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    String(String),
    /// A JSON document, pre-serialized.
    Json(String),
    /// 64-bit signed integer.
    Int(i64),
    /// Double-precision float.
    Double(f64),
    /// HTTP request substructure.
    Http(Box<RpcHttp>),
    /// Collection of byte buffers.
    BytesCollection(Vec<Vec<u8>>),
    /// Collection of strings.
    StringCollection(Vec<String>),
    /// Collection of 64-bit integers.
    IntCollection(Vec<i64>),
    /// Collection of doubles.
    DoubleCollection(Vec<f64>),
}

impl TypedData {
    /// Returns whether this is the empty value.
    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Returns the discriminant name, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::Json(_) => "json",
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Http(_) => "http",
            Self::BytesCollection(_) => "collection_bytes",
            Self::StringCollection(_) => "collection_string",
            Self::IntCollection(_) => "collection_sint64",
            Self::DoubleCollection(_) => "collection_double",
        }
    }
}

impl Default for TypedData {
    fn default() -> Self {
        Self::None
    }
}

/// HTTP request as seen by the worker.
///
/// Header names are lower-cased by the converter so workers can look them
/// up without case folding.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RpcHttp {
    /// Request method (`GET`, `POST`, ...).
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Headers with lower-cased names.
    pub headers: BTreeMap<String, String>,
    /// Query-string parameters.
    pub query: BTreeMap<String, String>,
    /// Route parameters.
    pub params: BTreeMap<String, String>,
    /// Authenticated identities attached to the request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identities: Vec<ClaimsIdentity>,
    /// Body parsed according to content type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Box<TypedData>>,
    /// Unparsed body, populated when the worker asks for raw bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_body: Option<Box<TypedData>>,
}
