//! Host-side domain values.
//!
//! A [`HostValue`] is what upstream binding providers hand to the channel:
//! already-materialized bytes, scalars, JSON, or an HTTP request snapshot.
//! The converter in [`crate::convert`] maps these to and from the wire's
//! [`TypedData`](crate::TypedData).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value crossing the host-side binding boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostValue {
    /// No value.
    Null,
    /// Raw bytes (streams are materialized upstream).
    Bytes(Vec<u8>),
    /// UTF-8 text.
    String(String),
    /// 64-bit signed integer.
    Int(i64),
    /// Double-precision float.
    Double(f64),
    /// Structured value serialized as JSON on the wire.
    Json(serde_json::Value),
    /// HTTP request snapshot.
    Http(HttpRequestSnapshot),
    /// Homogeneous collection of byte buffers.
    BytesSeq(Vec<Vec<u8>>),
    /// Homogeneous collection of strings.
    StringSeq(Vec<String>),
    /// Homogeneous collection of integers.
    IntSeq(Vec<i64>),
    /// Homogeneous collection of doubles.
    DoubleSeq(Vec<f64>),
}

impl HostValue {
    /// Returns whether this is the null value.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// One claim of an authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Claim type URI or shorthand.
    pub claim_type: String,
    /// Claim value.
    pub value: String,
}

/// An authenticated identity attached to an HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimsIdentity {
    /// Authentication scheme that produced this identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication_type: Option<String>,
    /// Claims carried by the identity.
    pub claims: Vec<Claim>,
}

/// Immutable snapshot of an inbound HTTP request.
///
/// Captured by the HTTP binding before the invocation is enqueued; the
/// converter derives the wire substructure from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequestSnapshot {
    /// Request method.
    pub method: String,
    /// Full request URL.
    pub url: String,
    /// Headers as received (any case).
    pub headers: BTreeMap<String, String>,
    /// Query-string parameters.
    pub query: BTreeMap<String, String>,
    /// Route parameters.
    pub route_params: BTreeMap<String, String>,
    /// Authenticated identities.
    pub identities: Vec<ClaimsIdentity>,
    /// Raw body bytes, empty when the request has no body.
    pub body: Vec<u8>,
}

impl HttpRequestSnapshot {
    /// Creates a bodyless GET snapshot for the given URL.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".into(),
            url: url.into(),
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            route_params: BTreeMap::new(),
            identities: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Sets a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the method and body.
    #[must_use]
    pub fn with_body(mut self, method: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.method = method.into();
        self.body = body.into();
        self
    }

    /// Returns the `content-type` header, case-insensitively.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
    }
}
