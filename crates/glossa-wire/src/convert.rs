//! Stateless value conversion between [`HostValue`] and [`TypedData`].
//!
//! The converter is a pure boundary mapping: it holds no state and takes
//! the capability registry only to decide which optional wire features to
//! emit. JSON is parsed without any date coercion; date-like strings stay
//! strings unless the recipient parses them itself.

use crate::capability::{Capabilities, RAW_HTTP_BODY_BYTES, TYPED_DATA_COLLECTION};
use crate::typed_data::{RpcHttp, TypedData};
use crate::value::{HostValue, HttpRequestSnapshot};
use thiserror::Error;

/// Conversion failure, isolated to one value.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The wire carried a JSON document that does not parse.
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Maps a host value to its wire representation.
///
/// - Scalars map to their direct variants.
/// - Homogeneous sequences map to collection variants when the worker
///   advertises [`TYPED_DATA_COLLECTION`], and are JSON-serialized
///   otherwise.
/// - HTTP snapshots map to the [`RpcHttp`] substructure.
/// - Structured values are JSON-serialized; a value that cannot be
///   serialized falls back to its string rendering.
/// - Null maps to the empty value.
#[must_use]
pub fn to_wire(value: &HostValue, caps: &Capabilities) -> TypedData {
    match value {
        HostValue::Null => TypedData::None,
        HostValue::Bytes(b) => TypedData::Bytes(b.clone()),
        HostValue::String(s) => TypedData::String(s.clone()),
        HostValue::Int(i) => TypedData::Int(*i),
        HostValue::Double(d) => TypedData::Double(*d),
        HostValue::Json(v) => match serde_json::to_string(v) {
            Ok(json) => TypedData::Json(json),
            Err(_) => TypedData::String(v.to_string()),
        },
        HostValue::Http(req) => TypedData::Http(Box::new(http_to_wire(req, caps))),
        HostValue::BytesSeq(items) => {
            if caps.enabled(TYPED_DATA_COLLECTION) {
                TypedData::BytesCollection(items.clone())
            } else {
                json_fallback(items)
            }
        }
        HostValue::StringSeq(items) => {
            if caps.enabled(TYPED_DATA_COLLECTION) {
                TypedData::StringCollection(items.clone())
            } else {
                json_fallback(items)
            }
        }
        HostValue::IntSeq(items) => {
            if caps.enabled(TYPED_DATA_COLLECTION) {
                TypedData::IntCollection(items.clone())
            } else {
                json_fallback(items)
            }
        }
        HostValue::DoubleSeq(items) => {
            if caps.enabled(TYPED_DATA_COLLECTION) {
                TypedData::DoubleCollection(items.clone())
            } else {
                json_fallback(items)
            }
        }
    }
}

/// Maps a wire value back to a host value, selecting by discriminant.
pub fn from_wire(data: TypedData) -> Result<HostValue, ConvertError> {
    Ok(match data {
        TypedData::None => HostValue::Null,
        TypedData::Bytes(b) => HostValue::Bytes(b),
        TypedData::String(s) => HostValue::String(s),
        TypedData::Int(i) => HostValue::Int(i),
        TypedData::Double(d) => HostValue::Double(d),
        TypedData::Json(json) => HostValue::Json(serde_json::from_str(&json)?),
        TypedData::Http(http) => HostValue::Http(http_from_wire(*http)),
        TypedData::BytesCollection(items) => HostValue::BytesSeq(items),
        TypedData::StringCollection(items) => HostValue::StringSeq(items),
        TypedData::IntCollection(items) => HostValue::IntSeq(items),
        TypedData::DoubleCollection(items) => HostValue::DoubleSeq(items),
    })
}

fn json_fallback<T: serde::Serialize>(value: &T) -> TypedData {
    match serde_json::to_string(value) {
        Ok(json) => TypedData::Json(json),
        Err(_) => TypedData::None,
    }
}

/// Builds the HTTP substructure from a request snapshot.
///
/// Header names are lower-cased; the body is parsed according to the
/// request's content type; raw bytes ride along iff the worker advertises
/// [`RAW_HTTP_BODY_BYTES`], otherwise the raw slot carries the UTF-8
/// decoding of the bytes.
fn http_to_wire(req: &HttpRequestSnapshot, caps: &Capabilities) -> RpcHttp {
    let headers = req
        .headers
        .iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect();

    let body = if req.body.is_empty() {
        None
    } else {
        Some(Box::new(parse_body(&req.body, req.content_type())))
    };

    let raw_body = if req.body.is_empty() {
        None
    } else if caps.enabled(RAW_HTTP_BODY_BYTES) {
        Some(Box::new(TypedData::Bytes(req.body.clone())))
    } else {
        Some(Box::new(TypedData::String(
            String::from_utf8_lossy(&req.body).into_owned(),
        )))
    };

    RpcHttp {
        method: req.method.clone(),
        url: req.url.clone(),
        headers,
        query: req.query.clone(),
        params: req.route_params.clone(),
        identities: req.identities.clone(),
        body,
        raw_body,
    }
}

/// Parses an HTTP body per content type.
///
/// JSON content types produce a JSON value with a string fallback when the
/// document does not parse; octet-stream and multipart bodies stay bytes;
/// everything else is treated as text.
fn parse_body(body: &[u8], content_type: Option<&str>) -> TypedData {
    let media_type = content_type
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if media_type == "application/json" || media_type.ends_with("+json") {
        let text = String::from_utf8_lossy(body).into_owned();
        return match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(_) => TypedData::Json(text),
            Err(_) => TypedData::String(text),
        };
    }

    if media_type == "application/octet-stream" || media_type.starts_with("multipart/") {
        return TypedData::Bytes(body.to_vec());
    }

    TypedData::String(String::from_utf8_lossy(body).into_owned())
}

/// Best-effort reverse of the HTTP substructure.
fn http_from_wire(http: RpcHttp) -> HttpRequestSnapshot {
    let body = match http.raw_body.or(http.body) {
        Some(data) => match *data {
            TypedData::Bytes(b) => b,
            TypedData::String(s) | TypedData::Json(s) => s.into_bytes(),
            _ => Vec::new(),
        },
        None => Vec::new(),
    };

    HttpRequestSnapshot {
        method: http.method,
        url: http.url,
        headers: http.headers,
        query: http.query,
        route_params: http.params,
        identities: http.identities,
        body,
    }
}
