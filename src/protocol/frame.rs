//! JSON-RPC 2.0 frame representation, codec, and structural validation.
//!
//! A [`Frame`] is exactly one of a request, a response, or a notification
//! (spec §3 "Frame"). Decoding goes through [`Frame::decode`], which performs
//! the structural checks from §4.A and returns [`ProtocolError::MalformedFrame`]
//! rather than panicking on anything a misbehaving server might send.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ProtocolError;

/// A JSON-RPC request or notification id. MCP servers may use either.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// String id, e.g. `"server-1-42"`.
    Str(String),
    /// Numeric id.
    Num(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Num(n) => write!(f, "{n}"),
        }
    }
}

/// A JSON-RPC error object (spec §3, §6 error codes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Error code (JSON-RPC standard or MCP extension range).
    pub code: i64,
    /// Non-empty human-readable message.
    pub message: String,
    /// Optional structured error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The wire shape every frame deserializes through before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawFrame {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcErrorObject>,
}

/// A single decoded JSON-RPC 2.0 message, classified per spec §3.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A request: has `id` and `method`.
    Request {
        /// Request id, echoed back on the response.
        id: RequestId,
        /// Method name.
        method: String,
        /// Optional parameters.
        params: Option<Value>,
    },
    /// A response: has `id` and exactly one of `result`/`error`.
    Response {
        /// Id matching the originating request.
        id: RequestId,
        /// The outcome — success payload or error object.
        outcome: Result<Value, RpcErrorObject>,
    },
    /// A notification: has `method`, no `id`.
    Notification {
        /// Method name.
        method: String,
        /// Optional parameters.
        params: Option<Value>,
    },
}

const JSONRPC_VERSION: &str = "2.0";

impl Frame {
    /// Build a request frame.
    #[must_use]
    pub fn request(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Request {
            id,
            method: method.into(),
            params,
        }
    }

    /// Build a notification frame.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self::Notification {
            method: method.into(),
            params,
        }
    }

    /// Build a success response frame.
    #[must_use]
    pub fn response_ok(id: RequestId, result: Value) -> Self {
        Self::Response {
            id,
            outcome: Ok(result),
        }
    }

    /// Build an error response frame.
    #[must_use]
    pub fn response_err(id: RequestId, error: RpcErrorObject) -> Self {
        Self::Response {
            id,
            outcome: Err(error),
        }
    }

    /// Decode and structurally validate a single JSON-RPC frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MalformedFrame`] if the bytes aren't valid
    /// JSON, if `jsonrpc` isn't the literal `"2.0"`, or if the frame doesn't
    /// match exactly one of request/response/notification shape.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawFrame = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::MalformedFrame(format!("invalid JSON: {e}")))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawFrame) -> Result<Self, ProtocolError> {
        if raw.jsonrpc != JSONRPC_VERSION {
            return Err(ProtocolError::MalformedFrame(format!(
                "jsonrpc must be \"2.0\", got {:?}",
                raw.jsonrpc
            )));
        }

        let has_result = raw.result.is_some();
        let has_error = raw.error.is_some();

        match (raw.id, raw.method) {
            (Some(id), Some(method)) => {
                if has_result || has_error {
                    return Err(ProtocolError::MalformedFrame(
                        "frame has id+method and result/error; ambiguous shape".into(),
                    ));
                }
                Ok(Self::Request {
                    id,
                    method,
                    params: raw.params,
                })
            },
            (None, Some(method)) => {
                if has_result || has_error {
                    return Err(ProtocolError::MalformedFrame(
                        "notification must not carry result/error".into(),
                    ));
                }
                Ok(Self::Notification {
                    method,
                    params: raw.params,
                })
            },
            (Some(id), None) => match (raw.result, raw.error) {
                (Some(result), None) => Ok(Self::Response {
                    id,
                    outcome: Ok(result),
                }),
                (None, Some(error)) => {
                    if error.message.is_empty() {
                        return Err(ProtocolError::MalformedFrame(
                            "error.message must be non-empty".into(),
                        ));
                    }
                    Ok(Self::Response {
                        id,
                        outcome: Err(error),
                    })
                },
                (None, None) => Err(ProtocolError::MalformedFrame(
                    "response must carry exactly one of result/error".into(),
                )),
                (Some(_), Some(_)) => Err(ProtocolError::MalformedFrame(
                    "response must not carry both result and error".into(),
                )),
            },
            (None, None) => Err(ProtocolError::MalformedFrame(
                "frame has neither id nor method".into(),
            )),
        }
    }

    /// Encode as a single-line UTF-8 JSON document, no trailing newline.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be serialized (should not happen
    /// for well-formed values).
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let raw = match self {
            Self::Request { id, method, params } => RawFrame {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: Some(id.clone()),
                method: Some(method.clone()),
                params: params.clone(),
                result: None,
                error: None,
            },
            Self::Notification { method, params } => RawFrame {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: None,
                method: Some(method.clone()),
                params: params.clone(),
                result: None,
                error: None,
            },
            Self::Response { id, outcome } => {
                let (result, error) = match outcome {
                    Ok(v) => (Some(v.clone()), None),
                    Err(e) => (None, Some(e.clone())),
                };
                RawFrame {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id: Some(id.clone()),
                    method: None,
                    params: None,
                    result,
                    error,
                }
            },
        };
        serde_json::to_vec(&raw)
    }

    /// The frame's `id`, if it has one (requests and responses).
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request { id, .. } | Self::Response { id, .. } => Some(id),
            Self::Notification { .. } => None,
        }
    }
}

/// Split a buffer of newline-delimited JSON into whole lines plus a
/// remainder that hasn't seen a trailing `\n` yet (stdio transport framing,
/// spec §4.A/§6). Empty lines are skipped per spec §6 "Stdio framing".
#[must_use]
pub fn split_lines(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    loop {
        let Some(pos) = buf.iter().position(|&b| b == b'\n') else {
            break;
        };
        let mut line: Vec<u8> = buf.drain(..=pos).collect();
        line.pop(); // drop the '\n'
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    lines
}
