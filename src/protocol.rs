//! Wire envelope codec.
//!
//! Requests arrive as UTF-8 JSON objects with two recognized fields: a string
//! `Key` naming the command and an object `Data` carrying its payload.
//! Responses are JSON objects carrying at least an integer-coercible `Status`
//! and a human-readable `Info`. One transport read carries exactly one
//! envelope; there is no length prefix, delimiter, or reassembly.

use serde_json::{Map, Value};
use thiserror::Error;

/// Field holding the command name in a request envelope.
pub const KEY_FIELD: &str = "Key";
/// Field holding the command payload in a request envelope.
pub const DATA_FIELD: &str = "Data";
/// Field holding the numeric status in a response document.
pub const STATUS_FIELD: &str = "Status";
/// Field holding the human-readable summary in a response document.
pub const INFO_FIELD: &str = "Info";

/// Errors raised while decoding envelopes or interpreting response documents.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("malformed response document: {reason}")]
    MalformedResponse { reason: String },

    #[error("response document has no `{STATUS_FIELD}` field")]
    MissingStatus,

    #[error("`{STATUS_FIELD}` value {value} is not coercible to an integer")]
    NonNumericStatus { value: String },

    #[error("failed to encode response document: {reason}")]
    EncodeFailed { reason: String },
}

/// A decoded request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Command name the dispatcher resolves against the registry.
    pub key: String,
    /// Payload handed to the command constructor. Always a JSON object.
    pub data: Value,
}

/// Decode one raw request into an [`Envelope`].
///
/// The bytes must parse as a JSON object with a string `Key` and an object
/// `Data`. Anything else is a [`ProtocolError::MalformedEnvelope`], which the
/// dispatch boundary converts into a structured failure response.
pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedEnvelope {
        reason: e.to_string(),
    })?;

    let object = value.as_object().ok_or_else(|| ProtocolError::MalformedEnvelope {
        reason: "request is not a JSON object".to_string(),
    })?;

    let key = object
        .get(KEY_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::MalformedEnvelope {
            reason: format!("missing or non-string `{KEY_FIELD}` field"),
        })?
        .to_string();

    let data = object
        .get(DATA_FIELD)
        .filter(|candidate| candidate.is_object())
        .cloned()
        .ok_or_else(|| ProtocolError::MalformedEnvelope {
            reason: format!("missing or non-object `{DATA_FIELD}` field"),
        })?;

    Ok(Envelope { key, data })
}

/// Serialize a response document for the wire.
pub fn encode(response: &Value) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(response).map_err(|e| ProtocolError::EncodeFailed {
        reason: e.to_string(),
    })
}

/// Build the minimal response document every command produces.
pub fn response_document(status: i64, info: impl Into<String>) -> Value {
    let mut document = Map::new();
    document.insert(STATUS_FIELD.to_string(), Value::from(status));
    document.insert(INFO_FIELD.to_string(), Value::from(info.into()));
    Value::Object(document)
}

/// Pull the integer status out of an encoded response document.
///
/// `Status` may be a JSON number or a numeric string: `200` and `"200"` both
/// coerce to 200, while `"success"` is a [`ProtocolError::NonNumericStatus`].
/// The HTTP front door uses this to pick the status line for a completed
/// exchange.
pub fn extract_status(bytes: &[u8]) -> Result<i64, ProtocolError> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| ProtocolError::MalformedResponse {
        reason: e.to_string(),
    })?;

    let object = value.as_object().ok_or_else(|| ProtocolError::MalformedResponse {
        reason: "response is not a JSON object".to_string(),
    })?;

    let status = object.get(STATUS_FIELD).ok_or(ProtocolError::MissingStatus)?;
    coerce_status(status)
}

fn coerce_status(value: &Value) -> Result<i64, ProtocolError> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .ok_or_else(|| non_numeric(value)),
        Value::String(text) => text.parse::<i64>().map_err(|_| non_numeric(value)),
        _ => Err(non_numeric(value)),
    }
}

fn non_numeric(value: &Value) -> ProtocolError {
    ProtocolError::NonNumericStatus {
        value: value.to_string(),
    }
}
