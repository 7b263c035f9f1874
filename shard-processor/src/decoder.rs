use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;
use serde_json::{json, Value};

use crate::sequence::SequenceNumber;
use crate::sink::Payload;

/// Field holding the originating sequence number of a decoded record.
pub const SEQUENCE_FIELD: &str = "_seq";
/// Field holding the normalized shard id of a decoded record.
pub const SHARD_FIELD: &str = "_shd";

/// The outcome of decoding one record payload. Decoding never drops a record.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedRecord {
    /// A JSON object, augmented with the sequence number and shard id.
    Structured(Value),
    /// The original bytes, with the reason they could not be decoded.
    Undecodable { raw: Bytes, diagnostic: Diagnostic },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub message: String,
    pub payload: Bytes,
}

impl Diagnostic {
    /// Body of the error event reporting this failure.
    ///
    /// Payloads that are not UTF-8 are base64 encoded, flagged by `data_encoding`.
    pub fn to_event(&self) -> Value {
        match std::str::from_utf8(&self.payload) {
            Ok(text) => json!({
                "msg": self.message,
                "data": text,
            }),
            Err(_) => json!({
                "msg": self.message,
                "data": BASE64_STANDARD.encode(&self.payload),
                "data_encoding": "base64",
            }),
        }
    }
}

impl DecodedRecord {
    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            DecodedRecord::Structured(_) => None,
            DecodedRecord::Undecodable { diagnostic, .. } => Some(diagnostic),
        }
    }

    /// The payload forwarded to the sink for this record.
    pub fn payload(&self) -> Payload {
        match self {
            DecodedRecord::Structured(value) => Payload::Structured(value.clone()),
            DecodedRecord::Undecodable { raw, .. } => Payload::Raw(raw.clone()),
        }
    }
}

/// Decode a record payload as a UTF-8 JSON object and tag it with its origin.
///
/// Payload fields named like the injected ones are overwritten.
pub fn decode(raw: Bytes, shard_id: &str, sequence_number: &SequenceNumber) -> DecodedRecord {
    match try_decode(&raw) {
        Ok(mut object) => {
            object.insert(
                SEQUENCE_FIELD.to_owned(),
                Value::String(sequence_number.to_string()),
            );
            object.insert(SHARD_FIELD.to_owned(), Value::String(shard_id.to_owned()));
            DecodedRecord::Structured(Value::Object(object))
        }
        Err(message) => DecodedRecord::Undecodable {
            diagnostic: Diagnostic {
                message,
                payload: raw.clone(),
            },
            raw,
        },
    }
}

fn try_decode(raw: &[u8]) -> Result<serde_json::Map<String, Value>, String> {
    let text = std::str::from_utf8(raw).map_err(|e| e.to_string())?;

    match serde_json::from_str::<Value>(text).map_err(|e| e.to_string())? {
        Value::Object(object) => Ok(object),
        other => Err(format!(
            "expected a JSON object but found {}",
            json_type_name(&other)
        )),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
