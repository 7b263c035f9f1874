use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::SinkError;

/// An event body handed to a `Sink`.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A structured value, serialized by the sink.
    Structured(Value),
    /// Bytes passed through untouched, used when a record payload could not be decoded.
    Raw(Bytes),
}

impl Payload {
    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Payload::Structured(value) => Some(value),
            Payload::Raw(_) => None,
        }
    }

    /// Serialize into the bytes a transport would put on the wire.
    pub fn to_bytes(&self) -> Result<Bytes, SinkError> {
        match self {
            Payload::Structured(value) => Ok(Bytes::from(serde_json::to_vec(value)?)),
            Payload::Raw(bytes) => Ok(bytes.clone()),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Structured(value)
    }
}

/// Destination for decoded records and log events.
///
/// `tag` identifies the category of the event, e.g. `kcl.sid-000.data` or `kcl.sid-000.log.error`.
#[async_trait]
pub trait Sink {
    async fn emit(&self, tag: &str, payload: Payload) -> Result<(), SinkError>;

    /// Deliver anything buffered. Sinks that send synchronously have nothing to do.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
