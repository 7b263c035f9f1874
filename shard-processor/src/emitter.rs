use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::error::SinkError;
use crate::sink::{Payload, Sink};

pub const DATA: &str = "data";
pub const LOG_INFO: &str = "log.info";
pub const LOG_ERROR: &str = "log.error";
pub const LOG_CRITICAL: &str = "log.critical";

/// Shard-scoped handle on a `Sink`.
///
/// Every event is tagged `<prefix>.<shard id>.<category>`. Log events are best effort: a sink
/// failure while logging is reported through `tracing` and otherwise ignored.
pub struct Emitter<S> {
    sink: S,
    shard_id: String,
    tag_base: String,
    local_logging: bool,
}

impl<S: Sink + Send + Sync> Emitter<S> {
    pub fn new(sink: S, tag_prefix: &str, shard_id: &str, local_logging: bool) -> Self {
        Self {
            sink,
            shard_id: shard_id.to_owned(),
            tag_base: format!("{}.{}", tag_prefix, shard_id),
            local_logging,
        }
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn tag(&self, category: &str) -> String {
        format!("{}.{}", self.tag_base, category)
    }

    /// Forward a record payload. Unlike log events, the result is returned to the caller.
    pub async fn data(&self, payload: Payload) -> Result<(), SinkError> {
        self.sink.emit(&self.tag(DATA), payload).await
    }

    pub async fn info(&self, msg: &str) {
        if self.local_logging {
            info!(shard_id = %self.shard_id, "{}", msg);
        }
        self.log(LOG_INFO, json!({ "msg": msg })).await;
    }

    pub async fn error(&self, msg: &str) {
        self.error_event(json!({ "msg": msg })).await;
    }

    /// Emit an error event with a caller-built body, which must carry a `msg` field.
    pub async fn error_event(&self, body: Value) {
        if self.local_logging {
            error!(shard_id = %self.shard_id, event = %body, "{}", message_of(&body));
        }
        self.log(LOG_ERROR, body).await;
    }

    pub async fn critical(&self, msg: &str) {
        if self.local_logging {
            error!(shard_id = %self.shard_id, critical = true, "{}", msg);
        }
        self.log(LOG_CRITICAL, json!({ "msg": msg })).await;
    }

    /// Wait for buffered events to reach the sink. Failures are logged, not returned.
    pub async fn flush(&self) {
        if let Err(e) = self.sink.flush().await {
            warn!(shard_id = %self.shard_id, "failed to flush sink: {}", e);
        }
    }

    async fn log(&self, category: &str, body: Value) {
        let tag = self.tag(category);
        if let Err(e) = self.sink.emit(&tag, Payload::Structured(body)).await {
            metrics::counter!("shard_processor_log_events_dropped_total").increment(1);
            warn!(shard_id = %self.shard_id, tag = %tag, "failed to emit log event: {}", e);
        }
    }
}

fn message_of(body: &Value) -> &str {
    body.get("msg").and_then(Value::as_str).unwrap_or_default()
}
