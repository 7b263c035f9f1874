use async_trait::async_trait;
use tracing::info;

use crate::error::SinkError;
use crate::sink::{Payload, Sink};

/// Writes every event to the log instead of a real transport.
pub struct PrintSink {}

#[async_trait]
impl Sink for PrintSink {
    async fn emit(&self, tag: &str, payload: Payload) -> Result<(), SinkError> {
        match payload {
            Payload::Structured(value) => info!(tag, "event: {}", value),
            Payload::Raw(bytes) => info!(tag, "raw event: {:?}", bytes),
        }
        metrics::counter!("shard_processor_print_sink_events_total").increment(1);

        Ok(())
    }
}
