use std::fmt;
use std::str::FromStr;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use bytes::Bytes;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::checkpoint::{CheckpointController, CheckpointPolicy, Checkpointer};
use crate::config::Config;
use crate::decoder;
use crate::emitter::Emitter;
use crate::error::{RecordError, StopProcessing};
use crate::forwarder::{ForwardPolicy, SinkForwarder};
use crate::sequence::{SequenceNumber, SequenceTracker};
use crate::sink::Sink;

/// A record as delivered by the host: base64 data and a decimal sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub data: String,
    pub partition_key: String,
    pub sequence_number: String,
}

/// Why the host is shutting a processor down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ShutdownReason {
    /// The shard has been fully consumed, checkpoint at the end of it.
    #[serde(rename = "TERMINATE")]
    Terminate,
    /// The lease was lost to another worker, which must not be raced with a checkpoint.
    #[serde(rename = "ZOMBIE")]
    Zombie,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::Terminate => "TERMINATE",
            ShutdownReason::Zombie => "ZOMBIE",
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("{0} is not a valid shutdown reason")]
pub struct ParseShutdownReasonError(String);

impl FromStr for ShutdownReason {
    type Err = ParseShutdownReasonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TERMINATE" => Ok(ShutdownReason::Terminate),
            "ZOMBIE" => Ok(ShutdownReason::Zombie),
            invalid => Err(ParseShutdownReasonError(invalid.to_owned())),
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of an initialized processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    /// The sink circuit breaker tripped, records are no longer processed.
    Halted,
}

/// Shard ids are reported with this prefix shortened.
const SHARD_ID_PREFIX: &str = "shardId";
const SHORT_SHARD_ID_PREFIX: &str = "sid";

pub fn normalize_shard_id(shard_id: &str) -> String {
    shard_id.replace(SHARD_ID_PREFIX, SHORT_SHARD_ID_PREFIX)
}

/// A processor that has not been assigned a shard yet.
///
/// `initialize` consumes it and returns the `ShardProcessor` that accepts records, so records can
/// never reach a processor that has no shard.
pub struct RecordProcessor<S> {
    sink: S,
    tag_prefix: String,
    local_logging: bool,
    checkpoint_policy: CheckpointPolicy,
    forward_policy: ForwardPolicy,
}

impl<S: Sink + Send + Sync> RecordProcessor<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            tag_prefix: "kcl".to_owned(),
            local_logging: true,
            checkpoint_policy: CheckpointPolicy::default(),
            forward_policy: ForwardPolicy::default(),
        }
    }

    pub fn from_config(config: &Config, sink: S) -> Self {
        Self::new(sink)
            .tag_prefix(&config.tag_prefix)
            .local_logging(config.local_logging)
            .checkpoint_policy(config.checkpoint_policy())
            .forward_policy(config.forward_policy())
    }

    pub fn tag_prefix(mut self, tag_prefix: &str) -> Self {
        self.tag_prefix = tag_prefix.to_owned();
        self
    }

    pub fn local_logging(mut self, local_logging: bool) -> Self {
        self.local_logging = local_logging;
        self
    }

    pub fn checkpoint_policy(mut self, policy: CheckpointPolicy) -> Self {
        self.checkpoint_policy = policy;
        self
    }

    pub fn forward_policy(mut self, policy: ForwardPolicy) -> Self {
        self.forward_policy = policy;
        self
    }

    /// Take ownership of `shard_id`. Called once by the host, before any records are delivered.
    pub async fn initialize(self, shard_id: &str) -> ShardProcessor<S> {
        let shard_id = normalize_shard_id(shard_id);
        let emitter = Emitter::new(self.sink, &self.tag_prefix, &shard_id, self.local_logging);

        emitter.info("processor initialized").await;

        ShardProcessor {
            emitter,
            tracker: SequenceTracker::new(),
            forwarder: SinkForwarder::new(self.forward_policy),
            controller: CheckpointController::new(self.checkpoint_policy),
        }
    }
}

#[derive(Error, Debug)]
enum BatchError {
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error(transparent)]
    Stopped(#[from] StopProcessing),
}

/// Processes the records of one shard and checkpoints its progress.
pub struct ShardProcessor<S> {
    emitter: Emitter<S>,
    tracker: SequenceTracker,
    forwarder: SinkForwarder,
    controller: CheckpointController,
}

impl<S: Sink + Send + Sync> ShardProcessor<S> {
    pub fn shard_id(&self) -> &str {
        self.emitter.shard_id()
    }

    pub fn state(&self) -> Lifecycle {
        if self.forwarder.is_halted() {
            Lifecycle::Halted
        } else {
            Lifecycle::Active
        }
    }

    /// Largest sequence number processed so far.
    pub fn high_water_mark(&self) -> Option<&SequenceNumber> {
        self.tracker.current()
    }

    pub fn sink(&self) -> &S {
        self.emitter.sink()
    }

    /// Decode and forward `records` in order, then checkpoint if the checkpoint interval elapsed.
    ///
    /// Never fails: a record that cannot be read abandons the rest of the batch (and this cycle's
    /// checkpoint), and a sink that keeps failing halts the processor.
    pub async fn process_records<C>(&mut self, records: &[RawRecord], checkpointer: &mut C)
    where
        C: Checkpointer + Send,
    {
        self.emitter
            .info(&format!("processing {} records", records.len()))
            .await;

        match self.process_batch(records).await {
            Ok(()) => self.emitter.info("processing done").await,
            Err(BatchError::Stopped(stop)) => {
                self.emitter
                    .critical(&format!("{}, stalling until the shard is reassigned", stop))
                    .await;
                tokio::time::sleep(self.forwarder.policy().halt_stall).await;
            }
            Err(BatchError::Record(e)) => {
                self.emitter
                    .error(&format!("failed to process records, abandoning batch: {}", e))
                    .await;
                return;
            }
        }

        self.controller
            .checkpoint_if_due(checkpointer, self.tracker.current(), &self.emitter)
            .await;
    }

    async fn process_batch(&mut self, records: &[RawRecord]) -> Result<(), BatchError> {
        if self.forwarder.is_halted() {
            return Err(BatchError::Stopped(StopProcessing {
                consecutive_failures: self.forwarder.consecutive_failures(),
            }));
        }

        for record in records {
            let data = BASE64_STANDARD
                .decode(&record.data)
                .map_err(RecordError::from)?;
            let sequence_number: SequenceNumber = record.sequence_number.parse()?;
            debug!(
                shard_id = self.emitter.shard_id(),
                partition_key = %record.partition_key,
                sequence_number = sequence_number.as_str(),
                "processing record"
            );

            let decoded =
                decoder::decode(Bytes::from(data), self.emitter.shard_id(), &sequence_number);
            metrics::counter!("shard_processor_records_total").increment(1);

            let forwarded = self.forwarder.forward(&self.emitter, &decoded).await;

            // Reported even when forwarding tripped the breaker.
            if let Some(diagnostic) = decoded.diagnostic() {
                metrics::counter!("shard_processor_records_decode_failed_total").increment(1);
                self.emitter.error_event(diagnostic.to_event()).await;
            }

            forwarded?;
            self.tracker.observe(&sequence_number);
        }

        Ok(())
    }

    /// Release the shard. Consumes the processor: nothing can be called after shutdown.
    pub async fn shutdown<C>(self, checkpointer: &mut C, reason: ShutdownReason)
    where
        C: Checkpointer + Send,
    {
        self.emitter
            .critical(&format!("shutdown for {}", reason))
            .await;

        match reason {
            ShutdownReason::Terminate => {
                self.emitter
                    .critical("Was told to terminate, will attempt to checkpoint.")
                    .await;
                // Without a sequence number, the checkpoint lands on the largest one delivered.
                self.controller
                    .checkpoint(checkpointer, None, &self.emitter)
                    .await;
            }
            ShutdownReason::Zombie => {
                self.emitter
                    .critical("Shutting down due to failover. Will not checkpoint.")
                    .await;
            }
        }

        self.emitter.flush().await;
    }
}
