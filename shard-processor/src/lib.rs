//! Per-shard stream record processor.
//!
//! A host process that owns shard leases drives a processor through three calls:
//! `initialize` once, `process_records` any number of times, then `shutdown` once.
//! Each record payload is decoded and forwarded to a [`sink::Sink`], and progress is
//! periodically persisted through the host's [`checkpoint::Checkpointer`].
//!
//! None of the lifecycle calls return an error: every failure is reported through the
//! sink's log events (and `tracing`, when local logging is enabled).

pub mod checkpoint;
pub mod config;
pub mod decoder;
pub mod emitter;
pub mod error;
pub mod forwarder;
pub mod processor;
pub mod sequence;
pub mod sink;
pub mod sinks;
pub mod test_utils;

pub use checkpoint::{CheckpointController, CheckpointOutcome, CheckpointPolicy, Checkpointer};
pub use config::Config;
pub use error::{CheckpointError, RecordError, SinkError};
pub use processor::{Lifecycle, RawRecord, RecordProcessor, ShardProcessor, ShutdownReason};
pub use sequence::{SequenceNumber, SequenceTracker};
pub use sink::{Payload, Sink};
