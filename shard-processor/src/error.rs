use thiserror::Error;

/// Enumeration of the failures a `Checkpointer` can report.
///
/// Translating a backend's own error representation into one of these variants is the
/// responsibility of whoever implements `Checkpointer`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// Another worker holds the lease for this shard.
    #[error("lease for the shard is held by another worker")]
    Shutdown,
    /// The coordination backend is overloaded.
    #[error("checkpoint backend is throttling requests")]
    Throttling,
    /// The coordinator cannot accept a checkpoint right now.
    #[error("coordinator reported an invalid state while checkpointing")]
    InvalidState,
    #[error("checkpoint failed: {0}")]
    Other(String),
}

impl CheckpointError {
    /// Label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CheckpointError::Shutdown => "shutdown",
            CheckpointError::Throttling => "throttling",
            CheckpointError::InvalidState => "invalid_state",
            CheckpointError::Other(_) => "other",
        }
    }
}

/// Enumeration of errors returned by a `Sink` when emitting an event.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink is unavailable: {0}")]
    Unavailable(String),
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Enumeration of unexpected per-record faults. Any of these aborts the rest of the batch.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("record data is not valid base64: {0}")]
    InvalidData(#[from] base64::DecodeError),
    #[error("{0} is not a valid sequence number")]
    InvalidSequenceNumber(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("checkpoint retries must be at least 1")]
    NoCheckpointRetries,
    #[error(
        "checkpoint interval of {interval_ms}ms must be at least {minimum_ms}ms, 3x the sink failure detection window"
    )]
    CheckpointIntervalTooShort { interval_ms: u128, minimum_ms: u128 },
    #[error("sink failure backoff times the tolerated failures is too large to represent")]
    SinkFailureWindowOverflow,
}

/// Raised once the sink has failed more consecutive times than allowed.
/// Record processing stops for the rest of the processor's lifetime.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("sink failed {consecutive_failures} consecutive times, stopping record processing")]
pub struct StopProcessing {
    pub consecutive_failures: u32,
}
