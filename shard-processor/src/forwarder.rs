use std::time;

use tracing::warn;

use crate::decoder::DecodedRecord;
use crate::emitter::Emitter;
use crate::error::StopProcessing;
use crate::sink::Sink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardPolicy {
    /// Consecutive sink failures tolerated before processing stops.
    pub max_consecutive_failures: u32,
    /// Pause after a failed forward, before the next record is attempted.
    pub failure_backoff: time::Duration,
    /// How long a stopped processor stalls, leaving the host to reassign the shard.
    pub halt_stall: time::Duration,
}

impl Default for ForwardPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 10,
            failure_backoff: time::Duration::from_secs(1),
            halt_stall: time::Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Forwards decoded records to the sink and trips once it keeps failing.
pub struct SinkForwarder {
    policy: ForwardPolicy,
    consecutive_failures: u32,
    halted: bool,
}

impl SinkForwarder {
    pub fn new(policy: ForwardPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            halted: false,
        }
    }

    pub fn policy(&self) -> &ForwardPolicy {
        &self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Emit `record` to the sink, returning whether it was delivered.
    ///
    /// A failed delivery is followed by the configured back-off. Failing more than
    /// `max_consecutive_failures` times in a row returns `StopProcessing`, as does every call
    /// after that.
    pub async fn forward<S>(
        &mut self,
        emitter: &Emitter<S>,
        record: &DecodedRecord,
    ) -> Result<bool, StopProcessing>
    where
        S: Sink + Send + Sync,
    {
        if self.halted {
            return Err(self.stop());
        }

        match emitter.data(record.payload()).await {
            Ok(()) => {
                self.consecutive_failures = 0;
                metrics::counter!("shard_processor_records_forwarded_total").increment(1);
                Ok(true)
            }
            Err(e) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                metrics::counter!("shard_processor_sink_failures_total").increment(1);
                warn!(
                    shard_id = emitter.shard_id(),
                    consecutive_failures = self.consecutive_failures,
                    "failed to forward record: {}",
                    e
                );

                if self.consecutive_failures > self.policy.max_consecutive_failures {
                    self.halted = true;
                    metrics::counter!("shard_processor_halted_total").increment(1);
                    return Err(self.stop());
                }

                tokio::time::sleep(self.policy.failure_backoff).await;
                Ok(false)
            }
        }
    }

    fn stop(&self) -> StopProcessing {
        StopProcessing {
            consecutive_failures: self.consecutive_failures,
        }
    }
}
