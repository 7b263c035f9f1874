use std::time;

use async_trait::async_trait;
use tracing::debug;

use crate::emitter::Emitter;
use crate::error::CheckpointError;
use crate::sequence::SequenceNumber;
use crate::sink::Sink;

/// Persists shard progress with the lease coordinator.
///
/// `None` checkpoints at the largest sequence number the coordinator has handed to this worker.
#[async_trait]
pub trait Checkpointer {
    async fn checkpoint(&mut self, sequence_number: Option<&str>) -> Result<(), CheckpointError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPolicy {
    /// Total attempts per checkpoint, including the first.
    pub retries: u32,
    /// Delay between two attempts.
    pub retry_interval: time::Duration,
    /// Minimum time between two checkpoints triggered by `process_records`.
    pub interval: time::Duration,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            retries: 5,
            retry_interval: time::Duration::from_secs(5),
            interval: time::Duration::from_secs(60),
        }
    }
}

/// How a checkpoint ended. Reported for observability only: checkpointing never fails its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Succeeded { attempts: u32 },
    /// The lease belongs to another worker, retrying would race with it.
    Fenced { attempts: u32 },
    /// Gave up for this cycle, the next scheduled checkpoint starts a fresh budget.
    Exhausted { attempts: u32 },
}

impl CheckpointOutcome {
    fn label(&self) -> &'static str {
        match self {
            CheckpointOutcome::Succeeded { .. } => "succeeded",
            CheckpointOutcome::Fenced { .. } => "fenced",
            CheckpointOutcome::Exhausted { .. } => "exhausted",
        }
    }
}

/// Retries checkpoints against a fallible coordinator and decides when to stop.
pub struct CheckpointController {
    policy: CheckpointPolicy,
    last_checkpoint: tokio::time::Instant,
}

impl CheckpointController {
    pub fn new(policy: CheckpointPolicy) -> Self {
        Self {
            policy,
            last_checkpoint: tokio::time::Instant::now(),
        }
    }

    pub fn policy(&self) -> &CheckpointPolicy {
        &self.policy
    }

    /// Whether enough time has passed since the last checkpoint attempt to try another one.
    pub fn is_due(&self) -> bool {
        self.last_checkpoint.elapsed() > self.policy.interval
    }

    /// Checkpoint if the interval has elapsed, then restart the interval whatever the outcome.
    pub async fn checkpoint_if_due<C, S>(
        &mut self,
        checkpointer: &mut C,
        sequence_number: Option<&SequenceNumber>,
        emitter: &Emitter<S>,
    ) -> Option<CheckpointOutcome>
    where
        C: Checkpointer + Send,
        S: Sink + Send + Sync,
    {
        if !self.is_due() {
            return None;
        }

        let outcome = self
            .checkpoint(
                checkpointer,
                sequence_number.map(SequenceNumber::as_str),
                emitter,
            )
            .await;
        self.last_checkpoint = tokio::time::Instant::now();

        Some(outcome)
    }

    /// Checkpoint at `sequence_number`, retrying transient failures up to the policy's budget.
    ///
    /// The retry interval is only waited between two attempts: once the last attempt fails,
    /// whatever the error, the checkpoint is abandoned without a final sleep.
    pub async fn checkpoint<C, S>(
        &self,
        checkpointer: &mut C,
        sequence_number: Option<&str>,
        emitter: &Emitter<S>,
    ) -> CheckpointOutcome
    where
        C: Checkpointer + Send,
        S: Sink + Send + Sync,
    {
        let outcome = self.attempt_checkpoint(checkpointer, sequence_number, emitter).await;

        metrics::counter!("shard_processor_checkpoints_total", "outcome" => outcome.label())
            .increment(1);

        outcome
    }

    async fn attempt_checkpoint<C, S>(
        &self,
        checkpointer: &mut C,
        sequence_number: Option<&str>,
        emitter: &Emitter<S>,
    ) -> CheckpointOutcome
    where
        C: Checkpointer + Send,
        S: Sink + Send + Sync,
    {
        let retries = self.policy.retries.max(1);
        let delay = self.policy.retry_interval;

        for attempt in 0..retries {
            debug!(
                shard_id = emitter.shard_id(),
                attempt,
                sequence_number = sequence_number.unwrap_or("latest"),
                "checkpointing"
            );

            let error = match checkpointer.checkpoint(sequence_number).await {
                Ok(()) => {
                    emitter.info("checkpoint success").await;
                    return CheckpointOutcome::Succeeded {
                        attempts: attempt + 1,
                    };
                }
                Err(error) => error,
            };

            metrics::counter!(
                "shard_processor_checkpoint_attempts_total",
                "error" => error.kind()
            )
            .increment(1);

            let is_last_attempt = attempt + 1 == retries;

            match error {
                CheckpointError::Shutdown => {
                    emitter
                        .error("Encountered shutdown exception, skipping checkpoint")
                        .await;
                    return CheckpointOutcome::Fenced {
                        attempts: attempt + 1,
                    };
                }
                CheckpointError::Throttling if is_last_attempt => {
                    emitter
                        .error(&format!(
                            "Failed to checkpoint after {} attempts, giving up.",
                            attempt + 1
                        ))
                        .await;
                    return CheckpointOutcome::Exhausted {
                        attempts: attempt + 1,
                    };
                }
                CheckpointError::Throttling => {
                    emitter
                        .error(&format!(
                            "Was throttled while checkpointing, will attempt again in {} seconds",
                            delay.as_secs_f64()
                        ))
                        .await;
                }
                CheckpointError::InvalidState => {
                    emitter
                        .error("Coordinator reported an invalid state while checkpointing.")
                        .await;
                }
                CheckpointError::Other(message) => {
                    emitter
                        .error(&format!(
                            "Encountered an error while checkpointing, error was {}.",
                            message
                        ))
                        .await;
                }
            }

            if !is_last_attempt {
                tokio::time::sleep(delay).await;
            }
        }

        emitter
            .error(&format!(
                "Failed to checkpoint after {} attempts, giving up.",
                retries
            ))
            .await;
        CheckpointOutcome::Exhausted { attempts: retries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemorySink, ScriptedCheckpointer};

    const D: time::Duration = time::Duration::from_secs(5);

    fn controller() -> CheckpointController {
        CheckpointController::new(CheckpointPolicy::default())
    }

    fn emitter(sink: &MemorySink) -> Emitter<MemorySink> {
        Emitter::new(sink.clone(), "kcl", "sid-1", false)
    }

    fn error_messages(sink: &MemorySink) -> Vec<String> {
        sink.events_with_tag("kcl.sid-1.log.error")
            .iter()
            .map(|payload| {
                payload.as_structured().expect("structured")["msg"]
                    .as_str()
                    .expect("msg is a string")
                    .to_owned()
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_success_on_first_attempt() {
        let sink = MemorySink::new();
        let mut checkpointer = ScriptedCheckpointer::new(vec![Ok(())]);
        let start = tokio::time::Instant::now();

        let outcome = controller()
            .checkpoint(&mut checkpointer, Some("101"), &emitter(&sink))
            .await;

        assert_eq!(outcome, CheckpointOutcome::Succeeded { attempts: 1 });
        assert_eq!(checkpointer.calls(), vec![Some("101".to_owned())]);
        assert_eq!(start.elapsed(), time::Duration::ZERO);
        assert_eq!(sink.events_with_tag("kcl.sid-1.log.info").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_then_success() {
        let sink = MemorySink::new();
        let mut checkpointer = ScriptedCheckpointer::new(vec![
            Err(CheckpointError::Throttling),
            Err(CheckpointError::Throttling),
            Err(CheckpointError::Throttling),
            Err(CheckpointError::Throttling),
            Ok(()),
        ]);
        let start = tokio::time::Instant::now();

        let outcome = controller()
            .checkpoint(&mut checkpointer, Some("101"), &emitter(&sink))
            .await;

        assert_eq!(outcome, CheckpointOutcome::Succeeded { attempts: 5 });
        assert_eq!(checkpointer.calls().len(), 5);
        assert!(start.elapsed() >= D * 4);
        assert_eq!(error_messages(&sink).len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_gives_up_after_budget() {
        let sink = MemorySink::new();
        let mut checkpointer =
            ScriptedCheckpointer::repeating(Err(CheckpointError::Throttling));
        let start = tokio::time::Instant::now();

        let outcome = controller()
            .checkpoint(&mut checkpointer, Some("7"), &emitter(&sink))
            .await;

        assert_eq!(outcome, CheckpointOutcome::Exhausted { attempts: 5 });
        assert_eq!(checkpointer.calls().len(), 5);
        // No delay follows the last attempt.
        assert_eq!(start.elapsed(), D * 4);

        let messages = error_messages(&sink);
        assert_eq!(messages.len(), 5);
        assert!(messages[4].contains("giving up"), "{}", messages[4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fenced_stops_immediately() {
        let sink = MemorySink::new();
        let mut checkpointer = ScriptedCheckpointer::new(vec![Err(CheckpointError::Shutdown)]);
        let start = tokio::time::Instant::now();

        let outcome = controller()
            .checkpoint(&mut checkpointer, None, &emitter(&sink))
            .await;

        assert_eq!(outcome, CheckpointOutcome::Fenced { attempts: 1 });
        assert_eq!(checkpointer.calls(), vec![None]);
        assert_eq!(start.elapsed(), time::Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fenced_after_retries() {
        let sink = MemorySink::new();
        let mut checkpointer = ScriptedCheckpointer::new(vec![
            Err(CheckpointError::InvalidState),
            Err(CheckpointError::Other("connection reset".to_owned())),
            Err(CheckpointError::Shutdown),
        ]);
        let start = tokio::time::Instant::now();

        let outcome = controller()
            .checkpoint(&mut checkpointer, Some("3"), &emitter(&sink))
            .await;

        assert_eq!(outcome, CheckpointOutcome::Fenced { attempts: 3 });
        assert_eq!(checkpointer.calls().len(), 3);
        assert_eq!(start.elapsed(), D * 2);

        let messages = error_messages(&sink);
        assert!(messages[0].contains("invalid state"));
        assert!(messages[1].contains("connection reset"));
        assert!(messages[2].contains("shutdown exception"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_errors_share_the_budget() {
        let sink = MemorySink::new();
        let mut checkpointer =
            ScriptedCheckpointer::repeating(Err(CheckpointError::InvalidState));

        let outcome = controller()
            .checkpoint(&mut checkpointer, Some("3"), &emitter(&sink))
            .await;

        assert_eq!(outcome, CheckpointOutcome::Exhausted { attempts: 5 });
        assert_eq!(checkpointer.calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_last_failed_attempt() {
        let sink = MemorySink::new();
        let mut checkpointer = ScriptedCheckpointer::new(vec![
            Err(CheckpointError::Throttling),
            Err(CheckpointError::InvalidState),
            Err(CheckpointError::Throttling),
            Err(CheckpointError::Throttling),
            Err(CheckpointError::Other("connection reset".to_owned())),
        ]);
        let start = tokio::time::Instant::now();

        let outcome = controller()
            .checkpoint(&mut checkpointer, Some("3"), &emitter(&sink))
            .await;

        assert_eq!(outcome, CheckpointOutcome::Exhausted { attempts: 5 });
        assert_eq!(start.elapsed(), D * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_fails_under_any_error_sequence() {
        let errors = [
            CheckpointError::Shutdown,
            CheckpointError::Throttling,
            CheckpointError::InvalidState,
            CheckpointError::Other("boom".to_owned()),
        ];

        for first in &errors {
            for second in &errors {
                let sink = MemorySink::new();
                let mut checkpointer = ScriptedCheckpointer::new(vec![
                    Err(first.clone()),
                    Err(second.clone()),
                    Err(second.clone()),
                    Err(first.clone()),
                    Err(second.clone()),
                    Ok(()),
                ]);

                let outcome = controller()
                    .checkpoint(&mut checkpointer, Some("1"), &emitter(&sink))
                    .await;

                let attempts = checkpointer.calls().len() as u32;
                assert!(attempts <= 5);
                match outcome {
                    CheckpointOutcome::Succeeded { attempts: n }
                    | CheckpointOutcome::Fenced { attempts: n }
                    | CheckpointOutcome::Exhausted { attempts: n } => assert_eq!(n, attempts),
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_if_due_respects_interval() {
        let sink = MemorySink::new();
        let emitter = emitter(&sink);
        let mut checkpointer = ScriptedCheckpointer::repeating(Ok(()));
        let mut controller = controller();
        let seq: SequenceNumber = "55".parse().expect("valid sequence number");

        assert_eq!(
            controller
                .checkpoint_if_due(&mut checkpointer, Some(&seq), &emitter)
                .await,
            None
        );

        tokio::time::advance(time::Duration::from_secs(61)).await;
        assert_eq!(
            controller
                .checkpoint_if_due(&mut checkpointer, Some(&seq), &emitter)
                .await,
            Some(CheckpointOutcome::Succeeded { attempts: 1 })
        );
        assert!(!controller.is_due());

        assert_eq!(checkpointer.calls(), vec![Some("55".to_owned())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_restarts_after_failed_checkpoint() {
        let sink = MemorySink::new();
        let emitter = emitter(&sink);
        let mut checkpointer = ScriptedCheckpointer::repeating(Err(CheckpointError::Shutdown));
        let mut controller = controller();

        tokio::time::advance(time::Duration::from_secs(61)).await;
        assert_eq!(
            controller
                .checkpoint_if_due(&mut checkpointer, None, &emitter)
                .await,
            Some(CheckpointOutcome::Fenced { attempts: 1 })
        );
        assert!(!controller.is_due());
    }
}
