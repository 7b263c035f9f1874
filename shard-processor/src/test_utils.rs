//! In-memory stand-ins for the host's checkpointer and the downstream sink.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::checkpoint::Checkpointer;
use crate::error::{CheckpointError, SinkError};
use crate::sink::{Payload, Sink};

#[derive(Default)]
struct MemorySinkState {
    events: Vec<(String, Payload)>,
    attempts: usize,
    fail_next: usize,
    unavailable: bool,
    rejected_suffix: Option<String>,
    flushes: usize,
}

/// A `Sink` that keeps every emitted event in memory. Clones share the same events.
#[derive(Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<MemorySinkState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` emits, whatever their tag.
    pub fn fail_next(&self, count: usize) {
        self.lock().fail_next = count;
    }

    /// Fail every emit until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Fail every emit whose tag ends with `suffix`, or stop doing so with `None`.
    pub fn reject_tags_ending_with(&self, suffix: Option<&str>) {
        self.lock().rejected_suffix = suffix.map(str::to_owned);
    }

    pub fn events(&self) -> Vec<(String, Payload)> {
        self.lock().events.clone()
    }

    pub fn events_with_tag(&self, tag: &str) -> Vec<Payload> {
        self.lock()
            .events
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    /// Number of emits, successful or not.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    pub fn flushes(&self) -> usize {
        self.lock().flushes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemorySinkState> {
        self.state.lock().expect("poisoned memory sink")
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn emit(&self, tag: &str, payload: Payload) -> Result<(), SinkError> {
        let mut state = self.lock();
        state.attempts += 1;

        if state.unavailable {
            return Err(SinkError::Unavailable("sink is down".to_owned()));
        }
        if let Some(suffix) = &state.rejected_suffix {
            if tag.ends_with(suffix.as_str()) {
                return Err(SinkError::Unavailable(format!("{} is rejected", tag)));
            }
        }
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(SinkError::Unavailable("injected failure".to_owned()));
        }

        state.events.push((tag.to_owned(), payload));
        Ok(())
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.lock().flushes += 1;
        Ok(())
    }
}

/// A `Checkpointer` answering from a script, then with a fallback once the script runs out.
pub struct ScriptedCheckpointer {
    script: VecDeque<Result<(), CheckpointError>>,
    fallback: Result<(), CheckpointError>,
    calls: Vec<Option<String>>,
}

impl ScriptedCheckpointer {
    pub fn new(script: Vec<Result<(), CheckpointError>>) -> Self {
        Self {
            script: script.into(),
            fallback: Ok(()),
            calls: Vec::new(),
        }
    }

    /// Answer every call with `result`.
    pub fn repeating(result: Result<(), CheckpointError>) -> Self {
        Self {
            script: VecDeque::new(),
            fallback: result,
            calls: Vec::new(),
        }
    }

    /// The sequence number passed to each call, in order.
    pub fn calls(&self) -> Vec<Option<String>> {
        self.calls.clone()
    }
}

#[async_trait]
impl Checkpointer for ScriptedCheckpointer {
    async fn checkpoint(&mut self, sequence_number: Option<&str>) -> Result<(), CheckpointError> {
        self.calls.push(sequence_number.map(str::to_owned));
        self.script
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}
