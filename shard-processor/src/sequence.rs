use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::RecordError;

/// A record's position in its shard.
///
/// Stream sequence numbers are decimal integers that can be far wider than any native integer
/// type, so they are kept as their canonical digit string (no leading zeros) and ordered
/// numerically by length first, then digit by digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SequenceNumber(String);

impl SequenceNumber {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SequenceNumber {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();

        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(RecordError::InvalidSequenceNumber(s.to_owned()));
        }

        let canonical = digits.trim_start_matches('0');
        if canonical.is_empty() {
            Ok(SequenceNumber("0".to_owned()))
        } else {
            Ok(SequenceNumber(canonical.to_owned()))
        }
    }
}

impl From<u128> for SequenceNumber {
    fn from(value: u128) -> Self {
        SequenceNumber(value.to_string())
    }
}

impl Ord for SequenceNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for SequenceNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracks the highest sequence number seen on the shard during this processor's lifetime.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    largest: Option<SequenceNumber>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches are not guaranteed to arrive sorted, so only a strictly greater value moves the mark.
    pub fn observe(&mut self, sequence_number: &SequenceNumber) {
        match &self.largest {
            Some(largest) if sequence_number <= largest => {}
            _ => self.largest = Some(sequence_number.clone()),
        }
    }

    pub fn current(&self) -> Option<&SequenceNumber> {
        self.largest.as_ref()
    }
}
