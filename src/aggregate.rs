//! Reassembly of tables delivered over several indexed frames.
//!
//! A Daly pack with 16 cells answers a cell voltage poll with six frames, each
//! carrying a frame number and three voltages. Frames may arrive twice, and
//! firmware revisions disagree on whether numbering starts at 0 or 1.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, trace};

/// Lifecycle of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateState {
    Idle,
    Collecting,
    Finalized,
}

/// Why a segment was not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejected {
    /// No poll is in progress, or it has already been finalized.
    NotCollecting,
    /// The index lies below the inferred base.
    BelowBase { index: u8, base: u8 },
}

/// Collects indexed segments into one ordered sequence.
#[derive(Debug)]
pub struct SegmentAggregator<T> {
    name: &'static str,
    state: AggregateState,
    /// Fixed for the lifetime of the aggregator once the first segment arrives.
    base: Option<u8>,
    buckets: BTreeMap<usize, Vec<T>>,
    expected: Option<usize>,
    deadline: Option<Instant>,
    finalized: Option<Vec<T>>,
}

impl<T: Clone> SegmentAggregator<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: AggregateState::Idle,
            base: None,
            buckets: BTreeMap::new(),
            expected: None,
            deadline: None,
            finalized: None,
        }
    }

    pub fn state(&self) -> AggregateState {
        self.state
    }

    /// The numbering base, once a segment has been seen.
    pub fn base(&self) -> Option<u8> {
        self.base
    }

    /// Start a poll. Clears segments from any previous poll.
    pub fn begin(&mut self, deadline: Instant) {
        self.buckets.clear();
        self.finalized = None;
        self.deadline = Some(deadline);
        self.state = AggregateState::Collecting;
        trace!(name = self.name, "collecting segments");
    }

    /// Set the total number of values the table holds, when it becomes known.
    pub fn set_expected(&mut self, expected: Option<usize>) {
        self.expected = expected;
    }

    /// Store the values of segment `index`. A repeated index replaces the
    /// earlier delivery.
    pub fn accept(&mut self, index: u8, values: Vec<T>) -> Result<(), Rejected> {
        if self.state != AggregateState::Collecting {
            return Err(Rejected::NotCollecting);
        }
        let base = *self.base.get_or_insert(if index == 0 { 0 } else { 1 });
        if index < base {
            return Err(Rejected::BelowBase { index, base });
        }
        let slot = usize::from(index - base);
        if self.buckets.insert(slot, values).is_some() {
            trace!(name = self.name, index, "duplicate segment replaced");
        }
        Ok(())
    }

    /// Values collected so far.
    pub fn collected(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Whether the expected number of values has arrived.
    pub fn is_complete(&self) -> bool {
        match self.expected {
            Some(expected) => !self.buckets.is_empty() && self.collected() >= expected,
            None => false,
        }
    }

    /// Finalize when complete or once `now` has reached the deadline.
    pub fn poll(&mut self, now: Instant) -> Option<&[T]> {
        if self.state != AggregateState::Collecting {
            return None;
        }
        let expired = self.deadline.is_some_and(|deadline| now >= deadline);
        if self.is_complete() || expired {
            debug!(name = self.name, collected = self.collected(), expired, "finalizing segments");
            self.finalize(self.expected);
            return self.finalized.as_deref();
        }
        None
    }

    /// Concatenate segments in index order, truncated to `expected` values.
    pub fn finalize(&mut self, expected: Option<usize>) -> Vec<T> {
        let mut values: Vec<T> = self.buckets.values().flatten().cloned().collect();
        if let Some(expected) = expected {
            values.truncate(expected);
        }
        self.state = AggregateState::Finalized;
        self.finalized = Some(values.clone());
        values
    }

    /// The result of the last finalized poll.
    pub fn result(&self) -> Option<&[T]> {
        self.finalized.as_deref()
    }
}
