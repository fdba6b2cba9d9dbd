//! Batch accumulation for bulk writes
//!
//! A batch closes when it holds `max_batch_size` events or when its oldest
//! event has waited `max_batch_age`, whichever comes first. The accumulator is
//! not synchronized; the storage service keeps each one behind its lock.

use std::mem;
use std::time::Duration;

use tokio::time::Instant;

use crate::event::Event;

/// Why a batch is ready to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Size,
    Age,
}

/// Buffer of events closed by a size or age threshold
#[derive(Debug)]
pub struct BatchAccumulator {
    max_batch_size: usize,
    max_batch_age: Duration,
    events: Vec<Event>,
    opened_at: Option<Instant>,
}

impl BatchAccumulator {
    /// Create a new BatchAccumulator with the given thresholds
    pub fn new(max_batch_size: usize, max_batch_age: Duration) -> Self {
        let max_batch_size = max_batch_size.max(1);
        Self {
            max_batch_size,
            max_batch_age,
            events: Vec::with_capacity(max_batch_size),
            opened_at: None,
        }
    }

    /// Append an event, reporting whether the batch should now be flushed
    pub fn add(&mut self, event: Event) -> Option<FlushReason> {
        let now = Instant::now();
        self.opened_at.get_or_insert(now);
        self.events.push(event);

        if self.events.len() >= self.max_batch_size {
            Some(FlushReason::Size)
        } else if self.is_due(now) {
            Some(FlushReason::Age)
        } else {
            None
        }
    }

    /// Whether the batch has been open longer than `max_batch_age`
    pub fn is_due(&self, now: Instant) -> bool {
        self.opened_at
            .map(|opened| now.saturating_duration_since(opened) >= self.max_batch_age)
            .unwrap_or(false)
    }

    /// Take the current contents in arrival order and start a new batch
    pub fn flush(&mut self) -> Vec<Event> {
        self.opened_at = None;
        mem::replace(&mut self.events, Vec::with_capacity(self.max_batch_size))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
