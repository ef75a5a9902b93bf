//! Push-to-pull adapter between part delivery and row demand.
//!
//! The bridge is a plain state machine: a demand counter, a queue of rows
//! from parts already delivered, and the phase of the backend call. It does
//! no I/O. The owner asks [`Bridge::step`] what to do next, performs any
//! fetch itself, and feeds the outcome back with [`Bridge::on_part`],
//! [`Bridge::on_end`] or [`Bridge::on_error`].
//!
//! Rules:
//! - nothing is fetched until demand is positive;
//! - a new part is fetched only when the queue is empty and demand remains;
//! - parts are never split, so the queue holds at most one part;
//! - a fetch whose outcome was never reported is asked for again;
//! - on failure or cancellation queued rows are discarded.

use std::collections::VecDeque;

/// Demand value meaning "no limit".
pub const UNBOUNDED: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Query not sent yet.
    Unstarted,
    /// Query sent, no part request outstanding.
    Open,
    /// A part has been requested and its outcome not reported yet.
    InFlight,
    /// The last part has been delivered.
    Exhausted,
    Done(Outcome),
}

/// What the owner should do next.
#[derive(Debug, PartialEq)]
pub enum Step<T> {
    /// Hand this row to the consumer.
    Emit(T),
    /// Request the next part (sending the query first if needed).
    Fetch,
    /// Wait for more demand.
    Stall,
    /// All rows delivered; the result just completed.
    Complete,
    /// Already terminated.
    Terminated(Outcome),
}

/// What a cancellation has to undo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cancel {
    /// Already terminated; nothing to do.
    AlreadyDone,
    /// Nothing reached the backend.
    NotStarted,
    /// The remote call is open and must be cancelled.
    Open,
    /// Everything was delivered; only local state is dropped.
    Drained,
}

#[derive(Debug)]
pub struct Bridge<T> {
    demand: u64,
    queue: VecDeque<T>,
    phase: Phase,
    emitted: u64,
    fetches: u64,
}

impl<T> Default for Bridge<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Bridge<T> {
    pub fn new() -> Self {
        Self {
            demand: 0,
            queue: VecDeque::new(),
            phase: Phase::Unstarted,
            emitted: 0,
            fetches: 0,
        }
    }

    /// Add `n` to the outstanding demand. Saturates at [`UNBOUNDED`].
    pub fn request(&mut self, n: u64) {
        if matches!(self.phase, Phase::Done(_)) {
            return;
        }
        self.demand = self.demand.saturating_add(n);
    }

    pub fn step(&mut self) -> Step<T> {
        if let Phase::Done(outcome) = self.phase {
            return Step::Terminated(outcome);
        }
        if self.demand > 0
            && let Some(row) = self.queue.pop_front()
        {
            if self.demand != UNBOUNDED {
                self.demand -= 1;
            }
            self.emitted += 1;
            return Step::Emit(row);
        }
        if self.queue.is_empty() && self.phase == Phase::Exhausted {
            self.phase = Phase::Done(Outcome::Completed);
            return Step::Complete;
        }
        if self.demand == 0 {
            return Step::Stall;
        }
        match self.phase {
            // A step while in flight means the owner dropped the fetch.
            Phase::Unstarted | Phase::Open | Phase::InFlight => {
                self.phase = Phase::InFlight;
                self.fetches += 1;
                Step::Fetch
            }
            Phase::Exhausted | Phase::Done(_) => Step::Stall,
        }
    }

    /// A part arrived.
    pub fn on_part(&mut self, rows: impl IntoIterator<Item = T>, is_last: bool) {
        if matches!(self.phase, Phase::Done(_)) {
            return;
        }
        self.queue.extend(rows);
        self.phase = if is_last {
            Phase::Exhausted
        } else {
            Phase::Open
        };
    }

    /// The backend ended the stream without flagging a last part.
    pub fn on_end(&mut self) {
        if !matches!(self.phase, Phase::Done(_)) {
            self.phase = Phase::Exhausted;
        }
    }

    /// The backend reported a failure. Returns false if already terminated.
    pub fn on_error(&mut self) -> bool {
        if matches!(self.phase, Phase::Done(_)) {
            return false;
        }
        self.queue.clear();
        self.phase = Phase::Done(Outcome::Failed);
        true
    }

    pub fn cancel(&mut self) -> Cancel {
        let effect = match self.phase {
            Phase::Done(_) => return Cancel::AlreadyDone,
            Phase::Unstarted => Cancel::NotStarted,
            Phase::Open | Phase::InFlight => Cancel::Open,
            Phase::Exhausted => Cancel::Drained,
        };
        self.queue.clear();
        self.phase = Phase::Done(Outcome::Cancelled);
        effect
    }

    pub fn demand(&self) -> u64 {
        self.demand
    }

    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Parts requested so far.
    pub fn fetches(&self) -> u64 {
        self.fetches
    }

    pub fn is_started(&self) -> bool {
        self.phase != Phase::Unstarted
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self.phase {
            Phase::Done(outcome) => Some(outcome),
            _ => None,
        }
    }
}
