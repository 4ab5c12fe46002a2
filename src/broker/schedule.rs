use std::{
    cmp::Ordering,
    collections::BinaryHeap,
};

use crate::{ConnectionId, Millis, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    LiftBan(UserId),
    Disconnect(ConnectionId),
}

#[derive(Debug, PartialEq, Eq)]
struct Entry {
    due: Millis,
    seq: u64,
    task: Task,
}

// BinaryHeap is a max-heap; flip the order so the earliest task (then the oldest) is on top.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.due.cmp(&self.due).then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Deferred work keyed by virtual time.
#[derive(Debug, Default)]
pub struct Schedule {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Schedule {
    pub fn push(&mut self, due: Millis, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { due, seq, task });
    }

    pub fn next_due(&self) -> Option<Millis> {
        self.heap.peek().map(|e| e.due)
    }

    /// Pops the earliest task if it is due at `now`.
    pub fn pop_due(&mut self, now: Millis) -> Option<Task> {
        if self.next_due()? > now {
            return None;
        }
        self.heap.pop().map(|e| e.task)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
