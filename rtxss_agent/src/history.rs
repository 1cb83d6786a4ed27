//! Bounded history buffer for the temperature/power charts.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::types::HistoryEntry;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    while dq.len() >= cap && !dq.is_empty() {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// Oldest-first FIFO of chart points with a fixed capacity.
/// The lock is only held for the push or the copy, never across I/O.
pub struct HistoryStore {
    entries: Mutex<VecDeque<HistoryEntry>>,
    cap: usize,
}

impl HistoryStore {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn append(&self, entry: HistoryEntry) {
        let mut dq = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        push_capped(&mut dq, entry, self.cap);
    }

    // Detached copy; later appends don't show up in it
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        let dq = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        dq.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
