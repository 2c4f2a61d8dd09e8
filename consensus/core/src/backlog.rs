use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use parking_lot::Mutex;

use crate::error::ConsensusError;
use crate::message::{Message, MessageCode};
use crate::types::View;

/// A future message waiting for the local view to catch up.
#[derive(Debug, Clone)]
struct BacklogEntry {
    view: View,
    message: Message,
}

impl BacklogEntry {
    /// Priority key: more recent views first, then more advanced phases.
    fn key(&self) -> (View, u8) {
        (self.view, self.message.code.rank())
    }
}

impl PartialEq for BacklogEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for BacklogEntry {}

impl PartialOrd for BacklogEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BacklogEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Per-author priority queues of future messages.
///
/// Keyed by author so worst-case memory stays bounded by the validator-set
/// size times the per-author capacity; when a queue overflows, the entry
/// with the lowest priority (oldest view) is dropped. Guarded by its own
/// mutex: the inbound side inserts while the event loop scans. The scan
/// collects actionable messages and the caller re-injects them only after
/// the lock is released.
#[derive(Debug)]
pub struct Backlog {
    queues: Mutex<HashMap<[u8; 32], BinaryHeap<BacklogEntry>>>,
    capacity: usize,
}

impl Backlog {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Stash a future message from the given author.
    pub fn store(&self, author: [u8; 32], view: View, message: Message) {
        let mut queues = self.queues.lock();
        let heap = queues.entry(author).or_default();
        heap.push(BacklogEntry { view, message });
        if heap.len() > self.capacity {
            let mut entries = std::mem::take(heap).into_vec();
            if let Some(min_idx) = entries
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.cmp(b))
                .map(|(idx, _)| idx)
            {
                entries.swap_remove(min_idx);
            }
            *heap = BinaryHeap::from(entries);
        }
    }

    /// Re-run the acceptance check against every queue head and collect the
    /// messages that have become actionable. Heads still in the future stop
    /// the scan for their author; old or invalid entries are dropped.
    pub fn drain_ready<F>(&self, check: F) -> Vec<Message>
    where
        F: Fn(MessageCode, View) -> Result<(), ConsensusError>,
    {
        let mut ready = Vec::new();
        let mut queues = self.queues.lock();
        for heap in queues.values_mut() {
            loop {
                let verdict = match heap.peek() {
                    None => break,
                    Some(entry) => check(entry.message.code, entry.view),
                };
                match verdict {
                    Err(ConsensusError::FutureMessage) => break,
                    Ok(()) => {
                        if let Some(entry) = heap.pop() {
                            ready.push(entry.message);
                        }
                    }
                    Err(_) => {
                        heap.pop();
                    }
                }
            }
        }
        queues.retain(|_, heap| !heap.is_empty());
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }
}
