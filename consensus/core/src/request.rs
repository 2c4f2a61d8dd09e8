use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use parking_lot::Mutex;

use crate::types::{Proposal, Request, Sequence};

#[derive(Debug)]
struct PendingEntry<P> {
    number: u64,
    request: Request<P>,
}

impl<P> PartialEq for PendingEntry<P> {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl<P> Eq for PendingEntry<P> {}

impl<P> PartialOrd for PendingEntry<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P> Ord for PendingEntry<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

/// Requests from the block builder that arrived ahead of the current
/// sequence, drained as the chain catches up.
///
/// Guarded by its own mutex: the backend side inserts while the event loop
/// drains on sequence advance.
#[derive(Debug)]
pub struct PendingRequests<P> {
    heap: Mutex<BinaryHeap<Reverse<PendingEntry<P>>>>,
}

impl<P: Proposal> PendingRequests<P> {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
        }
    }

    pub fn push(&self, request: Request<P>) {
        let number = request.proposal.number();
        self.heap.lock().push(Reverse(PendingEntry { number, request }));
    }

    /// Pop every request matching the given sequence. Older requests are
    /// dropped, future ones stay queued.
    pub fn drain_ready(&self, sequence: Sequence) -> Vec<Request<P>> {
        let mut ready = Vec::new();
        let mut heap = self.heap.lock();
        while let Some(Reverse(head)) = heap.peek() {
            match head.number.cmp(&sequence.0) {
                Ordering::Less => {
                    heap.pop();
                }
                Ordering::Equal => {
                    if let Some(Reverse(entry)) = heap.pop() {
                        ready.push(entry.request);
                    }
                }
                Ordering::Greater => break,
            }
        }
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

impl<P: Proposal> Default for PendingRequests<P> {
    fn default() -> Self {
        Self::new()
    }
}
