use std::collections::VecDeque;
use std::sync::Arc;

use vstream_core_types::WireEvent;

/// Ring of the most recent wire events for one session.
///
/// Events are pushed in sequence order, so the buffer always holds a
/// contiguous `sequence_id` range. The snapshot anchor tracks the newest
/// buffered full snapshot and is cleared when that event falls off the ring.
pub struct EventBuffer {
    items: VecDeque<Arc<WireEvent>>,
    capacity: usize,
    last_snapshot_seq: Option<u64>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            last_snapshot_seq: None,
        }
    }

    pub fn push(&mut self, event: Arc<WireEvent>) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
            if let (Some(snap), Some(front)) = (self.last_snapshot_seq, self.items.front()) {
                if snap < front.sequence_id {
                    self.last_snapshot_seq = None;
                }
            } else if self.items.is_empty() {
                self.last_snapshot_seq = None;
            }
        }
        if event.event.is_full_snapshot() {
            self.last_snapshot_seq = Some(event.sequence_id);
        }
        self.items.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Newest buffered full snapshot, if any survives in the ring.
    pub fn snapshot_seq(&self) -> Option<u64> {
        self.last_snapshot_seq
    }

    pub fn first_seq(&self) -> Option<u64> {
        self.items.front().map(|ev| ev.sequence_id)
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.items.back().map(|ev| ev.sequence_id)
    }

    /// Buffered events with `sequence_id >= seq`, oldest first.
    pub fn suffix_from(&self, seq: u64) -> impl Iterator<Item = &Arc<WireEvent>> {
        self.items
            .iter()
            .skip_while(move |ev| ev.sequence_id < seq)
    }
}
