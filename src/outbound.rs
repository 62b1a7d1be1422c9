//! Ordered buffer of not-yet-sent payloads, flushed once the channel
//! becomes connected.

use std::collections::VecDeque;
use std::time::Instant;

/// One queued payload. The payload is opaque to the channel core.
#[derive(Debug, Clone)]
pub struct OutboundItem {
    pub payload: String,
    pub queued_at: Instant,
}

/// Strict-FIFO queue of payloads awaiting a connected transport.
///
/// Enqueueing never blocks and never fails; loss prevention for sends issued
/// while disconnected is queuing, not error surfacing.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<OutboundItem>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, payload: String) {
        self.items.push_back(OutboundItem {
            payload,
            queued_at: Instant::now(),
        });
    }

    pub fn pop_front(&mut self) -> Option<OutboundItem> {
        self.items.pop_front()
    }

    /// Put an item back at the head after a failed transmission so it is
    /// retried first on the next connect.
    pub fn requeue_front(&mut self, item: OutboundItem) {
        self.items.push_front(item);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
