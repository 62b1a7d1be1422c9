//! Inbound backpressure stage.
//!
//! Socket arrivals append to the current batch; the lifecycle driver flushes
//! the batch on a fixed cadence so bursts of inbound traffic never block the
//! transport's own event processing on consumer-side work.

use crate::channel::MessageHandler;

/// Ordered batch of payloads accumulated since the last flush tick.
#[derive(Debug, Default)]
pub struct InboundBuffer {
    pending: Vec<String>,
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: String) {
        self.pending.push(payload);
    }

    /// Take the full current batch, leaving the buffer empty.
    pub fn take_batch(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Deliver a batch payload-by-payload, preserving arrival order.
///
/// Each delivery is isolated: a payload the consumer rejects is dropped with
/// a diagnostic and the rest of the batch is still delivered. Returns the
/// number of successful deliveries.
pub fn deliver_batch(handler: &MessageHandler, batch: Vec<String>) -> usize {
    let mut delivered = 0;
    for payload in batch {
        match handler(payload) {
            Ok(()) => delivered += 1,
            Err(err) => tracing::warn!("dropping inbound payload: {err}"),
        }
    }
    delivered
}
