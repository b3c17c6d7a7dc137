//! OSC log: a secondary, non-destructive tail over the inbound ring,
//! advanced on the audio thread right after intake, yielding
//! `{bytes, source_id, sequence}` for every frame the engine actually saw —
//! independent of (and never ahead of) the engine-side scheduler's own
//! consumption.

use crate::ring_buffer::RingBuffer;

/// One entry in the authoritative OSC log, surfaced as an `out:osc` event.
#[derive(Debug, Clone)]
pub struct LoggedFrame {
    pub bytes: Vec<u8>,
    pub source_id: u32,
    pub sequence: u64,
}

/// Tracks its own tail position into the inbound ring, separate from the
/// ring's primary consumer tail.
pub struct OscLog {
    tail: u32,
    next_sequence: u64,
}

impl OscLog {
    /// Initialised to the ring's current head so bytes written before
    /// start-up are never replayed.
    pub fn new(inbound: &RingBuffer) -> Self {
        Self { tail: inbound.head_position(), next_sequence: 0 }
    }

    /// Advances over every frame available since the last call. `source_id`
    /// is constant here because a single inbound ring has exactly one
    /// writer at a time from the log's point of view; worker-to-worker
    /// attribution (multiple source ids) is resolved by
    /// `inbound_writer.rs` before bytes ever reach the ring.
    pub fn drain(&mut self, inbound: &RingBuffer, source_id: u32) -> Vec<LoggedFrame> {
        let mut out = Vec::new();
        while let Some((bytes, next)) = inbound.peek_at(self.tail) {
            let sequence = self.next_sequence;
            self.next_sequence += 1;
            self.tail = next;
            out.push(LoggedFrame { bytes, source_id, sequence });
        }
        out
    }
}
