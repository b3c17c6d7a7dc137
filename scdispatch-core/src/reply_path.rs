//! Reply path: the audio-thread writer that stamps every engine reply with
//! a monotonic per-ring sequence number, and the auxiliary-thread reader
//! that detects loss via sequence gaps.
//!
//! The writer half runs on the audio thread and must not allocate beyond
//! what `encode_fast` needs into a caller-provided buffer. The reader half
//! is an ordinary polling auxiliary worker, reading instead of writing.

use std::sync::Arc;

use crate::identifier::rewrite_inbound;
use crate::metrics::Metrics;
use crate::osc::{decode, encode_fast, OscMessageOwned, OscPacketOwned};
use crate::ring_buffer::WriteOutcome;
use crate::shared_region::SharedRegion;

/// Audio-thread side: writes one engine reply to the outbound ring, or one
/// diagnostic line to the debug ring.
pub struct ReplyWriter<'a> {
    shared: &'a SharedRegion,
    id_tag: u8,
}

impl<'a> ReplyWriter<'a> {
    pub fn new(shared: &'a SharedRegion, id_tag: u8) -> Self {
        Self { shared, id_tag }
    }

    /// Writes one engine reply to the outbound ring. The outbound frame is
    /// `[u32 length][u32 sequence][OSC bytes]`; the ring buffer already
    /// provides the outer length prefix, so the sequence number is folded
    /// into the written payload itself, right after that prefix.
    pub fn write_reply(&self, message: &OscMessageOwned) -> bool {
        let sequence = self.shared.next_reply_sequence();
        let mut buf = vec![0u8; 4 + self.shared.outbound.capacity()];
        let osc_len = match encode_fast(&mut buf[4..], None, message, self.id_tag) {
            Ok(len) => len,
            Err(_) => return false,
        };
        buf[0..4].copy_from_slice(&sequence.to_be_bytes());
        buf.truncate(4 + osc_len);

        match self.shared.outbound.write(&buf) {
            Ok(WriteOutcome::Ok { bytes_written }) => {
                Metrics::bump(&self.shared.metrics.reply_bytes_received, bytes_written as u64);
                true
            }
            _ => false,
        }
    }

    pub fn write_debug(&self, text: &str) -> bool {
        match self.shared.debug.write(text.as_bytes()) {
            Ok(WriteOutcome::Ok { bytes_written }) => {
                Metrics::bump(&self.shared.metrics.debug_bytes, bytes_written as u64);
                true
            }
            _ => false,
        }
    }
}

/// A decoded reply, already inverse-identifier-rewritten, ready to hand to
/// a listener as an `in` event.
#[derive(Debug, Clone)]
pub struct DeliveredReply {
    pub sequence: u32,
    pub packet: OscPacketOwned,
}

/// Auxiliary-thread side: drains the outbound ring, tracks the highest
/// sequence seen, and reports gaps as loss.
pub struct ReplyReader {
    shared: Arc<SharedRegion>,
    id_tag: u8,
    highest_seen: Option<u32>,
}

impl ReplyReader {
    pub fn new(shared: Arc<SharedRegion>, id_tag: u8) -> Self {
        Self { shared, id_tag, highest_seen: None }
    }

    /// Drains every currently-available reply frame, updating loss
    /// tracking and running inverse identifier rewriting on each.
    pub fn drain(&mut self) -> Vec<DeliveredReply> {
        let mut out = Vec::new();
        self.shared.outbound.drain_into(|frame| {
            if let Some(delivered) = self.ingest_frame(frame) {
                out.push(delivered);
            }
            true
        });
        out
    }

    fn ingest_frame(&mut self, frame: &[u8]) -> Option<DeliveredReply> {
        if frame.len() < 4 {
            // Corrupt: length frame shorter than the sequence prefix it
            // must carry. Count as one lost reply and resynchronise by
            // moving on to the next frame (the ring's own framing already
            // guarantees the *next* read starts at a valid boundary).
            Metrics::bump(&self.shared.metrics.reply_loss_detected, 1);
            return None;
        }
        let sequence = u32::from_be_bytes(frame[0..4].try_into().unwrap());
        self.note_sequence(sequence);

        let osc_bytes = &frame[4..];
        let mut packet = decode(osc_bytes, self.id_tag).ok()?;
        rewrite_inbound(&self.shared.identifiers, &mut packet);
        Some(DeliveredReply { sequence, packet })
    }

    fn note_sequence(&mut self, sequence: u32) {
        if let Some(prev) = self.highest_seen {
            if sequence > prev + 1 {
                let gap = (sequence - prev - 1) as u64;
                log::warn!(target: "dispatch::reply", "detected {gap} lost replies (sequence jumped from {prev} to {sequence})");
                Metrics::bump(&self.shared.metrics.reply_loss_detected, gap);
            }
        }
        self.highest_seen = Some(match self.highest_seen {
            Some(prev) => prev.max(sequence),
            None => sequence,
        });
    }
}

/// Minimal debug-ring reader: UTF-8 diagnostic lines, no sequencing.
pub struct DebugReader {
    shared: Arc<SharedRegion>,
}

impl DebugReader {
    pub fn new(shared: Arc<SharedRegion>) -> Self {
        Self { shared }
    }

    pub fn drain(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.shared.debug.drain_into(|frame| {
            out.push(String::from_utf8_lossy(frame).into_owned());
            true
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_region::RingSizes;

    fn setup() -> Arc<SharedRegion> {
        SharedRegion::new(RingSizes::default())
    }

    #[test]
    fn write_then_drain_roundtrips_a_reply() {
        let shared = setup();
        let writer = ReplyWriter::new(&shared, b'u');
        let msg = OscMessageOwned { address: "/n_go".to_string(), args: vec![] };
        assert!(writer.write_reply(&msg));

        let mut reader = ReplyReader::new(Arc::clone(&shared), b'u');
        let replies = reader.drain();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].sequence, 0);
    }

    #[test]
    fn sequence_gap_is_counted_as_loss() {
        let shared = setup();
        // Bypass the writer's own sequence counter to simulate a dropped
        // frame between sequence 0 and sequence 2.
        let frame0 = {
            let mut buf = vec![0u8; 4];
            buf[0..4].copy_from_slice(&0u32.to_be_bytes());
            buf
        };
        let frame2 = {
            let mut buf = vec![0u8; 4];
            buf[0..4].copy_from_slice(&2u32.to_be_bytes());
            buf
        };
        shared.outbound.write(&frame0).unwrap();
        shared.outbound.write(&frame2).unwrap();

        let mut reader = ReplyReader::new(Arc::clone(&shared), b'u');
        reader.drain();
        assert_eq!(shared.metrics.snapshot().reply_loss_detected, 1);
    }

    #[test]
    fn debug_text_roundtrips() {
        let shared = setup();
        let writer = ReplyWriter::new(&shared, b'u');
        assert!(writer.write_debug("engine heap overflow"));
        let reader = DebugReader::new(Arc::clone(&shared));
        assert_eq!(reader.drain(), vec!["engine heap overflow".to_string()]);
    }
}
