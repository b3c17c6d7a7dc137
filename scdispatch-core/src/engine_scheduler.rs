//! Engine-side scheduler: a fixed-size bounded min-heap living inside the
//! audio callback, holding bundles the prescheduler released early until
//! their NTP frame actually arrives.
//!
//! Capacity and slot size (`engineSchedulerCapacity`/`engineSchedulerSlotBytes`,
//! default 128 × 16 KiB) are kept as runtime fields sized once at
//! construction so the same code path is exercised by tests with small
//! synthetic budgets. Grounded in the `BinaryHeap<Reverse<_>>` idiom shared
//! with `prescheduler.rs`; this is the single observation site for "lates" —
//! the prescheduler dispatches past-due bundles without flagging them, and
//! this intake phase is where lateness is actually counted, exactly once
//! per bundle.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::metrics::Metrics;
use crate::osc::{decode, NtpTimeTag, OscPacketOwned};

struct Slot {
    timetag_ntp: NtpTimeTag,
    sequence: u64,
    message: OscPacketOwned,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.timetag_ntp == other.timetag_ntp && self.sequence == other.sequence
    }
}
impl Eq for Slot {}
impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Slot {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.timetag_ntp, self.sequence).cmp(&(other.timetag_ntp, other.sequence))
    }
}

/// One decoded message ready to hand to the engine, with the sample offset
/// inside the current block at which it should fire.
pub struct Dispatchable {
    pub message: OscPacketOwned,
    pub sample_offset: u32,
    pub was_late: bool,
}

/// The bounded, audio-thread-owned heap. Every method here runs on the
/// audio thread and must not allocate on the hot path beyond what the
/// fixed-capacity heap already reserved at construction.
pub struct EngineScheduler {
    heap: BinaryHeap<Reverse<Slot>>,
    capacity: usize,
    slot_bytes: usize,
    next_sequence: u64,
    peak: usize,
}

impl EngineScheduler {
    pub fn new(capacity: usize, slot_bytes: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            capacity,
            slot_bytes,
            next_sequence: 0,
            peak: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.heap.len()
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Intake phase. `raw_frame` is one frame already
    /// drained from the inbound ring. Returns `Some` when the message
    /// should be handed to the engine immediately this block (a non-bundle
    /// message, an immediate bundle, or a timed bundle whose frame has
    /// already arrived), tagged with the sample offset it must fire at;
    /// otherwise the bundle is parked in the heap and `None` is returned.
    /// `Err` means intake rejected the frame outright (decode failure, or
    /// the heap is already full for a bundle that must be parked).
    pub fn intake(
        &mut self,
        raw_frame: &[u8],
        id_tag: u8,
        block_start_ntp: NtpTimeTag,
        block_end_ntp: NtpTimeTag,
        sample_rate: f64,
        metrics: &Metrics,
    ) -> Option<Dispatchable> {
        let packet = match decode(raw_frame, id_tag) {
            Ok(p) => p,
            Err(_) => return None,
        };
        self.intake_packet(packet, block_start_ntp, block_end_ntp, sample_rate, metrics)
    }

    /// Same as [`Self::intake`] but for a packet the caller already
    /// decoded (used by `audio_callback.rs`, which must inspect the
    /// decoded address for the purge sentinel before handing ordinary
    /// messages on to the heap).
    pub fn intake_packet(
        &mut self,
        packet: OscPacketOwned,
        block_start_ntp: NtpTimeTag,
        block_end_ntp: NtpTimeTag,
        sample_rate: f64,
        metrics: &Metrics,
    ) -> Option<Dispatchable> {
        let Some(timetag) = packet.timetag() else {
            // Non-bundle message: not timetagged, dispatched at once.
            return Some(Dispatchable { message: packet, sample_offset: 0, was_late: false });
        };

        if timetag.is_immediate() || timetag <= block_end_ntp {
            let was_late = timetag < block_start_ntp;
            if was_late {
                Metrics::bump(&metrics.lates, 1);
            }
            let elapsed = (timetag.as_secs_f64() - block_start_ntp.as_secs_f64()).max(0.0);
            let sample_offset = (elapsed * sample_rate).floor() as u32;
            return Some(Dispatchable { message: packet, sample_offset, was_late });
        }

        if self.is_full() {
            Metrics::bump(&metrics.engine_heap_dropped, 1);
            return None;
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Reverse(Slot { timetag_ntp: timetag, sequence, message: packet }));
        self.peak = self.peak.max(self.heap.len());
        Metrics::watermark(&metrics.engine_heap_peak, self.peak as u64);
        None
    }

    /// Release phase: pops and returns every entry whose
    /// frame is within `[block_start_ntp, block_end_ntp]`, each tagged with
    /// its dispatch sample offset.
    pub fn release(
        &mut self,
        block_start_ntp: NtpTimeTag,
        block_end_ntp: NtpTimeTag,
        sample_rate: f64,
        metrics: &Metrics,
    ) -> Vec<Dispatchable> {
        let mut out = Vec::new();
        while let Some(Reverse(top)) = self.heap.peek() {
            if top.timetag_ntp > block_end_ntp {
                break;
            }
            let Reverse(slot) = self.heap.pop().unwrap();

            let was_late = slot.timetag_ntp < block_start_ntp;
            if was_late {
                Metrics::bump(&metrics.lates, 1);
            }
            let elapsed = (slot.timetag_ntp.as_secs_f64() - block_start_ntp.as_secs_f64()).max(0.0);
            let sample_offset = (elapsed * sample_rate).floor() as u32;

            out.push(Dispatchable { message: slot.message, sample_offset, was_late });
        }
        out
    }

    /// Purge sentinel handling: drops every parked bundle.
    pub fn clear(&mut self) {
        self.heap.clear();
    }

    pub fn slot_bytes(&self) -> usize {
        self.slot_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::{encode_general, OscMessageOwned};

    fn make_bundle(seconds: u32, fraction: u32) -> Vec<u8> {
        let bundle = OscPacketOwned::Bundle(crate::osc::OscBundleOwned {
            timetag: NtpTimeTag { seconds, fraction },
            elements: vec![OscPacketOwned::Message(OscMessageOwned {
                address: "/s_new".to_string(),
                args: vec![],
            })],
        });
        encode_general(&bundle, b'u')
    }

    #[test]
    fn future_bundle_is_parked_then_released_in_window() {
        let mut sched = EngineScheduler::new(4, 16_384);
        let metrics = Metrics::new();
        let block_start = NtpTimeTag { seconds: 1000, fraction: 0 };
        let block_end = NtpTimeTag { seconds: 1000, fraction: 100 };

        let far_frame = make_bundle(1000, 50_000_000); // well beyond this block
        let parked = sched.intake(&far_frame, b'u', block_start, block_end, 48_000.0, &metrics);
        assert!(parked.is_none());
        assert_eq!(sched.depth(), 1);

        let released = sched.release(block_start, NtpTimeTag { seconds: 1001, fraction: 0 }, 48_000.0, &metrics);
        assert_eq!(released.len(), 1);
        assert_eq!(sched.depth(), 0);
    }

    #[test]
    fn immediate_bundle_dispatches_at_once_without_parking() {
        let mut sched = EngineScheduler::new(4, 16_384);
        let metrics = Metrics::new();
        let block_start = NtpTimeTag { seconds: 1000, fraction: 0 };
        let block_end = NtpTimeTag { seconds: 1000, fraction: 100 };

        let frame = make_bundle(0, 1); // IMMEDIATE
        let dispatched = sched.intake(&frame, b'u', block_start, block_end, 48_000.0, &metrics);
        assert_eq!(dispatched.unwrap().sample_offset, 0);
        assert_eq!(sched.depth(), 0);
    }

    #[test]
    fn past_due_frame_counts_as_late_exactly_once_and_fires_at_sample_zero() {
        let mut sched = EngineScheduler::new(4, 16_384);
        let metrics = Metrics::new();
        let block_start = NtpTimeTag { seconds: 1000, fraction: 0 };
        let block_end = NtpTimeTag { seconds: 1000, fraction: 100 };

        let frame = make_bundle(999, 0); // before block_start
        let dispatched = sched.intake(&frame, b'u', block_start, block_end, 48_000.0, &metrics);
        let dispatched = dispatched.unwrap();
        assert!(dispatched.was_late);
        assert_eq!(dispatched.sample_offset, 0);
        assert_eq!(metrics.snapshot().lates, 1);
    }

    #[test]
    fn in_block_bundle_dispatches_at_the_sample_offset_implied_by_its_frame() {
        let mut sched = EngineScheduler::new(4, 16_384);
        let metrics = Metrics::new();
        let sample_rate = 48_000.0;
        let block_start = NtpTimeTag { seconds: 1000, fraction: 0 };
        // 10ms block.
        let block_end = NtpTimeTag { seconds: 1000, fraction: 42_949_673 };

        // 6.25ms into the block.
        let frame = make_bundle(1000, 26_843_546);
        let dispatched = sched.intake(&frame, b'u', block_start, block_end, sample_rate, &metrics).unwrap();
        assert!(!dispatched.was_late);
        // 0.00625s * 48_000 = 300 samples in.
        assert_eq!(dispatched.sample_offset, 300);
        assert_eq!(sched.depth(), 0);
    }

    #[test]
    fn heap_full_drops_and_counts() {
        let mut sched = EngineScheduler::new(1, 16_384);
        let metrics = Metrics::new();
        let block_start = NtpTimeTag { seconds: 1000, fraction: 0 };
        let block_end = NtpTimeTag { seconds: 1000, fraction: 100 };
        let far_frame = make_bundle(1000, 50_000_000);

        assert!(sched.intake(&far_frame, b'u', block_start, block_end, 48_000.0, &metrics).is_none());
        assert!(sched.intake(&far_frame, b'u', block_start, block_end, 48_000.0, &metrics).is_none());
        assert_eq!(sched.depth(), 1);
        assert_eq!(metrics.snapshot().engine_heap_dropped, 1);
    }

    #[test]
    fn clear_drops_all_parked_entries() {
        let mut sched = EngineScheduler::new(4, 16_384);
        let metrics = Metrics::new();
        let block_start = NtpTimeTag { seconds: 1000, fraction: 0 };
        let block_end = NtpTimeTag { seconds: 1000, fraction: 100 };
        let far_frame = make_bundle(1000, 50_000_000);
        sched.intake(&far_frame, b'u', block_start, block_end, 48_000.0, &metrics);
        sched.clear();
        assert_eq!(sched.depth(), 0);
    }
}
