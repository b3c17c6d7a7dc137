//! The per-block audio-thread function: intake, engine processing,
//! release, reply emission, log advancement, and purge-sentinel handling —
//! one pure function of (shared state, input ring, engine), in place of an
//! event-loop style of control flow.
//!
//! Every step here runs on the audio thread: no allocation beyond what was
//! already reserved at construction, no blocking, no locks. `Vec` growth
//! inside `release`/`poll_replies` is bounded by the fixed engine-scheduler
//! capacity and is the one allocation this module accepts, collecting
//! bounded per-block vectors the same way an ordinary audio-thread
//! callback does.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::engine_iface::Engine;
use crate::engine_scheduler::EngineScheduler;
use crate::metrics::Metrics;
use crate::osc::{decode, NtpTimeTag, OscMessageOwned, OscPacketOwned};
use crate::osc_log::{LoggedFrame, OscLog};
use crate::purge::is_purge_sentinel;
use crate::reply_path::ReplyWriter;
use crate::shared_region::SharedRegion;
use crate::telemetry::{BlockTelemetry, BlockTelemetrySummary};

/// What happened during one `process_block` call, for the facade to turn
/// into events (`out:osc`, `debug`, `in`).
pub struct BlockReport {
    pub osc_log_frames: Vec<LoggedFrame>,
    pub purge_observed: bool,
}

/// Walks a decoded packet and hands every leaf message to `f`, in order.
/// Bundles encountered here are already known to be due this block (the
/// scheduler only ever releases whole bundles whose timetag has arrived),
/// so every element fires at the same sample offset as its parent.
fn for_each_message(packet: &OscPacketOwned, mut f: impl FnMut(&OscMessageOwned)) {
    fn walk(packet: &OscPacketOwned, f: &mut dyn FnMut(&OscMessageOwned)) {
        match packet {
            OscPacketOwned::Message(m) => f(m),
            OscPacketOwned::Bundle(b) => {
                for element in &b.elements {
                    walk(element, f);
                }
            }
        }
    }
    walk(packet, &mut f)
}

pub struct AudioCallback<E: Engine> {
    shared: Arc<SharedRegion>,
    scheduler: EngineScheduler,
    engine: E,
    osc_log: OscLog,
    id_tag: u8,
    sample_rate: f64,
    telemetry: BlockTelemetry,
}

impl<E: Engine> AudioCallback<E> {
    pub fn new(shared: Arc<SharedRegion>, engine: E, id_tag: u8, sample_rate: f64, engine_scheduler_capacity: usize, engine_scheduler_slot_bytes: usize) -> Self {
        let osc_log = OscLog::new(&shared.inbound);
        Self {
            scheduler: EngineScheduler::new(engine_scheduler_capacity, engine_scheduler_slot_bytes),
            osc_log,
            engine,
            id_tag,
            sample_rate,
            shared,
            telemetry: BlockTelemetry::new(),
        }
    }

    pub fn engine_heap_depth(&self) -> usize {
        self.scheduler.depth()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Drains the current telemetry window. Only ever called by whoever
    /// owns this `AudioCallback` between blocks, never concurrently with
    /// `process_block` itself.
    pub fn telemetry_summary(&mut self) -> BlockTelemetrySummary {
        self.telemetry.take_summary()
    }

    /// Runs one full audio block: intake, release, engine replies, log
    /// advancement, purge-sentinel handling.
    pub fn process_block(&mut self, block_start_ntp: NtpTimeTag, block_end_ntp: NtpTimeTag) -> BlockReport {
        let started_at = Instant::now();
        let block_budget_us = ((block_end_ntp.as_secs_f64() - block_start_ntp.as_secs_f64()) * 1_000_000.0).max(0.0) as u32;
        let mut purge_observed = false;

        // Intake phase.
        loop {
            let Some(frame) = self.shared.inbound.read() else { break };
            let packet = match decode(&frame, self.id_tag) {
                Ok(p) => p,
                Err(_) => continue,
            };

            if is_purge_sentinel(&packet) {
                purge_observed = true;
                continue;
            }

            if let Some(dispatchable) = self.scheduler.intake_packet(packet, block_start_ntp, block_end_ntp, self.sample_rate, &self.shared.metrics) {
                for_each_message(&dispatchable.message, |m| {
                    self.engine.handle(m, dispatchable.sample_offset);
                    Metrics::bump(&self.shared.metrics.messages_processed, 1);
                });
            }
        }

        // OSC log advancement: replays exactly what intake just consumed.
        let osc_log_frames = self.osc_log.drain(&self.shared.inbound, 0);

        // Release phase.
        let released = self.scheduler.release(block_start_ntp, block_end_ntp, self.sample_rate, &self.shared.metrics);
        for dispatchable in &released {
            for_each_message(&dispatchable.message, |m| {
                self.engine.handle(m, dispatchable.sample_offset);
                Metrics::bump(&self.shared.metrics.messages_processed, 1);
            });
        }

        // Reply emission: whatever the engine produced this block.
        let writer = ReplyWriter::new(&self.shared, self.id_tag);
        for reply in self.engine.poll_replies() {
            writer.write_reply(&reply);
        }

        // Purge sentinel: clear the heap and ack.
        if purge_observed {
            self.scheduler.clear();
            self.shared.purge_acked.store(true, Ordering::Release);
        }

        // Publish the live heap depth; peak and dropped counters are
        // already maintained inline by the scheduler.
        self.shared.metrics.engine_heap_depth.store(self.scheduler.depth() as u64, Ordering::Relaxed);

        // Ring occupancy/peak gauges: mirrored from each ring's own atomics,
        // which already track current length and high-water mark.
        self.shared.metrics.sync_ring_gauges(&self.shared.inbound, &self.shared.outbound, &self.shared.debug);

        self.telemetry.record(started_at.elapsed(), block_budget_us);

        BlockReport { osc_log_frames, purge_observed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_iface::RecordingEngine;
    use crate::osc::{encode_general, OscArg, OscBundleOwned};
    use crate::shared_region::RingSizes;

    fn block_bounds(start_secs: u32) -> (NtpTimeTag, NtpTimeTag) {
        (NtpTimeTag { seconds: start_secs, fraction: 0 }, NtpTimeTag { seconds: start_secs, fraction: 1_000_000 })
    }

    #[test]
    fn immediate_message_reaches_engine_in_the_same_block() {
        let shared = SharedRegion::new(RingSizes::default());
        let msg = OscPacketOwned::Message(OscMessageOwned { address: "/s_new".to_string(), args: vec![OscArg::Int32(1)] });
        shared.inbound.write(&encode_general(&msg, b'u')).unwrap();

        let mut cb = AudioCallback::new(Arc::clone(&shared), RecordingEngine::new(), b'u', 48_000.0, 8, 16_384);
        let (start, end) = block_bounds(1000);
        cb.process_block(start, end);

        assert_eq!(cb.engine.handled.len(), 1);
    }

    #[test]
    fn purge_sentinel_clears_heap_and_sets_ack_flag() {
        let shared = SharedRegion::new(RingSizes::default());
        let mut cb = AudioCallback::new(Arc::clone(&shared), RecordingEngine::new(), b'u', 48_000.0, 8, 16_384);

        let far = OscPacketOwned::Bundle(OscBundleOwned {
            timetag: NtpTimeTag { seconds: 5000, fraction: 0 },
            elements: vec![OscPacketOwned::Message(OscMessageOwned { address: "/s_new".to_string(), args: vec![] })],
        });
        shared.inbound.write(&encode_general(&far, b'u')).unwrap();

        let (start, end) = block_bounds(1000);
        cb.process_block(start, end);
        assert_eq!(cb.engine_heap_depth(), 1);

        let sentinel = OscPacketOwned::Message(OscMessageOwned {
            address: crate::purge::PURGE_SENTINEL_ADDRESS.to_string(),
            args: vec![],
        });
        shared.inbound.write(&encode_general(&sentinel, b'u')).unwrap();

        let report = cb.process_block(start, end);
        assert!(report.purge_observed);
        assert_eq!(cb.engine_heap_depth(), 0);
        assert!(shared.purge_acked.load(Ordering::Acquire));
    }

    #[test]
    fn osc_log_reports_every_frame_intake_consumed() {
        let shared = SharedRegion::new(RingSizes::default());
        let mut cb = AudioCallback::new(Arc::clone(&shared), RecordingEngine::new(), b'u', 48_000.0, 8, 16_384);
        let msg = OscPacketOwned::Message(OscMessageOwned { address: "/s_new".to_string(), args: vec![] });
        shared.inbound.write(&encode_general(&msg, b'u')).unwrap();

        let (start, end) = block_bounds(1000);
        let report = cb.process_block(start, end);
        assert_eq!(report.osc_log_frames.len(), 1);
    }

    #[test]
    fn telemetry_accumulates_across_blocks() {
        let shared = SharedRegion::new(RingSizes::default());
        let mut cb = AudioCallback::new(Arc::clone(&shared), RecordingEngine::new(), b'u', 48_000.0, 8, 16_384);
        let (start, end) = block_bounds(1000);
        cb.process_block(start, end);
        cb.process_block(start, end);

        let summary = cb.telemetry_summary();
        assert!(summary.avg_us < 1_000_000, "sanity bound, not a timing assertion");
    }
}
