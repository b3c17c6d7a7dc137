//! Metrics snapshot: a fixed-layout struct of counters, readable
//! synchronously, updated by the writer of each counter without
//! cross-component locking.
//!
//! Each field below has exactly one designated writer (named in the doc
//! comment where it isn't obvious) and may be read by anyone — a single
//! writer, multiple readers, lock-free for every counter except the
//! dispatch-headroom window, which takes a short-lived `Mutex` on the
//! prescheduler's own thread and never on the audio thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::ring_buffer::RingBuffer;

const UNSET_MIN_HEADROOM: u64 = u64::MAX;

/// Number of most-recent dispatch-headroom samples the minimum is taken
/// over. A lifetime-latched minimum never recovers after one unusually
/// late dispatch; a window lets the reported figure track current
/// behaviour the way a dashboard gauge should.
const HEADROOM_WINDOW_LEN: usize = 64;

/// Lock-free counter block. Lives in the shared region; `Arc`'d out to every
/// component that needs to bump or read it.
#[derive(Default)]
pub struct Metrics {
    pub messages_sent: AtomicU64,
    pub messages_processed: AtomicU64,

    pub inbound_ring_bytes: AtomicU64,
    pub inbound_ring_peak: AtomicU64,
    pub outbound_ring_bytes: AtomicU64,
    pub outbound_ring_peak: AtomicU64,
    pub debug_ring_bytes: AtomicU64,
    pub debug_ring_peak: AtomicU64,

    pub prescheduler_pending: AtomicU64,
    pub prescheduler_peak: AtomicU64,
    pub prescheduler_dispatched: AtomicU64,
    pub prescheduler_cancelled: AtomicU64,
    pub prescheduler_retries_failed: AtomicU64,

    pub engine_heap_depth: AtomicU64,
    pub engine_heap_peak: AtomicU64,
    pub engine_heap_dropped: AtomicU64,

    /// Bundles that reached a dispatch stage with a deadline already past
    /// ("lates"). The engine-side scheduler is the single observation
    /// site, so only `engine_scheduler.rs` increments this — the
    /// prescheduler dispatches ASAP without flagging.
    pub lates: AtomicU64,

    pub reply_bytes_received: AtomicU64,
    pub reply_loss_detected: AtomicU64,
    pub debug_bytes: AtomicU64,

    /// Cached windowed minimum, stored as `u64` bits so it can be read
    /// without taking `headroom_window`'s lock; `UNSET_MIN_HEADROOM`
    /// sentinel until the first dispatch reports a headroom sample.
    min_headroom_us: AtomicU64,

    /// The last `HEADROOM_WINDOW_LEN` headroom samples, oldest first.
    /// Written only by `record_headroom_us` (the prescheduler's own
    /// thread, which may block briefly), never by the audio thread.
    headroom_window: Mutex<VecDeque<i64>>,
}

impl Metrics {
    pub fn new() -> Self {
        let m = Self::default();
        m.min_headroom_us.store(UNSET_MIN_HEADROOM, Ordering::Relaxed);
        m
    }

    /// Records one dispatch-headroom sample and recomputes the minimum
    /// over the trailing window, so a single bad sample ages out instead
    /// of latching the reported minimum forever.
    pub fn record_headroom_us(&self, headroom_us: i64) {
        let mut window = self.headroom_window.lock().expect("headroom window poisoned");
        window.push_back(headroom_us);
        while window.len() > HEADROOM_WINDOW_LEN {
            window.pop_front();
        }
        let min = window.iter().copied().min().expect("just pushed a sample");
        drop(window);
        self.min_headroom_us.store(min as u64, Ordering::Relaxed);
    }

    /// `None` until the first sample is recorded (the "unset" sentinel).
    pub fn min_headroom_us(&self) -> Option<i64> {
        let raw = self.min_headroom_us.load(Ordering::Relaxed);
        if raw == UNSET_MIN_HEADROOM {
            None
        } else {
            Some(raw as i64)
        }
    }

    /// Mirrors each ring's own occupancy/peak atomics into the metrics
    /// snapshot surface. Cheap (plain atomic loads/stores, no allocation),
    /// safe to call from the audio thread once per block.
    pub fn sync_ring_gauges(&self, inbound: &RingBuffer, outbound: &RingBuffer, debug: &RingBuffer) {
        self.inbound_ring_bytes.store(inbound.len() as u64, Ordering::Relaxed);
        self.inbound_ring_peak.store(inbound.peak() as u64, Ordering::Relaxed);
        self.outbound_ring_bytes.store(outbound.len() as u64, Ordering::Relaxed);
        self.outbound_ring_peak.store(outbound.peak() as u64, Ordering::Relaxed);
        self.debug_ring_bytes.store(debug.len() as u64, Ordering::Relaxed);
        self.debug_ring_peak.store(debug.peak() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            inbound_ring_bytes: self.inbound_ring_bytes.load(Ordering::Relaxed),
            inbound_ring_peak: self.inbound_ring_peak.load(Ordering::Relaxed),
            outbound_ring_bytes: self.outbound_ring_bytes.load(Ordering::Relaxed),
            outbound_ring_peak: self.outbound_ring_peak.load(Ordering::Relaxed),
            debug_ring_bytes: self.debug_ring_bytes.load(Ordering::Relaxed),
            debug_ring_peak: self.debug_ring_peak.load(Ordering::Relaxed),
            prescheduler_pending: self.prescheduler_pending.load(Ordering::Relaxed),
            prescheduler_peak: self.prescheduler_peak.load(Ordering::Relaxed),
            prescheduler_dispatched: self.prescheduler_dispatched.load(Ordering::Relaxed),
            prescheduler_cancelled: self.prescheduler_cancelled.load(Ordering::Relaxed),
            prescheduler_retries_failed: self.prescheduler_retries_failed.load(Ordering::Relaxed),
            engine_heap_depth: self.engine_heap_depth.load(Ordering::Relaxed),
            engine_heap_peak: self.engine_heap_peak.load(Ordering::Relaxed),
            engine_heap_dropped: self.engine_heap_dropped.load(Ordering::Relaxed),
            lates: self.lates.load(Ordering::Relaxed),
            reply_bytes_received: self.reply_bytes_received.load(Ordering::Relaxed),
            reply_loss_detected: self.reply_loss_detected.load(Ordering::Relaxed),
            debug_bytes: self.debug_bytes.load(Ordering::Relaxed),
            min_headroom_us: self.min_headroom_us(),
        }
    }

    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn watermark(counter: &AtomicU64, value: u64) {
        let mut current = counter.load(Ordering::Relaxed);
        while value > current {
            match counter.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }
}

/// Plain-value copy of [`Metrics`], suitable for logging or handing to
/// application code through the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub messages_sent: u64,
    pub messages_processed: u64,
    pub inbound_ring_bytes: u64,
    pub inbound_ring_peak: u64,
    pub outbound_ring_bytes: u64,
    pub outbound_ring_peak: u64,
    pub debug_ring_bytes: u64,
    pub debug_ring_peak: u64,
    pub prescheduler_pending: u64,
    pub prescheduler_peak: u64,
    pub prescheduler_dispatched: u64,
    pub prescheduler_cancelled: u64,
    pub prescheduler_retries_failed: u64,
    pub engine_heap_depth: u64,
    pub engine_heap_peak: u64,
    pub engine_heap_dropped: u64,
    pub reply_bytes_received: u64,
    pub reply_loss_detected: u64,
    pub debug_bytes: u64,
    pub lates: u64,
    pub min_headroom_us: Option<i64>,
}
