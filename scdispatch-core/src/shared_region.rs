//! The single backing region every thread context maps identically: three
//! rings, the NTP offset, metrics, the purge-ack flag, the OSC-log tail,
//! and the identifier allocator all live
//! behind one `Arc<SharedRegion>` so cloning a handle is cheap and every
//! context sees the same atomics.
//!
//! A literal byte-addressed region (as the browser's `SharedArrayBuffer`
//! would be) isn't meaningful inside a single native process; this struct
//! is the native-Rust equivalent — a fixed set of fields at fixed identities
//! instead of fixed byte offsets — used the same way: constructed once by
//! the facade, handed out by reference to every other component.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::identifier::IdentifierMap;
use crate::metrics::Metrics;
use crate::ntp::NtpClock;
use crate::ring_buffer::RingBuffer;

/// Per-ring byte capacities (`ringBufferBytes`, with separate defaults per
/// ring).
#[derive(Debug, Clone, Copy)]
pub struct RingSizes {
    pub inbound: usize,
    pub outbound: usize,
    pub debug: usize,
}

impl Default for RingSizes {
    fn default() -> Self {
        Self { inbound: 1 << 20, outbound: 1 << 18, debug: 1 << 16 }
    }
}

pub struct SharedRegion {
    pub inbound: RingBuffer,
    pub outbound: RingBuffer,
    pub debug: RingBuffer,

    pub clock: NtpClock,
    pub metrics: Metrics,
    pub identifiers: IdentifierMap,

    /// Advanced past every frame the OSC-log forwarder has already
    /// delivered. Initialised to the inbound ring's current head so
    /// pre-init bytes are never replayed.
    pub osc_log_tail: AtomicU32,

    /// Set by the audio context once it has observed a purge sentinel and
    /// cleared the engine-side heap. Cleared by the facade once both
    /// acknowledgements have been consumed.
    pub purge_acked: AtomicBool,

    /// Monotonic counter for the outbound ring's per-reply sequence number.
    pub reply_sequence: AtomicU32,

    /// Next `source_id` handed to an auxiliary worker-to-worker writer.
    /// 0 is reserved for the main application.
    pub next_source_id: AtomicU32,
}

impl SharedRegion {
    pub fn new(sizes: RingSizes) -> Arc<Self> {
        Arc::new(Self {
            inbound: RingBuffer::new(sizes.inbound),
            outbound: RingBuffer::new(sizes.outbound),
            debug: RingBuffer::new(sizes.debug),
            clock: NtpClock::new(),
            metrics: Metrics::new(),
            identifiers: IdentifierMap::new(),
            osc_log_tail: AtomicU32::new(0),
            purge_acked: AtomicBool::new(false),
            reply_sequence: AtomicU32::new(0),
            next_source_id: AtomicU32::new(1),
        })
    }

    /// Assigns the next `source_id` to an auxiliary writer.
    pub fn assign_source_id(&self) -> u32 {
        self.next_source_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_reply_sequence(&self) -> u32 {
        self.reply_sequence.fetch_add(1, Ordering::Relaxed)
    }
}
