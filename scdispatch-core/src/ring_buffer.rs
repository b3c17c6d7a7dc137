//! Single-producer/single-consumer, length-prefixed ring buffer.
//!
//! Three instances exist in the shared region: inbound (app → audio
//! thread), outbound (audio thread → app), and debug (audio thread → app).
//! Modeled on the claim/publish discipline of Aeron's `ManyToOneRingBuffer`,
//! narrowed to one writer and adapted to a simple `[u32 len][payload]`
//! framing rather than Aeron's fixed record header.
//!
//! OSC packets are always written 4-byte aligned by the codec, so every
//! frame's payload length is itself a multiple of 4 and frames never need
//! extra padding beyond their own length prefix.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

/// Bytes reserved so a full buffer is distinguishable from an empty one.
const RESERVED_BYTES: usize = 4;

/// Outcome of a single `write` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok { bytes_written: usize },
    Full,
}

/// A frame whose length prefix claims more bytes than the ring could ever
/// hold, independent of current occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTooLarge {
    pub len: usize,
    pub max: usize,
}

/// The ring buffer body. `head`/`tail` are ever-increasing byte counters
/// (mod 2^32); the true buffer index is `position % capacity`. Only the
/// writer ever stores `head`; only the reader ever stores `tail`.
pub struct RingBuffer {
    capacity: usize,
    buf: UnsafeCell<Box<[u8]>>,
    head: AtomicU32,
    tail: AtomicU32,
    peak: AtomicU32,
}

// Safety: exactly one writer thread touches `head`/writes buffer bytes
// before publishing; exactly one reader thread touches `tail`/reads buffer
// bytes after observing a published `head`. The acquire/release pairing
// below establishes the happens-before edge between the two.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > RESERVED_BYTES, "ring buffer capacity must exceed the reserved header slack");
        Self {
            capacity,
            buf: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            peak: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently in flight (written, not yet consumed).
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest occupancy observed so far, in bytes.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed) as usize
    }

    fn record_peak(&self, used: usize) {
        let used = used as u32;
        let mut current = self.peak.load(Ordering::Relaxed);
        while used > current {
            match self.peak.compare_exchange_weak(current, used, Ordering::Relaxed, Ordering::Relaxed) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
    }

    fn copy_in(&self, start: u32, data: &[u8]) {
        let cap = self.capacity;
        let buf = unsafe { &mut *self.buf.get() };
        let pos = start as usize % cap;
        let first = (cap - pos).min(data.len());
        buf[pos..pos + first].copy_from_slice(&data[..first]);
        if first < data.len() {
            buf[0..data.len() - first].copy_from_slice(&data[first..]);
        }
    }

    fn copy_out(&self, start: u32, len: usize) -> Vec<u8> {
        let cap = self.capacity;
        let buf = unsafe { &*self.buf.get() };
        let pos = start as usize % cap;
        let mut out = vec![0u8; len];
        let first = (cap - pos).min(len);
        out[..first].copy_from_slice(&buf[pos..pos + first]);
        if first < len {
            out[first..].copy_from_slice(&buf[0..len - first]);
        }
        out
    }

    /// Write a length-prefixed frame. Returns `WriteOutcome::Full` (without
    /// mutating the buffer) if there isn't room right now; an oversized
    /// frame that could never fit is reported distinctly via `Err`.
    pub fn write(&self, payload: &[u8]) -> Result<WriteOutcome, FrameTooLarge> {
        let frame_len = RESERVED_BYTES + payload.len();
        let max = self.capacity - RESERVED_BYTES;
        if payload.len() > max {
            return Err(FrameTooLarge { len: payload.len(), max });
        }

        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Relaxed);
        let used = head.wrapping_sub(tail) as usize;
        let free = (self.capacity - RESERVED_BYTES).saturating_sub(used);
        if frame_len > free {
            return Ok(WriteOutcome::Full);
        }

        self.copy_in(head, &(payload.len() as u32).to_be_bytes());
        self.copy_in(head.wrapping_add(RESERVED_BYTES as u32), payload);

        let new_head = head.wrapping_add(frame_len as u32);
        self.head.store(new_head, Ordering::Release);
        self.record_peak(used + frame_len);

        Ok(WriteOutcome::Ok { bytes_written: frame_len })
    }

    /// Read the next frame, if one is fully available.
    pub fn read(&self) -> Option<Vec<u8>> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        let available = head.wrapping_sub(tail) as usize;
        if available < RESERVED_BYTES {
            return None;
        }

        let len_bytes = self.copy_out(tail, RESERVED_BYTES);
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        if available < RESERVED_BYTES + len {
            return None;
        }

        let payload = self.copy_out(tail.wrapping_add(RESERVED_BYTES as u32), len);
        let new_tail = tail.wrapping_add((RESERVED_BYTES + len) as u32);
        self.tail.store(new_tail, Ordering::Release);
        Some(payload)
    }

    /// Repeatedly read until empty or `consumer` returns `false` to stop.
    pub fn drain_into(&self, mut consumer: impl FnMut(&[u8]) -> bool) {
        while let Some(frame) = self.read() {
            if !consumer(&frame) {
                break;
            }
        }
    }

    /// Current writer position. Used to initialise a secondary,
    /// non-destructive tail (the OSC log) so it never replays bytes written
    /// before it started watching.
    pub fn head_position(&self) -> u32 {
        self.head.load(Ordering::Acquire)
    }

    /// Non-destructive read of one frame at an arbitrary byte position,
    /// for a secondary reader that tracks its own tail instead of the
    /// ring's own consumer tail (the OSC log reads frames the primary
    /// consumer already advanced past). Returns the frame and the
    /// position just past it, or `None` if `pos` has caught up with the
    /// writer. The caller is responsible for keeping `pos` from falling so
    /// far behind `head` that the writer has wrapped over it.
    pub fn peek_at(&self, pos: u32) -> Option<(Vec<u8>, u32)> {
        let head = self.head.load(Ordering::Acquire);
        let available = head.wrapping_sub(pos) as usize;
        if available < RESERVED_BYTES {
            return None;
        }
        let len_bytes = self.copy_out(pos, RESERVED_BYTES);
        let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
        if available < RESERVED_BYTES + len {
            return None;
        }
        let payload = self.copy_out(pos.wrapping_add(RESERVED_BYTES as u32), len);
        let next = pos.wrapping_add((RESERVED_BYTES + len) as u32);
        Some((payload, next))
    }
}
