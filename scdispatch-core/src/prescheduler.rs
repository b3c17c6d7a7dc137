//! Prescheduler: a min-heap of future bundles, released to the inbound
//! ring ≈`dispatch_lead_seconds` before they fire.
//!
//! The dedicated polling thread is a `thread::Builder`-named worker
//! draining a queue on its own cadence; the heap itself follows the
//! `BinaryHeap<Reverse<_>>` min-heap idiom used throughout the corpus for
//! deadline-ordered work.
//!
//! Heap deletion by predicate is O(n), so cancellation is mark-and-sweep:
//! a cancelled entry's sequence is recorded in a side set and skipped (and
//! physically dropped) the next time it would be popped, with periodic
//! compaction once the cancelled fraction crosses a threshold. Because the
//! whole state lives behind one `Mutex`, `cancel`'s effect is visible to
//! the very next `tick`, well inside the one-tick (≤25ms) bound a caller
//! can rely on.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Config;
use crate::error::DispatchError;
use crate::metrics::Metrics;
use crate::osc::NtpTimeTag;
use crate::ring_buffer::WriteOutcome;
use crate::shared_region::SharedRegion;

type Sequence = u64;

/// Cancellation selector: `{session, tag, both, all}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelSelector {
    Session(u32),
    Tag(String),
    Both(u32, String),
    All,
}

impl CancelSelector {
    fn matches(&self, session_id: u32, tag: &str) -> bool {
        match self {
            CancelSelector::Session(s) => *s == session_id,
            CancelSelector::Tag(t) => t == tag,
            CancelSelector::Both(s, t) => *s == session_id && t == tag,
            CancelSelector::All => true,
        }
    }
}

struct HeapEntry {
    deadline_ntp: NtpTimeTag,
    sequence: Sequence,
    payload: Vec<u8>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ntp == other.deadline_ntp && self.sequence == other.sequence
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_ntp, self.sequence).cmp(&(other.deadline_ntp, other.sequence))
    }
}

struct LiveMeta {
    session_id: u32,
    tag: String,
}

struct RetryEntry {
    entry: HeapEntry,
    attempts: u8,
}

const MAX_RETRY_ATTEMPTS: u8 = 8;
const COMPACTION_THRESHOLD: f64 = 0.25;

struct State {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    next_sequence: Sequence,
    live: HashMap<Sequence, LiveMeta>,
    cancelled: HashSet<Sequence>,
    retry_queue: VecDeque<RetryEntry>,
}

impl State {
    fn pending(&self) -> usize {
        self.live.len()
    }

    /// Drops every physically-present-but-cancelled entry from the heap.
    fn compact(&mut self) {
        if self.cancelled.is_empty() {
            return;
        }
        let kept: BinaryHeap<Reverse<HeapEntry>> = std::mem::take(&mut self.heap)
            .into_iter()
            .filter(|Reverse(e)| !self.cancelled.contains(&e.sequence))
            .collect();
        self.heap = kept;
        self.cancelled.clear();
    }
}

/// The prescheduler: a handle safe to share across the application context
/// (submitters/cancellers) and its own background timer thread.
pub struct Prescheduler {
    state: Mutex<State>,
    shared: Arc<SharedRegion>,
    capacity: usize,
    dispatch_lead_seconds: f64,
    retry_capacity: usize,
    shutdown: AtomicBool,
}

impl Prescheduler {
    /// Constructs the prescheduler and spawns its dedicated polling thread.
    pub fn spawn(shared: Arc<SharedRegion>, config: &Config) -> (Arc<Self>, JoinHandle<()>) {
        let scheduler = Arc::new(Self {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                next_sequence: 0,
                live: HashMap::new(),
                cancelled: HashSet::new(),
                retry_queue: VecDeque::new(),
            }),
            shared,
            capacity: config.prescheduler_capacity,
            dispatch_lead_seconds: config.dispatch_lead_seconds,
            retry_capacity: 1024,
            shutdown: AtomicBool::new(false),
        });

        let poll_interval = Duration::from_millis(config.prescheduler_poll_interval_ms);
        let worker = Arc::clone(&scheduler);
        let handle = thread::Builder::new()
            .name("dispatch-prescheduler".to_string())
            .spawn(move || {
                while !worker.shutdown.load(Ordering::Relaxed) {
                    worker.tick();
                    thread::sleep(poll_interval);
                }
            })
            .expect("failed to spawn dispatch-prescheduler thread");

        (scheduler, handle)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Submits a bundle for future release. Fails with `PreschedulerFull`
    /// if at capacity and compaction cannot free room.
    pub fn submit(
        &self,
        deadline_ntp: NtpTimeTag,
        session_id: u32,
        tag: String,
        payload: Vec<u8>,
    ) -> Result<(), DispatchError> {
        let mut state = self.state.lock().expect("prescheduler state poisoned");

        if state.heap.len() >= self.capacity {
            state.compact();
            if state.heap.len() >= self.capacity {
                log::warn!(target: "dispatch::prescheduler", "prescheduler at capacity ({} entries), rejecting submission", self.capacity);
                return Err(DispatchError::PreschedulerFull);
            }
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.heap.push(Reverse(HeapEntry { deadline_ntp, sequence, payload }));
        state.live.insert(sequence, LiveMeta { session_id, tag });

        let pending = state.pending() as u64;
        Metrics::watermark(&self.shared.metrics.prescheduler_peak, pending);
        self.shared.metrics.prescheduler_pending.store(pending, Ordering::Relaxed);

        Ok(())
    }

    /// Marks matching entries cancelled. Returns immediately; the next
    /// `tick` (or the very next pop, since state is mutex-protected) will
    /// skip them.
    pub fn cancel(&self, selector: CancelSelector) {
        let mut state = self.state.lock().expect("prescheduler state poisoned");
        let matches: Vec<Sequence> = state
            .live
            .iter()
            .filter(|(_, meta)| selector.matches(meta.session_id, &meta.tag))
            .map(|(seq, _)| *seq)
            .collect();

        for seq in &matches {
            state.live.remove(seq);
            state.cancelled.insert(*seq);
        }

        if !matches.is_empty() {
            Metrics::bump(&self.shared.metrics.prescheduler_cancelled, matches.len() as u64);
            let pending = state.pending() as u64;
            self.shared.metrics.prescheduler_pending.store(pending, Ordering::Relaxed);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().expect("prescheduler state poisoned").pending()
    }

    /// One dispatch pass: releases everything due, retries backpressured
    /// entries, and compacts the heap if cancellation has piled up.
    fn tick(&self) {
        let mut state = self.state.lock().expect("prescheduler state poisoned");

        // Retry queue first: entries that hit ring backpressure last tick.
        let mut still_pending = VecDeque::new();
        while let Some(mut retry) = state.retry_queue.pop_front() {
            match self.shared.inbound.write(&retry.entry.payload) {
                Ok(WriteOutcome::Ok { .. }) => {
                    self.record_dispatch(&retry.entry);
                }
                Ok(WriteOutcome::Full) | Err(_) => {
                    retry.attempts += 1;
                    if retry.attempts >= MAX_RETRY_ATTEMPTS {
                        log::warn!(target: "dispatch::prescheduler", "dropping bundle after {MAX_RETRY_ATTEMPTS} retries against a full inbound ring");
                        Metrics::bump(&self.shared.metrics.prescheduler_retries_failed, 1);
                    } else {
                        still_pending.push_back(retry);
                    }
                }
            }
        }
        state.retry_queue = still_pending;

        loop {
            let Some(Reverse(top)) = state.heap.peek() else { break };

            if state.cancelled.remove(&top.sequence) {
                state.heap.pop();
                continue;
            }

            let headroom = self.shared.clock.secs_until(top.deadline_ntp);
            if headroom > self.dispatch_lead_seconds {
                break;
            }

            let Some(Reverse(entry)) = state.heap.pop() else { break };
            state.live.remove(&entry.sequence);
            let pending = state.pending() as u64;
            self.shared.metrics.prescheduler_pending.store(pending, Ordering::Relaxed);

            match self.shared.inbound.write(&entry.payload) {
                Ok(WriteOutcome::Ok { .. }) => self.record_dispatch(&entry),
                Ok(WriteOutcome::Full) => {
                    if state.retry_queue.len() >= self.retry_capacity {
                        state.retry_queue.pop_front();
                        Metrics::bump(&self.shared.metrics.prescheduler_retries_failed, 1);
                    }
                    state.retry_queue.push_back(RetryEntry { entry, attempts: 0 });
                }
                Err(_) => {
                    // Payload too large for the ring. Submission-time
                    // validation in the direct writer should have caught
                    // this; treat as an unrecoverable drop here.
                    Metrics::bump(&self.shared.metrics.prescheduler_retries_failed, 1);
                }
            }
        }

        let total = state.heap.len();
        if total > 0 && (state.cancelled.len() as f64 / total as f64) > COMPACTION_THRESHOLD {
            state.compact();
        }
    }

    fn record_dispatch(&self, entry: &HeapEntry) {
        Metrics::bump(&self.shared.metrics.prescheduler_dispatched, 1);
        let actual_write_ntp = self.shared.clock.now();
        let headroom_us =
            ((entry.deadline_ntp.as_secs_f64() - actual_write_ntp.as_secs_f64()) * 1_000_000.0) as i64;
        self.shared.metrics.record_headroom_us(headroom_us);
    }
}
