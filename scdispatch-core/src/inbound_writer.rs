//! Worker-to-worker transport: an auxiliary writer that bypasses the facade
//! and writes straight into the inbound ring, carrying a `source_id`
//! assigned at creation so `osc_log.rs` can attribute frames.
//!
//! Two shapes behind one trait: [`SharedHandleWriter`] writes directly
//! (this crate always runs in one process, so shared memory is always
//! available natively); [`ProxyWriter`] forwards bytes to a single writer
//! thread over a channel instead, for callers that want write ownership of
//! the ring concentrated on one thread. Both behave identically apart from
//! latency.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::SendOutcome;
use crate::ring_buffer::WriteOutcome;
use crate::shared_region::SharedRegion;

pub trait InboundWriter {
    fn source_id(&self) -> u32;
    fn write(&self, bytes: &[u8]) -> SendOutcome;
}

/// Writes directly into the shared region's inbound ring.
pub struct SharedHandleWriter {
    shared: Arc<SharedRegion>,
    source_id: u32,
}

impl SharedHandleWriter {
    pub fn new(shared: Arc<SharedRegion>) -> Self {
        let source_id = shared.assign_source_id();
        Self { shared, source_id }
    }
}

impl InboundWriter for SharedHandleWriter {
    fn source_id(&self) -> u32 {
        self.source_id
    }

    fn write(&self, bytes: &[u8]) -> SendOutcome {
        match self.shared.inbound.write(bytes) {
            Ok(WriteOutcome::Ok { .. }) => SendOutcome::Ok,
            Ok(WriteOutcome::Full) => SendOutcome::Backpressure,
            Err(_) => SendOutcome::TooLarge,
        }
    }
}

struct QueuedFrame {
    bytes: Vec<u8>,
}

/// Forwards bytes to a single dedicated writer thread instead of touching
/// the ring directly, for callers that do not have shared-memory access to
/// the region.
pub struct ProxyWriter {
    source_id: u32,
    tx: Sender<QueuedFrame>,
}

impl ProxyWriter {
    pub fn spawn(shared: Arc<SharedRegion>) -> (Self, JoinHandle<()>) {
        let source_id = shared.assign_source_id();
        let (tx, rx): (Sender<QueuedFrame>, Receiver<QueuedFrame>) = crossbeam_channel::bounded(512);

        let handle = thread::Builder::new()
            .name(format!("dispatch-inbound-proxy-{source_id}"))
            .spawn(move || {
                for queued in rx.iter() {
                    let _ = shared.inbound.write(&queued.bytes);
                }
            })
            .expect("failed to spawn dispatch-inbound-proxy thread");

        (Self { source_id, tx }, handle)
    }
}

impl InboundWriter for ProxyWriter {
    fn source_id(&self) -> u32 {
        self.source_id
    }

    fn write(&self, bytes: &[u8]) -> SendOutcome {
        match self.tx.try_send(QueuedFrame { bytes: bytes.to_vec() }) {
            Ok(()) => SendOutcome::Ok,
            Err(TrySendError::Full(_)) => SendOutcome::Backpressure,
            Err(TrySendError::Disconnected(_)) => SendOutcome::Backpressure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared_region::RingSizes;

    #[test]
    fn shared_handle_writer_gets_a_nonzero_source_id_and_writes_through() {
        let shared = SharedRegion::new(RingSizes::default());
        let writer = SharedHandleWriter::new(Arc::clone(&shared));
        assert!(writer.source_id() >= 1);
        assert_eq!(writer.write(b"hello"), SendOutcome::Ok);
        assert!(shared.inbound.read().is_some());
    }

    #[test]
    fn distinct_writers_get_distinct_source_ids() {
        let shared = SharedRegion::new(RingSizes::default());
        let a = SharedHandleWriter::new(Arc::clone(&shared));
        let b = SharedHandleWriter::new(Arc::clone(&shared));
        assert_ne!(a.source_id(), b.source_id());
    }
}
