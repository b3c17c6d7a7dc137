//! Purge protocol: a coordinated, doubly-acknowledged clear of the
//! prescheduler heap, the inbound ring, and the engine-side heap.
//!
//! The prescheduler's acknowledgement is synchronous here (`cancel(All)`
//! returns only once every live entry is marked, since its state lives
//! behind one `Mutex` — see `prescheduler.rs`). The audio-side
//! acknowledgement cannot be synchronous: it is set by the audio callback
//! after it observes the sentinel this call writes, so `purge()` polls the
//! shared region's `purge_acked` flag, typically resolving in well under
//! 50ms but bounded by an implementation-defined timeout.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::DispatchError;
use crate::osc::{OscMessageOwned, OscPacketOwned};
use crate::prescheduler::{CancelSelector, Prescheduler};
use crate::ring_buffer::WriteOutcome;
use crate::shared_region::SharedRegion;

/// Reserved address recognised by the audio callback's intake phase as a
/// purge delimiter rather than an engine message — the sentinel itself is
/// the delimiter.
pub const PURGE_SENTINEL_ADDRESS: &str = "/__dispatch_purge__";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(2);

pub fn is_purge_sentinel(packet: &OscPacketOwned) -> bool {
    matches!(packet, OscPacketOwned::Message(m) if m.address == PURGE_SENTINEL_ADDRESS)
}

fn sentinel_packet() -> OscPacketOwned {
    OscPacketOwned::Message(OscMessageOwned { address: PURGE_SENTINEL_ADDRESS.to_string(), args: vec![] })
}

/// Runs the full purge sequence. Blocks the calling (application)
/// context until both acknowledgements are observed or `timeout` elapses.
pub fn purge(shared: &Arc<SharedRegion>, prescheduler: &Prescheduler, id_tag: u8) -> Result<(), DispatchError> {
    purge_with_timeout(shared, prescheduler, id_tag, DEFAULT_TIMEOUT)
}

pub fn purge_with_timeout(
    shared: &Arc<SharedRegion>,
    prescheduler: &Prescheduler,
    id_tag: u8,
    timeout: Duration,
) -> Result<(), DispatchError> {
    // Step 1: cancel-all against the prescheduler; its ack is this call's
    // return (see module docs).
    prescheduler.cancel(CancelSelector::All);

    // Step 2/3: write the sentinel; anything submitted before it is still
    // in the ring ahead of it and will be drained/cleared by the audio
    // thread along with the sentinel observation.
    shared.purge_acked.store(false, Ordering::Release);
    let bytes = crate::osc::encode_general(&sentinel_packet(), id_tag);
    match shared.inbound.write(&bytes) {
        Ok(WriteOutcome::Ok { .. }) => {}
        Ok(WriteOutcome::Full) | Err(_) => {
            log::warn!(target: "dispatch::purge", "could not write the purge sentinel, inbound ring unavailable");
            return Err(DispatchError::PurgeTimeout);
        }
    }

    // Step 4: await the audio thread's acknowledgement.
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if shared.purge_acked.load(Ordering::Acquire) {
            return Ok(());
        }
        thread::sleep(POLL_INTERVAL);
    }

    log::warn!(target: "dispatch::purge", "purge timed out after {timeout:?} waiting for the audio thread's acknowledgement");
    Err(DispatchError::PurgeTimeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::shared_region::RingSizes;

    #[test]
    fn sentinel_is_recognised_by_address() {
        let packet = sentinel_packet();
        assert!(is_purge_sentinel(&packet));
        let other = OscPacketOwned::Message(OscMessageOwned { address: "/s_new".to_string(), args: vec![] });
        assert!(!is_purge_sentinel(&other));
    }

    #[test]
    fn purge_times_out_if_audio_thread_never_acks() {
        let shared = SharedRegion::new(RingSizes::default());
        let config = Config::from_overrides(&Default::default()).unwrap();
        let (scheduler, _handle) = Prescheduler::spawn(Arc::clone(&shared), &config);
        scheduler.request_shutdown();

        let result = purge_with_timeout(&shared, &scheduler, b'u', Duration::from_millis(20));
        assert_eq!(result, Err(DispatchError::PurgeTimeout));
    }

    #[test]
    fn purge_resolves_once_audio_side_flag_is_set() {
        let shared = SharedRegion::new(RingSizes::default());
        let config = Config::from_overrides(&Default::default()).unwrap();
        let (scheduler, _handle) = Prescheduler::spawn(Arc::clone(&shared), &config);
        scheduler.request_shutdown();

        let flagger = Arc::clone(&shared);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            flagger.purge_acked.store(true, Ordering::Release);
        });

        let result = purge_with_timeout(&shared, &scheduler, b'u', Duration::from_secs(1));
        assert_eq!(result, Ok(()));
    }

    #[test]
    fn purge_clears_prescheduler_pending_entries() {
        let shared = SharedRegion::new(RingSizes::default());
        let config = Config::from_overrides(&Default::default()).unwrap();
        let (scheduler, _handle) = Prescheduler::spawn(Arc::clone(&shared), &config);
        scheduler.request_shutdown();

        let far = shared.clock.at_offset(30.0);
        scheduler.submit(far, 1, "t".to_string(), b"x".to_vec()).unwrap();
        assert_eq!(scheduler.pending_count(), 1);

        shared.purge_acked.store(true, Ordering::Release);
        let result = purge_with_timeout(&shared, &scheduler, b'u', Duration::from_millis(50));
        assert_eq!(result, Ok(()));
        assert_eq!(scheduler.pending_count(), 0);
    }
}
