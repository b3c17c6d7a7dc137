//! Direct writer: the single function that classifies a bundle and either
//! writes it straight to the inbound ring or hands it to the prescheduler.
//!
//! Identifier rewriting is applied once, here, immediately before a packet
//! is either encoded to the ring or handed to the prescheduler — both
//! release paths therefore always carry already-rewritten, wire-final
//! bytes, which keeps `prescheduler.rs` and `engine_scheduler.rs` free of
//! any identifier-map dependency.

use std::sync::Arc;

use crate::config::Config;
use crate::error::SendOutcome;
use crate::identifier::{rewrite_outbound, IdentifierMap};
use crate::metrics::Metrics;
use crate::osc::{encode_general, NtpTimeTag, OscPacketOwned};
use crate::prescheduler::Prescheduler;
use crate::ring_buffer::WriteOutcome;
use crate::shared_region::SharedRegion;

/// Routing tags carried alongside a submission.
#[derive(Debug, Clone)]
pub struct SendMeta {
    pub session_id: u32,
    pub tag: String,
    /// `None` is "untimed" — dispatched as-is regardless of timetag.
    pub target_ntp: Option<NtpTimeTag>,
}

pub struct DirectWriter {
    shared: Arc<SharedRegion>,
    prescheduler: Arc<Prescheduler>,
    lookahead_seconds: f64,
    engine_scheduler_slot_bytes: usize,
}

impl DirectWriter {
    pub fn new(shared: Arc<SharedRegion>, prescheduler: Arc<Prescheduler>, config: &Config) -> Self {
        Self {
            shared,
            prescheduler,
            lookahead_seconds: config.lookahead_seconds,
            engine_scheduler_slot_bytes: config.engine_scheduler_slot_bytes,
        }
    }

    /// `send(bytes, {session, tag, target_ntp}) -> ok | backpressure | too-large`.
    /// `packet` is mutated in place by identifier rewriting.
    pub fn send(&self, mut packet: OscPacketOwned, meta: SendMeta, id_tag: u8) -> SendOutcome {
        rewrite_outbound(&self.shared.identifiers, &mut packet);

        let timetag = packet.timetag();
        let is_untimed = timetag.is_none() || timetag.map(|t| t.is_immediate()).unwrap_or(false);

        if is_untimed {
            return self.write_direct(&packet, id_tag);
        }

        let target_ntp = meta.target_ntp.unwrap_or_else(|| timetag.unwrap());
        let headroom = self.shared.clock.secs_until(target_ntp);
        let encoded_len_hint = encode_general(&packet, id_tag).len();

        if headroom <= self.lookahead_seconds || encoded_len_hint > self.engine_scheduler_slot_bytes {
            // A past-due bundle (headroom < 0) is written as-is; lateness
            // is counted once, at intake in the engine-side scheduler.
            return self.write_direct(&packet, id_tag);
        }

        let bytes = encode_general(&packet, id_tag);
        match self.prescheduler.submit(target_ntp, meta.session_id, meta.tag, bytes) {
            Ok(()) => SendOutcome::Ok,
            Err(_) => SendOutcome::Backpressure,
        }
    }

    fn write_direct(&self, packet: &OscPacketOwned, id_tag: u8) -> SendOutcome {
        let bytes = encode_general(packet, id_tag);
        if bytes.len() > self.shared.inbound.capacity().saturating_sub(4) {
            log::warn!(target: "dispatch::ring", "dropping {}-byte frame, larger than the inbound ring itself", bytes.len());
            return SendOutcome::TooLarge;
        }
        match self.shared.inbound.write(&bytes) {
            Ok(WriteOutcome::Ok { .. }) => {
                Metrics::bump(&self.shared.metrics.messages_sent, 1);
                SendOutcome::Ok
            }
            Ok(WriteOutcome::Full) => {
                log::warn!(target: "dispatch::ring", "inbound ring full, backpressure on direct send");
                SendOutcome::Backpressure
            }
            Err(_) => SendOutcome::TooLarge,
        }
    }
}
