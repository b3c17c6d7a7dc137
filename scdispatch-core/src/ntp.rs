//! Monotonic-to-NTP clock anchor.
//!
//! Captures a monotonic instant alongside the wall-clock NTP seconds it
//! corresponds to, then derives later NTP timestamps by adding elapsed
//! monotonic time to the anchor. The anchor lives in an `AtomicU64` owned by
//! the facade/shared region rather than a `static`, so there is no
//! process-global mutable state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::osc::NtpTimeTag;

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch
/// (1970-01-01).
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

/// Converts between monotonic `Instant`s and OSC NTP timetags by anchoring
/// once at construction. All later conversions are pure arithmetic against
/// that anchor, so two clocks created at different times stay internally
/// consistent even if the system wall clock steps.
pub struct NtpClock {
    anchor_instant: Instant,
    /// NTP seconds-since-1900, as an `f64` bit pattern, corresponding to
    /// `anchor_instant`. Stored as bits in an `AtomicU64` so the clock can
    /// live in shared, lock-free state without a `static`.
    anchor_ntp_bits: AtomicU64,
}

impl NtpClock {
    /// Anchors to the current instant and the current wall-clock time.
    pub fn new() -> Self {
        let now_instant = Instant::now();
        let now_ntp = unix_now_secs() + NTP_UNIX_OFFSET as f64;
        Self {
            anchor_instant: now_instant,
            anchor_ntp_bits: AtomicU64::new(now_ntp.to_bits()),
        }
    }

    /// Re-anchors the clock to the current wall-clock time without
    /// disturbing callers mid-read; already-scheduled deadlines must not
    /// retroactively move. Used on `recover:start`.
    pub fn resync(&self) {
        let now_ntp = unix_now_secs() + NTP_UNIX_OFFSET as f64;
        self.anchor_ntp_bits.store(now_ntp.to_bits(), Ordering::Relaxed);
    }

    fn anchor_ntp_secs(&self) -> f64 {
        f64::from_bits(self.anchor_ntp_bits.load(Ordering::Relaxed))
    }

    /// NTP timetag for "now".
    pub fn now(&self) -> NtpTimeTag {
        self.at_offset(0.0)
    }

    /// NTP timetag for `offset_secs` seconds from now (negative allowed).
    pub fn at_offset(&self, offset_secs: f64) -> NtpTimeTag {
        let elapsed = Instant::now().saturating_duration_since(self.anchor_instant).as_secs_f64();
        NtpTimeTag::from_secs_f64(self.anchor_ntp_secs() + elapsed + offset_secs)
    }

    /// Seconds from now until `deadline` (negative if already past).
    pub fn secs_until(&self, deadline: NtpTimeTag) -> f64 {
        deadline.as_secs_f64() - self.now().as_secs_f64()
    }

    pub fn immediate() -> NtpTimeTag {
        NtpTimeTag::IMMEDIATE
    }
}

impl Default for NtpClock {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn now_tracks_unix_offset() {
        let clock = NtpClock::new();
        let tt = clock.now();
        let expected = unix_now_secs() + NTP_UNIX_OFFSET as f64;
        assert!((tt.as_secs_f64() - expected).abs() < 1.0);
    }

    #[test]
    fn at_offset_moves_forward() {
        let clock = NtpClock::new();
        let now = clock.now().as_secs_f64();
        let later = clock.at_offset(5.0).as_secs_f64();
        assert!((later - now - 5.0).abs() < 0.01);
    }

    #[test]
    fn secs_until_tracks_elapsed_time() {
        let clock = NtpClock::new();
        let deadline = clock.at_offset(0.05);
        sleep(Duration::from_millis(60));
        assert!(clock.secs_until(deadline) < 0.0);
    }

    #[test]
    fn resync_does_not_panic_and_stays_monotonic_forward() {
        let clock = NtpClock::new();
        let before = clock.now().as_secs_f64();
        clock.resync();
        let after = clock.now().as_secs_f64();
        assert!(after >= before);
    }
}
