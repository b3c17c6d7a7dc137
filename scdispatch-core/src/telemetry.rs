//! Audio-block telemetry: latency/jitter monitoring for `audio_callback.rs`.
//!
//! A fixed-size ring of tick durations with an allocation-free `record` and
//! a windowed `take_summary`, generalized from one fixed tick budget to
//! whatever block budget this crate's host reports (a tight budget, with a
//! typical quantum of 128 frames, roughly 2.7ms at 48kHz). This is ambient
//! observability alongside `metrics.rs`'s counters — it exists so an
//! embedder can see whether `process_block` is keeping up with the host's
//! callback cadence.

use std::time::Duration;

const TICK_BUFFER_SIZE: usize = 256;

/// Collects `process_block` duration samples in a fixed-size ring.
/// Allocation-free: every method after construction touches only its own
/// arrays, so it is safe to drive from the audio thread.
pub struct BlockTelemetry {
    durations_us: [u32; TICK_BUFFER_SIZE],
    idx: usize,
    max_us: u32,
    overrun_count: u64,
    sample_count: usize,
}

impl Default for BlockTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTelemetry {
    pub fn new() -> Self {
        Self {
            durations_us: [0; TICK_BUFFER_SIZE],
            idx: 0,
            max_us: 0,
            overrun_count: 0,
            sample_count: 0,
        }
    }

    /// Records one `process_block` call's wall time against `budget_us`
    /// (the host's block period, e.g. 2700us for 128 frames at 48kHz).
    #[inline]
    pub fn record(&mut self, duration: Duration, budget_us: u32) {
        let us = duration.as_micros().min(u32::MAX as u128) as u32;

        self.durations_us[self.idx] = us;
        self.idx = (self.idx + 1) % TICK_BUFFER_SIZE;
        if self.sample_count < TICK_BUFFER_SIZE {
            self.sample_count += 1;
        }
        if us > self.max_us {
            self.max_us = us;
        }
        if us > budget_us {
            self.overrun_count += 1;
        }
    }

    /// `(avg_us, max_us, p95_us, cumulative_overruns)` over the current
    /// window. Resets the windowed max; `cumulative_overruns` never resets.
    pub fn take_summary(&mut self) -> BlockTelemetrySummary {
        if self.sample_count == 0 {
            return BlockTelemetrySummary::default();
        }

        let sum: u64 = self.durations_us[..self.sample_count].iter().map(|&x| x as u64).sum();
        let avg_us = (sum / self.sample_count as u64) as u32;

        let mut sorted = self.durations_us;
        sorted[..self.sample_count].sort_unstable();
        let p95_idx = (self.sample_count * 95 / 100).max(1) - 1;
        let p95_us = sorted[p95_idx.min(self.sample_count - 1)];

        let max_us = self.max_us;
        let summary = BlockTelemetrySummary { avg_us, max_us, p95_us, overruns: self.overrun_count };
        self.max_us = 0;
        summary
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockTelemetrySummary {
    pub avg_us: u32,
    pub max_us: u32,
    pub p95_us: u32,
    pub overruns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_and_tracks_max() {
        let mut t = BlockTelemetry::new();
        t.record(Duration::from_micros(100), 2700);
        t.record(Duration::from_micros(200), 2700);
        t.record(Duration::from_micros(300), 2700);

        let summary = t.take_summary();
        assert_eq!(summary.avg_us, 200);
        assert_eq!(summary.max_us, 300);
        assert_eq!(summary.overruns, 0);
    }

    #[test]
    fn overruns_against_block_budget_are_counted_cumulatively() {
        let mut t = BlockTelemetry::new();
        t.record(Duration::from_micros(2000), 2700);
        t.record(Duration::from_micros(3000), 2700); // overrun
        t.record(Duration::from_micros(4000), 2700); // overrun

        let first = t.take_summary();
        assert_eq!(first.overruns, 2);
        assert_eq!(first.max_us, 4000);

        t.record(Duration::from_micros(1000), 2700);
        let second = t.take_summary();
        // Cumulative overrun count carries over; windowed max resets.
        assert_eq!(second.overruns, 2);
        assert_eq!(second.max_us, 1000);
    }

    #[test]
    fn empty_summary_before_any_sample() {
        let mut t = BlockTelemetry::new();
        assert_eq!(t.take_summary(), BlockTelemetrySummary::default());
    }
}
