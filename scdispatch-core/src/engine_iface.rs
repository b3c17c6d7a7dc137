//! The boundary between this crate and the opaque DSP engine: the engine
//! itself is treated as opaque, exposing only process/receive/reply
//! primitives and configuration.
//!
//! A narrow trait-object seam: handing the engine a decoded bundle at an
//! exact sample offset, and draining whatever replies it produced since
//! the last call. Process spawning, synthdef compilation, and everything
//! else belong to the engine's own implementation, not to this crate.

use crate::osc::OscMessageOwned;

/// Validated, bounds-checked engine configuration passed through unchanged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub num_buffers: u32,
    pub max_nodes: u32,
    pub num_audio_bus_channels: u32,
    pub num_control_bus_channels: u32,
    pub real_time_memory_kb: u32,
    pub block_size: u32,
    pub preferred_sample_rate: u32,
    pub load_graph_defs: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfigError {
    pub field: &'static str,
}

impl EngineConfig {
    /// Validates the enumerated bounds. The engine itself never validates
    /// its own options — that responsibility sits here, at the boundary,
    /// and nowhere else in this crate.
    pub fn validate(&self) -> Result<(), EngineConfigError> {
        let in_range = |v: u32, lo: u32, hi: u32| v >= lo && v <= hi;
        if !in_range(self.num_buffers, 1, 65_535) {
            return Err(EngineConfigError { field: "numBuffers" });
        }
        if !in_range(self.max_nodes, 1, 65_535) {
            return Err(EngineConfigError { field: "maxNodes" });
        }
        if !in_range(self.num_audio_bus_channels, 1, 4_096) {
            return Err(EngineConfigError { field: "numAudioBusChannels" });
        }
        if !in_range(self.num_control_bus_channels, 1, 65_535) {
            return Err(EngineConfigError { field: "numControlBusChannels" });
        }
        if !in_range(self.real_time_memory_kb, 1, 1_048_576) {
            return Err(EngineConfigError { field: "realTimeMemoryKb" });
        }
        if self.preferred_sample_rate != 0 && !in_range(self.preferred_sample_rate, 8_000, 192_000) {
            return Err(EngineConfigError { field: "preferredSampleRate" });
        }
        Ok(())
    }
}

/// The opaque DSP engine, as seen from inside the audio callback. Every
/// method runs on the audio thread and MUST NOT allocate, block, or lock.
pub trait Engine {
    /// Executes one decoded OSC message at `sample_offset` within the
    /// current audio block.
    fn handle(&mut self, message: &OscMessageOwned, sample_offset: u32);

    /// Drains whatever reply messages the engine produced since the last
    /// call. Called once per block, after `handle` has been invoked for
    /// every message due in that block.
    fn poll_replies(&mut self) -> Vec<OscMessageOwned>;
}

/// A no-op engine: accepts everything, never replies. Useful for exercising
/// the dispatch pipeline in isolation.
#[derive(Debug, Default)]
pub struct NullEngine;

impl Engine for NullEngine {
    fn handle(&mut self, _message: &OscMessageOwned, _sample_offset: u32) {}
    fn poll_replies(&mut self) -> Vec<OscMessageOwned> {
        Vec::new()
    }
}

/// Records every `handle` call verbatim and lets a test queue up replies to
/// be returned on the next `poll_replies`.
#[derive(Debug, Default)]
pub struct RecordingEngine {
    pub handled: Vec<(OscMessageOwned, u32)>,
    pub queued_replies: Vec<OscMessageOwned>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_reply(&mut self, reply: OscMessageOwned) {
        self.queued_replies.push(reply);
    }
}

impl Engine for RecordingEngine {
    fn handle(&mut self, message: &OscMessageOwned, sample_offset: u32) {
        self.handled.push((message.clone(), sample_offset));
    }

    fn poll_replies(&mut self) -> Vec<OscMessageOwned> {
        std::mem::take(&mut self.queued_replies)
    }
}
