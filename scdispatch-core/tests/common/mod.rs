//! Shared scaffolding for the end-to-end scenario tests: a minimal
//! audio-thread simulator that drives `AudioCallback::process_block` on
//! its own thread at roughly the host's block cadence, since the crate
//! itself never spawns that thread (the real audio thread belongs to the
//! host).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use scdispatch_core::audio_callback::AudioCallback;
use scdispatch_core::config::ConfigOverrides;
use scdispatch_core::engine_iface::Engine;
use scdispatch_core::facade::Facade;
use scdispatch_core::osc::{OscArg, OscMessageOwned};
use scdispatch_core::shared_region::RingSizes;

pub const SAMPLE_RATE: f64 = 48_000.0;
pub const BLOCK_FRAMES: u32 = 128;
pub const BLOCK_SECS: f64 = BLOCK_FRAMES as f64 / SAMPLE_RATE;

/// An [`Engine`] double that echoes lifecycle replies a real scsynth-like
/// engine would produce, so the identifier rewriter and reply path have
/// something realistic to round-trip.
pub struct ScenarioEngine {
    pub pending: Vec<OscMessageOwned>,
    pub handled_addresses: Vec<String>,
}

impl ScenarioEngine {
    pub fn new() -> Self {
        Self { pending: Vec::new(), handled_addresses: Vec::new() }
    }
}

impl Engine for ScenarioEngine {
    fn handle(&mut self, message: &OscMessageOwned, _sample_offset: u32) {
        self.handled_addresses.push(message.address.clone());
        if message.address == "/s_new" {
            if let Some(OscArg::Int32(id)) = message.args.first() {
                // node-created: nodeID, parent, prev, next, isGroup, (head, tail).
                self.pending.push(OscMessageOwned {
                    address: "/n_go".to_string(),
                    args: vec![
                        OscArg::Int32(*id),
                        OscArg::Int32(0),
                        OscArg::Int32(-1),
                        OscArg::Int32(-1),
                        OscArg::Int32(0),
                    ],
                });
            }
        }
    }

    fn poll_replies(&mut self) -> Vec<OscMessageOwned> {
        std::mem::take(&mut self.pending)
    }
}

/// Drives `process_block` on its own thread at the configured block
/// cadence until `stop()` is called, forwarding every block's OSC-log
/// frames into the facade's `out:osc` events.
pub struct AudioThreadSim {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AudioThreadSim {
    pub fn spawn(facade: Arc<Facade>, engine: ScenarioEngine) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let shared = facade.shared_region();
        let id_tag = facade.config().ntp_identifier_tag;
        let handle = thread::Builder::new()
            .name("test-audio-thread".to_string())
            .spawn(move || {
                let mut cb = AudioCallback::new(Arc::clone(&shared), engine, id_tag, SAMPLE_RATE, 128, 16_384);
                while flag.load(Ordering::Relaxed) {
                    let start = shared.clock.now();
                    let end = shared.clock.at_offset(BLOCK_SECS);
                    let report = cb.process_block(start, end);
                    facade.report_block(&report);
                    thread::sleep(Duration::from_secs_f64(BLOCK_SECS));
                }
            })
            .expect("failed to spawn test-audio-thread");
        Self { running, handle: Some(handle) }
    }

    pub fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn init_facade() -> Arc<Facade> {
    Facade::init(ConfigOverrides::default(), RingSizes::default()).expect("facade init")
}

/// A thread-safe sink for `on_event` callbacks, so scenario tests can
/// assert on what fired without racing the reader/audio threads.
pub type EventSink<T> = Arc<Mutex<Vec<T>>>;

pub fn new_sink<T>() -> EventSink<T> {
    Arc::new(Mutex::new(Vec::new()))
}
