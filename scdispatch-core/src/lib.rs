//! Dispatch and timing core for a SuperCollider-compatible synthesis engine.
//!
//! This crate owns everything between "application submits OSC bytes with a
//! target time and routing tags" and "audio thread consumes a byte-exact
//! bundle at the right moment, executes it, and deposits replies." The DSP
//! engine itself, audio I/O, resource fetching, and UI are external
//! collaborators reached only through [`engine_iface::Engine`].

pub mod audio_callback;
pub mod config;
pub mod direct_writer;
pub mod engine_iface;
pub mod engine_scheduler;
pub mod error;
pub mod facade;
pub mod identifier;
pub mod inbound_writer;
pub mod metrics;
pub mod ntp;
pub mod osc;
pub mod osc_log;
pub mod prescheduler;
pub mod purge;
pub mod reply_path;
pub mod resource_cache;
pub mod ring_buffer;
pub mod shared_region;
pub mod telemetry;

pub use config::Config;
pub use error::DispatchError;
pub use facade::{Facade, FacadeEvent};
