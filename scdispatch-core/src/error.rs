//! Error kinds for the dispatch core.
//!
//! Callers need to branch on error *kind*, so this stays a small
//! dependency-free enum with a hand-written `Display`/`Error` impl rather
//! than a macro-generated one.

use std::fmt;

use crate::osc::OscError;

/// Every error surfaced at a core boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Malformed OSC bytes, rejected at the codec boundary.
    MalformedOsc(OscError),
    /// A ring buffer write failed because free space was insufficient.
    RingFull,
    /// A frame exceeds `capacity - 4` and can never fit the ring.
    FrameTooLargeForRing { len: usize, max: usize },
    /// The prescheduler's bounded heap is at capacity.
    PreschedulerFull,
    /// A scheduled bundle exceeds the engine-side scheduler's fixed slot size.
    BundleTooLarge { len: usize, max: usize },
    /// `purge()` did not observe both acknowledgements within the timeout.
    PurgeTimeout,
    /// `sync(id)` did not observe a matching `/synced` reply within the
    /// timeout.
    SyncTimeout,
    /// Configuration failed validation (surfaced synchronously from the
    /// facade's init/constructor, never async).
    InvalidConfig(String),
    /// An operation was attempted from a facade state that forbids it.
    WrongState { expected: &'static str, actual: &'static str },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::MalformedOsc(e) => write!(f, "malformed OSC: {e}"),
            DispatchError::RingFull => write!(f, "ring buffer full"),
            DispatchError::FrameTooLargeForRing { len, max } => {
                write!(f, "frame of {len} bytes exceeds ring capacity ({max} bytes max)")
            }
            DispatchError::PreschedulerFull => write!(f, "prescheduler at capacity"),
            DispatchError::BundleTooLarge { len, max } => {
                write!(f, "bundle of {len} bytes exceeds engine scheduler slot size ({max} bytes max)")
            }
            DispatchError::PurgeTimeout => write!(f, "purge() timed out waiting for acknowledgement"),
            DispatchError::SyncTimeout => write!(f, "sync() timed out waiting for a matching reply"),
            DispatchError::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            DispatchError::WrongState { expected, actual } => {
                write!(f, "expected facade state {expected}, found {actual}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<OscError> for DispatchError {
    fn from(e: OscError) -> Self {
        DispatchError::MalformedOsc(e)
    }
}

/// Outcome of a write attempt into a ring buffer or the prescheduler —
/// distinct from `DispatchError` because backpressure is an expected,
/// retryable outcome rather than an exceptional one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Ok,
    Backpressure,
    TooLarge,
}
