//! OSC 1.0 codec plus the crate-private opaque-identifier extension type
//! tag.
//!
//! Hand-written rather than built on an OSC codec crate: the wire extension
//! that carries opaque 16-byte node identifiers (which must never reach the
//! engine as-is) needs a type tag no off-the-shelf codec has a concept of,
//! and the hot fast-path encoder needs a pre-sized-buffer, zero-allocation
//! API. See `DESIGN.md` for the dependency-drop rationale.

mod codec;
mod error;
mod types;

pub use codec::{decode, encode_fast, encode_general};
pub use error::OscError;
pub use types::{NtpTimeTag, OscArg, OscBundleOwned, OscMessageOwned, OscPacketOwned};

/// Default character used for the opaque-16-byte-identifier type tag
/// (config option `ntpIdentifierType`).
pub const DEFAULT_IDENTIFIER_TAG: u8 = b'u';
