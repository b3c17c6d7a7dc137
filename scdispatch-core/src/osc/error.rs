use std::fmt;

/// A single "malformed OSC" error kind with an offset: truncated frame,
/// unknown type tag, address not starting with `/`, non-ASCII inside the
/// address all collapse into this one reason-plus-offset shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OscError {
    pub offset: usize,
    pub reason: OscErrorReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscErrorReason {
    Truncated,
    UnknownTypeTag(u8),
    AddressMissingSlash,
    AddressNonAscii,
    BufferTooSmall,
}

impl OscError {
    pub(super) fn truncated(offset: usize) -> Self {
        OscError { offset, reason: OscErrorReason::Truncated }
    }
    pub(super) fn unknown_tag(offset: usize, tag: u8) -> Self {
        OscError { offset, reason: OscErrorReason::UnknownTypeTag(tag) }
    }
    pub(super) fn bad_address(offset: usize, non_ascii: bool) -> Self {
        OscError {
            offset,
            reason: if non_ascii {
                OscErrorReason::AddressNonAscii
            } else {
                OscErrorReason::AddressMissingSlash
            },
        }
    }
    pub(super) fn buffer_too_small(offset: usize) -> Self {
        OscError { offset, reason: OscErrorReason::BufferTooSmall }
    }
}

impl fmt::Display for OscError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            OscErrorReason::Truncated => write!(f, "truncated OSC frame at offset {}", self.offset),
            OscErrorReason::UnknownTypeTag(tag) => {
                write!(f, "unknown OSC type tag {:?} at offset {}", tag as char, self.offset)
            }
            OscErrorReason::AddressMissingSlash => {
                write!(f, "OSC address missing leading '/' at offset {}", self.offset)
            }
            OscErrorReason::AddressNonAscii => {
                write!(f, "non-ASCII byte in OSC address at offset {}", self.offset)
            }
            OscErrorReason::BufferTooSmall => {
                write!(f, "destination buffer too small at offset {}", self.offset)
            }
        }
    }
}

impl std::error::Error for OscError {}
