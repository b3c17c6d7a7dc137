/// 8-byte OSC NTP timetag: 32-bit seconds since 1900-01-01 UTC, 32-bit
/// fractional seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NtpTimeTag {
    pub seconds: u32,
    pub fraction: u32,
}

impl NtpTimeTag {
    /// "Immediate": all-zero except the low bit of the fraction.
    pub const IMMEDIATE: NtpTimeTag = NtpTimeTag { seconds: 0, fraction: 1 };

    pub fn is_immediate(&self) -> bool {
        *self == Self::IMMEDIATE
    }

    /// Seconds-since-1900 as an `f64`, for arithmetic against "NTP now".
    pub fn as_secs_f64(&self) -> f64 {
        self.seconds as f64 + (self.fraction as f64 / u32::MAX as f64)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        if secs <= 0.0 {
            return NtpTimeTag { seconds: 0, fraction: 0 };
        }
        let whole = secs.trunc() as u32;
        let frac = (secs.fract() * u32::MAX as f64) as u32;
        NtpTimeTag { seconds: whole, fraction: frac }
    }
}

/// A single OSC argument, as a tagged variant over the dynamic arg types
/// OSC 1.0 and this crate's identifier extension carry.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int32(i32),
    Float32(f32),
    String(String),
    Blob(Vec<u8>),
    TimeTag(NtpTimeTag),
    /// The crate's opaque-16-byte node identifier extension. This
    /// variant MUST be rewritten away (→ `Int32`) before the bytes reach the
    /// ring buffer; the identifier rewriter (`identifier` module) is the
    /// only place that produces/consumes it across the ring boundary.
    Uuid16([u8; 16]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscMessageOwned {
    pub address: String,
    pub args: Vec<OscArg>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OscBundleOwned {
    pub timetag: NtpTimeTag,
    pub elements: Vec<OscPacketOwned>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OscPacketOwned {
    Message(OscMessageOwned),
    Bundle(OscBundleOwned),
}

impl OscPacketOwned {
    /// The timetag governing this packet's dispatch, or `None` for a bare
    /// message (which is always dispatched immediately).
    pub fn timetag(&self) -> Option<NtpTimeTag> {
        match self {
            OscPacketOwned::Message(_) => None,
            OscPacketOwned::Bundle(b) => Some(b.timetag),
        }
    }
}
