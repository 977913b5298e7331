use std::fmt::{Display, Formatter};

/// Rational time base, e.g. 1/90000 for RTP video or 1/48000 for Opus audio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rational(pub i32, pub i32);

impl Rational {
    pub fn new(num: i32, den: i32) -> Self {
        Self(num, den)
    }

    pub fn numerator(&self) -> i32 {
        self.0
    }

    pub fn denominator(&self) -> i32 {
        self.1
    }

    /// Convert a timestamp in this time base to milliseconds.
    pub fn ts_ms(&self, ts: i64) -> u64 {
        let ts = ts.max(0) as u64;
        let num = self.0.max(0) as u64;
        let den = self.1.max(1) as u64;
        ts * 1000 * num / den
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.0, self.1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Data,
}

/// Immutable description of one elementary stream, enumerated once when the
/// source is opened. The index is the stream's identity for the life of the
/// session and is never reused while a chain for it exists.
#[derive(Clone, Debug)]
pub struct StreamInfo {
    index: usize,
    kind: MediaKind,
    time_base: Rational,
}

impl StreamInfo {
    pub fn new(index: usize, kind: MediaKind, time_base: Rational) -> Self {
        Self {
            index,
            kind,
            time_base,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn is_audio(&self) -> bool {
        self.kind == MediaKind::Audio
    }
}
