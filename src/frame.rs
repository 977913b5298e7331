use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::guard::Lease;

/// Picture type hint carried by decoded video frames. `Intra` frames are safe
/// stream entry points for downstream encoders.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PictureType {
    #[default]
    Unknown,
    Intra,
    Inter,
}

pub struct RawVideoFrame {
    width: u32,
    height: u32,
    format: String,
    pts: Option<i64>,
    kind: PictureType,
    hw: bool,
    data: Bytes,
    lease: Option<Lease>,
}

impl RawVideoFrame {
    pub fn new(width: u32, height: u32, format: &str, data: Bytes) -> Self {
        Self {
            width,
            height,
            format: format.to_string(),
            pts: None,
            kind: PictureType::Unknown,
            hw: false,
            data,
            lease: None,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_kind(mut self, kind: PictureType) -> Self {
        self.kind = kind;
        self
    }

    /// Mark the frame data as resident on a hardware device rather than in
    /// system memory.
    pub fn with_hw(mut self) -> Self {
        self.hw = true;
        self
    }

    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn kind(&self) -> PictureType {
        self.kind
    }

    pub fn is_hw(&self) -> bool {
        self.hw
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

pub struct RawAudioFrame {
    samples: usize,
    format: String,
    pts: Option<i64>,
    data: Bytes,
    lease: Option<Lease>,
}

impl RawAudioFrame {
    pub fn new(samples: usize, format: &str, data: Bytes) -> Self {
        Self {
            samples,
            format: format.to_string(),
            pts: None,
            data,
            lease: None,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }
}

/// One decoded unit: uncompressed pixels or audio samples with a presentation
/// timestamp. Produced by a decoder or filter; consumed by the next stage or
/// the caller, which takes over its lease.
pub enum RawFrame {
    Video(RawVideoFrame),
    Audio(RawAudioFrame),
}

impl RawFrame {
    pub fn pts(&self) -> Option<i64> {
        match self {
            RawFrame::Video(f) => f.pts(),
            RawFrame::Audio(f) => f.pts(),
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, RawFrame::Video(_))
    }

    pub fn as_video(&self) -> Option<&RawVideoFrame> {
        match self {
            RawFrame::Video(f) => Some(f),
            RawFrame::Audio(_) => None,
        }
    }

    pub fn as_audio(&self) -> Option<&RawAudioFrame> {
        match self {
            RawFrame::Audio(f) => Some(f),
            RawFrame::Video(_) => None,
        }
    }

    /// Return the frame's buffer to the pool it was drawn from (a hardware
    /// surface pool, typically). Frames without a lease are simply dropped.
    pub fn release(self) {
        let lease = match self {
            RawFrame::Video(f) => f.lease,
            RawFrame::Audio(f) => f.lease,
        };
        if let Some(lease) = lease {
            lease.release();
        }
    }
}

impl std::fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawFrame::Video(v) => f
                .debug_struct("RawVideoFrame")
                .field("width", &v.width)
                .field("height", &v.height)
                .field("format", &v.format)
                .field("pts", &v.pts)
                .finish(),
            RawFrame::Audio(a) => f
                .debug_struct("RawAudioFrame")
                .field("samples", &a.samples)
                .field("format", &a.format)
                .field("pts", &a.pts)
                .finish(),
        }
    }
}

/// Plain owned snapshot of a frame, safe to clone and broadcast to any number
/// of subscribers. The original frame's lease can be released as soon as the
/// view is taken.
#[derive(Clone, Debug, Default)]
pub struct FrameView {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub samples: usize,
    pub format: String,
    pub pts: i64,
    pub is_key: bool,
}

impl From<&RawFrame> for FrameView {
    fn from(frame: &RawFrame) -> Self {
        match frame {
            RawFrame::Video(f) => Self {
                data: f.data.clone(),
                width: f.width,
                height: f.height,
                samples: 0,
                format: f.format.clone(),
                pts: f.pts.unwrap_or(0),
                is_key: f.kind == PictureType::Intra,
            },
            RawFrame::Audio(f) => Self {
                data: f.data.clone(),
                width: 0,
                height: 0,
                samples: f.samples,
                format: f.format.clone(),
                pts: f.pts.unwrap_or(0),
                is_key: false,
            },
        }
    }
}

impl Display for FrameView {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "FrameView data_len: {}, width: {}, height: {}, samples: {}, format: {}, pts: {}, is_key: {}",
            self.data.len(),
            self.width,
            self.height,
            self.samples,
            self.format,
            self.pts,
            self.is_key
        )
    }
}
