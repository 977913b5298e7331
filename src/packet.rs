use bytes::Bytes;

use crate::guard::Lease;
use crate::stream::Rational;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketFlags {
    pub key: bool,
    pub corrupt: bool,
    pub discard: bool,
    pub disposable: bool,
}

/// One encoded unit as produced by the demuxer or an encoder: compressed
/// payload plus timestamps in the stream's time base. A packet is consumed by
/// exactly one decoder or forwarded untouched to a sink; whoever consumes it
/// takes over its lease.
pub struct RawPacket {
    index: usize,
    data: Bytes,
    pts: Option<i64>,
    dts: Option<i64>,
    duration: i64,
    flags: PacketFlags,
    time_base: Rational,
    lease: Option<Lease>,
}

impl RawPacket {
    pub fn new(index: usize, data: Bytes, time_base: Rational) -> Self {
        Self {
            index,
            data,
            pts: None,
            dts: None,
            duration: 0,
            flags: PacketFlags::default(),
            time_base,
            lease: None,
        }
    }

    pub fn with_pts(mut self, pts: i64) -> Self {
        self.pts = Some(pts);
        self
    }

    pub fn with_dts(mut self, dts: i64) -> Self {
        self.dts = Some(dts);
        self
    }

    pub fn with_duration(mut self, duration: i64) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Retag the packet with a different stream identity. Used to stamp
    /// encoder output with the read-side stream index it originated from.
    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn dts(&self) -> Option<i64> {
        self.dts
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn is_key(&self) -> bool {
        self.flags.key
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn pts_ms(&self) -> Option<u64> {
        self.pts.map(|pts| self.time_base.ts_ms(pts))
    }

    /// Return the packet's buffer to the pool it was drawn from. Packets
    /// without a lease are plain heap data and are simply dropped.
    pub fn release(self) {
        if let Some(lease) = self.lease {
            lease.release();
        }
    }
}

impl std::fmt::Debug for RawPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPacket")
            .field("index", &self.index)
            .field("size", &self.data.len())
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("key", &self.flags.key)
            .finish()
    }
}
