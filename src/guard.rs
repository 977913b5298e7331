use std::sync::Arc;

use crate::frame::RawFrame;
use crate::packet::RawPacket;

/// A pool that hands out reusable buffers (hardware surfaces, pre-allocated
/// packet storage) and takes them back by ticket. Shared read-only across
/// stages; released tickets may be handed out again immediately.
pub trait SurfacePool: Send + Sync {
    fn release(&self, ticket: u64);
}

/// Proof that a buffer is checked out of a pool. Releasing consumes the
/// lease, so a buffer can never be returned twice; a lease that is dropped
/// without `release` leaves its pool slot checked out, which counting pools
/// surface as a leak.
pub struct Lease {
    ticket: u64,
    pool: Arc<dyn SurfacePool>,
}

impl Lease {
    pub fn new(ticket: u64, pool: Arc<dyn SurfacePool>) -> Self {
        Self { ticket, pool }
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn release(self) {
        self.pool.release(self.ticket);
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("ticket", &self.ticket).finish()
    }
}

enum ScopedBuf {
    Frame(RawFrame),
    Packet(RawPacket),
}

impl ScopedBuf {
    fn release(self) {
        match self {
            ScopedBuf::Frame(f) => f.release(),
            ScopedBuf::Packet(p) => p.release(),
        }
    }
}

/// Pending-release stack for the buffers a single pull has acquired but not
/// yet handed to a stage, a queue, or the caller. Popping transfers a buffer
/// out; everything still on the stack when the guard is dropped or
/// `release_all` runs goes back to its pool in reverse acquisition order.
/// Error paths therefore release exactly the buffers acquired since the last
/// transfer, and never release one twice.
#[derive(Default)]
pub struct ScopeGuard {
    pending: Vec<ScopedBuf>,
}

impl ScopeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_frame(&mut self, frame: RawFrame) {
        self.pending.push(ScopedBuf::Frame(frame));
    }

    pub fn push_packet(&mut self, packet: RawPacket) {
        self.pending.push(ScopedBuf::Packet(packet));
    }

    /// Most recently acquired frame, if the top of the stack is a frame.
    pub fn top_frame(&self) -> Option<&RawFrame> {
        match self.pending.last() {
            Some(ScopedBuf::Frame(f)) => Some(f),
            _ => None,
        }
    }

    /// Transfer the most recently acquired frame out of the guard.
    pub fn pop_frame(&mut self) -> Option<RawFrame> {
        match self.pending.last() {
            Some(ScopedBuf::Frame(_)) => match self.pending.pop() {
                Some(ScopedBuf::Frame(f)) => Some(f),
                _ => None,
            },
            _ => None,
        }
    }

    /// Most recently acquired packet, if the top of the stack is a packet.
    pub fn top_packet(&self) -> Option<&RawPacket> {
        match self.pending.last() {
            Some(ScopedBuf::Packet(p)) => Some(p),
            _ => None,
        }
    }

    /// Transfer the most recently acquired packet out of the guard.
    pub fn pop_packet(&mut self) -> Option<RawPacket> {
        match self.pending.last() {
            Some(ScopedBuf::Packet(_)) => match self.pending.pop() {
                Some(ScopedBuf::Packet(p)) => Some(p),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Release everything still registered, newest first.
    pub fn release_all(&mut self) {
        while let Some(buf) = self.pending.pop() {
            buf.release();
        }
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.release_all();
    }
}
