//! Scripted stage implementations for exercising the router and session.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StageError;
use crate::frame::{RawAudioFrame, RawFrame, RawVideoFrame};
use crate::guard::{Lease, SurfacePool};
use crate::packet::RawPacket;
use crate::stage::{
    EncoderBuilder, FilterBuilder, FrameDecoder, FrameEncoder, FrameFilter, PacketSink,
    PacketSource, SinkStreamId, SourceItem, Submit,
};
use crate::stream::{MediaKind, Rational, StreamInfo};

/// Pool that hands out numbered tickets and panics on a double release.
pub struct CountingPool {
    next: AtomicU64,
    acquired: AtomicU64,
    released: Mutex<HashSet<u64>>,
}

impl CountingPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next: AtomicU64::new(0),
            acquired: AtomicU64::new(0),
            released: Mutex::new(HashSet::new()),
        })
    }

    pub fn lease(self: &Arc<Self>) -> Lease {
        let ticket = self.next.fetch_add(1, Ordering::SeqCst);
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Lease::new(ticket, self.clone())
    }

    /// Buffers currently checked out and not yet released.
    pub fn outstanding(&self) -> u64 {
        let released = self.released.lock().unwrap().len() as u64;
        self.acquired.load(Ordering::SeqCst) - released
    }
}

impl SurfacePool for CountingPool {
    fn release(&self, ticket: u64) {
        let mut released = self.released.lock().unwrap();
        assert!(released.insert(ticket), "ticket {ticket} released twice");
    }
}

pub fn video_stream(index: usize) -> StreamInfo {
    StreamInfo::new(index, MediaKind::Video, Rational(1, 90000))
}

pub fn audio_stream(index: usize) -> StreamInfo {
    StreamInfo::new(index, MediaKind::Audio, Rational(1, 48000))
}

pub fn unit(pool: &Arc<CountingPool>, index: usize, pts: i64) -> SourceItem {
    SourceItem::Unit(
        RawPacket::new(index, Bytes::from_static(b"unit"), Rational(1, 1000))
            .with_pts(pts)
            .with_lease(pool.lease()),
    )
}

/// Source that replays a fixed script and reports `Closed` when it runs out.
pub struct ScriptedSource {
    streams: Vec<StreamInfo>,
    items: VecDeque<SourceItem>,
    reads: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(streams: Vec<StreamInfo>, items: Vec<SourceItem>) -> Self {
        Self {
            streams,
            items: items.into(),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reads_handle(&self) -> Arc<AtomicUsize> {
        self.reads.clone()
    }
}

#[async_trait]
impl PacketSource for ScriptedSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    async fn next(&mut self) -> Result<SourceItem, StageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.pop_front().unwrap_or(SourceItem::Closed))
    }
}

/// Source that never produces anything; pacing comes from the sleep.
pub struct IdleSource {
    streams: Vec<StreamInfo>,
}

impl IdleSource {
    pub fn new(streams: Vec<StreamInfo>) -> Self {
        Self { streams }
    }
}

#[async_trait]
impl PacketSource for IdleSource {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    async fn next(&mut self) -> Result<SourceItem, StageError> {
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(SourceItem::Pending)
    }
}

/// One frame per packet, pts preserved. Specific pts values can be scripted
/// to fail as corrupt or stream-fatal; the first `reject_first` submits push
/// back, and a submit delay makes the stage slow enough to cancel against.
pub struct StubDecoder {
    pool: Arc<CountingPool>,
    kind: MediaKind,
    corrupt_pts: HashSet<i64>,
    fatal_pts: Option<i64>,
    reject_first: usize,
    seen: usize,
    submit_delay: Option<Duration>,
    pending: VecDeque<RawFrame>,
}

impl StubDecoder {
    pub fn video(pool: &Arc<CountingPool>) -> Self {
        Self {
            pool: pool.clone(),
            kind: MediaKind::Video,
            corrupt_pts: HashSet::new(),
            fatal_pts: None,
            reject_first: 0,
            seen: 0,
            submit_delay: None,
            pending: VecDeque::new(),
        }
    }

    pub fn audio(pool: &Arc<CountingPool>) -> Self {
        let mut decoder = Self::video(pool);
        decoder.kind = MediaKind::Audio;
        decoder
    }

    pub fn with_corrupt_pts(mut self, pts: i64) -> Self {
        self.corrupt_pts.insert(pts);
        self
    }

    pub fn with_fatal_pts(mut self, pts: i64) -> Self {
        self.fatal_pts = Some(pts);
        self
    }

    pub fn with_reject_first(mut self, n: usize) -> Self {
        self.reject_first = n;
        self
    }

    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    fn decode(&self, pts: i64) -> RawFrame {
        match self.kind {
            MediaKind::Audio => RawFrame::Audio(
                RawAudioFrame::new(960, "flt", Bytes::from_static(b"samples"))
                    .with_pts(pts)
                    .with_lease(self.pool.lease()),
            ),
            _ => RawFrame::Video(
                RawVideoFrame::new(640, 480, "yuv420p", Bytes::from_static(b"pixels"))
                    .with_pts(pts)
                    .with_lease(self.pool.lease()),
            ),
        }
    }
}

#[async_trait]
impl FrameDecoder for StubDecoder {
    async fn submit(&mut self, packet: RawPacket) -> Result<Submit<RawPacket>, StageError> {
        if let Some(delay) = self.submit_delay {
            tokio::time::sleep(delay).await;
        }
        self.seen += 1;
        if self.seen <= self.reject_first {
            return Ok(Submit::Rejected(packet));
        }
        let pts = packet.pts().unwrap_or(0);
        packet.release();
        if self.corrupt_pts.contains(&pts) {
            return Err(StageError::Corrupt(format!("pts {pts}")));
        }
        if self.fatal_pts == Some(pts) {
            return Err(StageError::StreamLost(format!("hw context lost at pts {pts}")));
        }
        let frame = self.decode(pts);
        self.pending.push_back(frame);
        Ok(Submit::Accepted)
    }

    async fn drain(&mut self) -> Result<Option<RawFrame>, StageError> {
        Ok(self.pending.pop_front())
    }
}

impl Drop for StubDecoder {
    fn drop(&mut self) {
        while let Some(frame) = self.pending.pop_front() {
            frame.release();
        }
    }
}

/// Collects `window` inputs, then emits `fan` outputs stamped with the pts of
/// the first input of the window.
pub struct ScriptFilter {
    pool: Arc<CountingPool>,
    window: usize,
    fan: usize,
    held: Vec<RawFrame>,
    out: VecDeque<RawFrame>,
}

impl ScriptFilter {
    fn emit(&mut self) {
        let pts = self.held.first().and_then(|f| f.pts()).unwrap_or(0);
        while let Some(frame) = self.held.pop() {
            frame.release();
        }
        for k in 0..self.fan {
            self.out.push_back(RawFrame::Video(
                RawVideoFrame::new(640, 480, "yuv420p", Bytes::from_static(b"filtered"))
                    .with_pts(pts + k as i64)
                    .with_lease(self.pool.lease()),
            ));
        }
    }
}

#[async_trait]
impl FrameFilter for ScriptFilter {
    async fn add_input(&mut self, frame: RawFrame, _port: usize) -> Result<(), StageError> {
        self.held.push(frame);
        if self.held.len() >= self.window {
            self.emit();
        }
        Ok(())
    }

    async fn take_output(&mut self, _port: usize) -> Result<Option<RawFrame>, StageError> {
        Ok(self.out.pop_front())
    }
}

impl Drop for ScriptFilter {
    fn drop(&mut self) {
        while let Some(frame) = self.held.pop() {
            frame.release();
        }
        while let Some(frame) = self.out.pop_front() {
            frame.release();
        }
    }
}

pub struct ScriptFilterBuilder {
    pool: Arc<CountingPool>,
    window: usize,
    fan: usize,
    builds: Arc<AtomicUsize>,
}

impl ScriptFilterBuilder {
    pub fn new(pool: &Arc<CountingPool>, window: usize, fan: usize) -> Self {
        Self {
            pool: pool.clone(),
            window,
            fan,
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn builds_handle(&self) -> Arc<AtomicUsize> {
        self.builds.clone()
    }
}

impl FilterBuilder for ScriptFilterBuilder {
    fn build(
        &mut self,
        _stream: &StreamInfo,
        _sample: &RawFrame,
    ) -> Result<Box<dyn FrameFilter>, StageError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptFilter {
            pool: self.pool.clone(),
            window: self.window,
            fan: self.fan,
            held: Vec::new(),
            out: VecDeque::new(),
        }))
    }
}

/// One packet per accepted frame, pts preserved. The first `reject_first`
/// submits push back; `exhaust_drains` makes every drain fail transiently.
pub struct StubEncoder {
    pool: Arc<CountingPool>,
    reject_first: usize,
    exhaust_drains: bool,
    seen: usize,
    attempts: Arc<AtomicUsize>,
    accepted_pts: Arc<Mutex<Vec<i64>>>,
    pending: VecDeque<RawPacket>,
}

impl StubEncoder {
    pub fn new(pool: &Arc<CountingPool>) -> Self {
        Self {
            pool: pool.clone(),
            reject_first: 0,
            exhaust_drains: false,
            seen: 0,
            attempts: Arc::new(AtomicUsize::new(0)),
            accepted_pts: Arc::new(Mutex::new(Vec::new())),
            pending: VecDeque::new(),
        }
    }

    pub fn with_reject_first(mut self, n: usize) -> Self {
        self.reject_first = n;
        self
    }

    pub fn with_exhausted_drains(mut self) -> Self {
        self.exhaust_drains = true;
        self
    }

    pub fn attempts_handle(&self) -> Arc<AtomicUsize> {
        self.attempts.clone()
    }

    pub fn accepted_handle(&self) -> Arc<Mutex<Vec<i64>>> {
        self.accepted_pts.clone()
    }
}

#[async_trait]
impl FrameEncoder for StubEncoder {
    async fn submit(&mut self, frame: RawFrame) -> Result<Submit<RawFrame>, StageError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.seen += 1;
        if self.seen <= self.reject_first {
            return Ok(Submit::Rejected(frame));
        }
        let pts = frame.pts().unwrap_or(0);
        frame.release();
        self.accepted_pts.lock().unwrap().push(pts);
        self.pending.push_back(
            RawPacket::new(usize::MAX, Bytes::from_static(b"encoded"), Rational(1, 1000))
                .with_pts(pts)
                .with_lease(self.pool.lease()),
        );
        Ok(Submit::Accepted)
    }

    async fn drain(&mut self) -> Result<Option<RawPacket>, StageError> {
        if self.exhaust_drains {
            return Err(StageError::Exhausted("surface pool empty".to_string()));
        }
        Ok(self.pending.pop_front())
    }
}

impl Drop for StubEncoder {
    fn drop(&mut self) {
        while let Some(packet) = self.pending.pop_front() {
            packet.release();
        }
    }
}

/// Builder handing out one pre-configured encoder; a second build attempt is
/// an error, which doubles as a construct-once check.
pub struct StubEncoderBuilder {
    encoder: Option<StubEncoder>,
    builds: Arc<AtomicUsize>,
}

impl StubEncoderBuilder {
    pub fn new(encoder: StubEncoder) -> Self {
        Self {
            encoder: Some(encoder),
            builds: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn builds_handle(&self) -> Arc<AtomicUsize> {
        self.builds.clone()
    }
}

impl EncoderBuilder for StubEncoderBuilder {
    fn build(
        &mut self,
        _stream: &StreamInfo,
        _sample: &RawFrame,
    ) -> Result<Box<dyn FrameEncoder>, StageError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        match self.encoder.take() {
            Some(encoder) => Ok(Box::new(encoder)),
            None => Err(StageError::StreamLost("encoder built twice".to_string())),
        }
    }
}

/// Builder that always fails, for exercising error paths during lazy
/// construction.
pub struct FailingEncoderBuilder;

impl EncoderBuilder for FailingEncoderBuilder {
    fn build(
        &mut self,
        _stream: &StreamInfo,
        _sample: &RawFrame,
    ) -> Result<Box<dyn FrameEncoder>, StageError> {
        Err(StageError::StreamLost("encoder init failed".to_string()))
    }
}

#[derive(Default)]
pub struct SinkLog {
    pub streams_opened: usize,
    pub writes: Vec<(SinkStreamId, usize, Option<i64>)>,
}

/// Sink that records stream creation and every write.
pub struct VecSink {
    next_id: usize,
    log: Arc<Mutex<SinkLog>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            log: Arc::new(Mutex::new(SinkLog::default())),
        }
    }

    pub fn log_handle(&self) -> Arc<Mutex<SinkLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl PacketSink for VecSink {
    async fn add_stream(&mut self, _first: &RawPacket) -> Result<SinkStreamId, StageError> {
        let id = SinkStreamId(self.next_id);
        self.next_id += 1;
        self.log.lock().unwrap().streams_opened += 1;
        Ok(id)
    }

    async fn write(&mut self, stream: SinkStreamId, packet: RawPacket) -> Result<(), StageError> {
        self.log
            .lock()
            .unwrap()
            .writes
            .push((stream, packet.index(), packet.pts()));
        packet.release();
        Ok(())
    }
}

/// Sink that hands every identity the same destination handle.
pub struct DupSink;

#[async_trait]
impl PacketSink for DupSink {
    async fn add_stream(&mut self, _first: &RawPacket) -> Result<SinkStreamId, StageError> {
        Ok(SinkStreamId(0))
    }

    async fn write(&mut self, _stream: SinkStreamId, packet: RawPacket) -> Result<(), StageError> {
        packet.release();
        Ok(())
    }
}
