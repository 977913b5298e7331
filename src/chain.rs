use std::collections::VecDeque;

use crate::error::StageError;
use crate::frame::RawFrame;
use crate::packet::RawPacket;
use crate::stage::{
    EncoderBuilder, FilterBuilder, FrameDecoder, FrameEncoder, FrameFilter, Submit,
};
use crate::stream::StreamInfo;

/// Stages a stream should be routed through. The decoder exists as soon as
/// the stream is selected; filter and encoder are built lazily from the first
/// frame that reaches them.
pub struct ChainSpec {
    pub decoder: Box<dyn FrameDecoder>,
    pub filter: Option<Box<dyn FilterBuilder>>,
    pub encoder: Option<Box<dyn EncoderBuilder>>,
}

impl ChainSpec {
    pub fn decode_only(decoder: Box<dyn FrameDecoder>) -> Self {
        Self {
            decoder,
            filter: None,
            encoder: None,
        }
    }

    pub fn with_filter(mut self, filter: Box<dyn FilterBuilder>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_encoder(mut self, encoder: Box<dyn EncoderBuilder>) -> Self {
        self.encoder = Some(encoder);
        self
    }
}

/// A stage slot that is built at most once for the life of its chain.
struct OnceSlot<T> {
    inner: Option<T>,
}

impl<T> OnceSlot<T> {
    fn empty() -> Self {
        Self { inner: None }
    }

    fn is_built(&self) -> bool {
        self.inner.is_some()
    }

    fn get_mut(&mut self) -> Option<&mut T> {
        self.inner.as_mut()
    }

    fn build_with(
        &mut self,
        f: impl FnOnce() -> Result<T, StageError>,
    ) -> Result<&mut T, StageError> {
        if let Some(ref mut built) = self.inner {
            return Ok(built);
        }
        let built = f()?;
        Ok(self.inner.insert(built))
    }

    fn take(&mut self) -> Option<T> {
        self.inner.take()
    }
}

pub(crate) enum ChainOutput {
    Frame(RawFrame),
    Packet(RawPacket),
}

impl ChainOutput {
    fn release(self) {
        match self {
            ChainOutput::Frame(f) => f.release(),
            ChainOutput::Packet(p) => p.release(),
        }
    }
}

/// Per-stream processing state: the decode/filter/encode slots plus the
/// bounded buffers that carry back-pressured inputs and not-yet-returned
/// outputs between pulls.
pub(crate) struct StageChain {
    stream: StreamInfo,
    decoder: Option<Box<dyn FrameDecoder>>,
    filter_builder: Option<Box<dyn FilterBuilder>>,
    filter: OnceSlot<Box<dyn FrameFilter>>,
    encoder_builder: Option<Box<dyn EncoderBuilder>>,
    encoder: OnceSlot<Box<dyn FrameEncoder>>,
    /// Packets the decoder refused, in arrival order. The front is retried
    /// before fresh input; fresh units for the stream queue behind it while
    /// the decoder pushes back.
    stalled: VecDeque<RawPacket>,
    /// Frames waiting for the encoder to accept them, in arrival order.
    encode_queue: VecDeque<RawFrame>,
    /// Outputs produced but not yet returned; drained before fresh input is
    /// pulled, which bounds growth.
    ready: VecDeque<ChainOutput>,
    /// Geometry the filter/encoder were built for. Mid-stream changes are a
    /// known limitation: frames keep flowing into stages built for the old
    /// geometry, and we log the drift once instead of rebuilding.
    built_geometry: Option<(u32, u32)>,
    geometry_drift: bool,
    exhausted_streak: u32,
    disabled: bool,
}

impl StageChain {
    pub(crate) fn new(stream: StreamInfo, spec: ChainSpec) -> Self {
        Self {
            stream,
            decoder: Some(spec.decoder),
            filter_builder: spec.filter,
            filter: OnceSlot::empty(),
            encoder_builder: spec.encoder,
            encoder: OnceSlot::empty(),
            stalled: VecDeque::new(),
            encode_queue: VecDeque::new(),
            ready: VecDeque::new(),
            built_geometry: None,
            geometry_drift: false,
            exhausted_streak: 0,
            disabled: false,
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.stream.index()
    }

    pub(crate) fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Whether this chain routes frames through a filter. Builds the filter
    /// from the sample frame on the first call; later calls are no-ops
    /// returning the same slot.
    pub(crate) fn ensure_filter(&mut self, sample: &RawFrame) -> Result<bool, StageError> {
        let Some(builder) = self.filter_builder.as_mut() else {
            return Ok(false);
        };
        if !self.filter.is_built() {
            self.filter.build_with(|| builder.build(&self.stream, sample))?;
            self.record_geometry(sample);
            log::debug!("stream {}: filter built from first frame", self.stream.index());
        }
        Ok(true)
    }

    /// Whether this chain encodes its frames. Builds the encoder from the
    /// sample frame on the first call; the slot is never replaced afterwards.
    pub(crate) fn ensure_encoder(&mut self, sample: &RawFrame) -> Result<bool, StageError> {
        let Some(builder) = self.encoder_builder.as_mut() else {
            return Ok(false);
        };
        if !self.encoder.is_built() {
            self.encoder.build_with(|| builder.build(&self.stream, sample))?;
            self.record_geometry(sample);
            log::debug!("stream {}: encoder built from first frame", self.stream.index());
        }
        Ok(true)
    }

    fn record_geometry(&mut self, sample: &RawFrame) {
        if self.built_geometry.is_none() {
            if let Some(v) = sample.as_video() {
                self.built_geometry = Some((v.width(), v.height()));
            }
        }
    }

    /// Note the geometry of a frame entering the built stages. Drift is
    /// reported once and the frame flows on unchanged.
    pub(crate) fn note_geometry(&mut self, frame: &RawFrame) {
        let (Some((bw, bh)), Some(v)) = (self.built_geometry, frame.as_video()) else {
            return;
        };
        if !self.geometry_drift && (v.width() != bw || v.height() != bh) {
            self.geometry_drift = true;
            log::warn!(
                "stream {}: geometry changed from {}x{} to {}x{}; stages keep their original configuration",
                self.stream.index(),
                bw,
                bh,
                v.width(),
                v.height()
            );
        }
    }

    pub(crate) async fn decoder_submit(
        &mut self,
        packet: RawPacket,
    ) -> Result<Submit<RawPacket>, StageError> {
        match self.decoder.as_mut() {
            Some(decoder) => decoder.submit(packet).await,
            None => {
                packet.release();
                Err(StageError::StreamLost("decoder torn down".to_string()))
            }
        }
    }

    pub(crate) async fn decoder_drain(&mut self) -> Result<Option<RawFrame>, StageError> {
        match self.decoder.as_mut() {
            Some(decoder) => decoder.drain().await,
            None => Ok(None),
        }
    }

    pub(crate) fn has_filter(&self) -> bool {
        self.filter.is_built()
    }

    pub(crate) async fn filter_add(
        &mut self,
        frame: RawFrame,
        port: usize,
    ) -> Result<(), StageError> {
        match self.filter.get_mut() {
            Some(filter) => filter.add_input(frame, port).await,
            None => {
                frame.release();
                Err(StageError::StreamLost("filter torn down".to_string()))
            }
        }
    }

    pub(crate) async fn filter_take(&mut self, port: usize) -> Result<Option<RawFrame>, StageError> {
        match self.filter.get_mut() {
            Some(filter) => filter.take_output(port).await,
            None => Ok(None),
        }
    }

    pub(crate) fn has_encoder(&self) -> bool {
        self.encoder.is_built()
    }

    pub(crate) async fn encoder_submit(
        &mut self,
        frame: RawFrame,
    ) -> Result<Submit<RawFrame>, StageError> {
        match self.encoder.get_mut() {
            Some(encoder) => encoder.submit(frame).await,
            None => {
                frame.release();
                Err(StageError::StreamLost("encoder torn down".to_string()))
            }
        }
    }

    pub(crate) async fn encoder_drain(&mut self) -> Result<Option<RawPacket>, StageError> {
        match self.encoder.get_mut() {
            Some(encoder) => encoder.drain().await,
            None => Ok(None),
        }
    }

    /// Queue a unit the decoder cannot take yet. Arrival order is preserved:
    /// a fresh unit always lands behind every earlier refusal.
    pub(crate) fn stall_packet(&mut self, packet: RawPacket) {
        self.stalled.push_back(packet);
    }

    /// Put the oldest stalled unit back at the front after another refusal,
    /// so the exact same unit is offered first on the next pull.
    pub(crate) fn restall_packet(&mut self, packet: RawPacket) {
        self.stalled.push_front(packet);
    }

    pub(crate) fn take_stalled_packet(&mut self) -> Option<RawPacket> {
        self.stalled.pop_front()
    }

    pub(crate) fn has_stalled_packets(&self) -> bool {
        !self.stalled.is_empty()
    }

    pub(crate) fn queue_frame(&mut self, frame: RawFrame) {
        self.encode_queue.push_back(frame);
    }

    /// Put a frame the encoder rejected back at the head of the queue so the
    /// exact same frame is offered first on the next pull.
    pub(crate) fn requeue_frame(&mut self, frame: RawFrame) {
        self.encode_queue.push_front(frame);
    }

    pub(crate) fn next_queued_frame(&mut self) -> Option<RawFrame> {
        self.encode_queue.pop_front()
    }

    pub(crate) fn push_ready_frame(&mut self, frame: RawFrame) {
        self.ready.push_back(ChainOutput::Frame(frame));
    }

    /// Queue an encoded packet for return, stamped with the read-side stream
    /// identity so the sink router can map it even if write-side indices
    /// differ.
    pub(crate) fn push_ready_packet(&mut self, mut packet: RawPacket) {
        packet.set_index(self.stream.index());
        self.ready.push_back(ChainOutput::Packet(packet));
    }

    pub(crate) fn pop_ready(&mut self) -> Option<ChainOutput> {
        self.ready.pop_front()
    }

    /// One more exhausted retry consumed; returns false once the budget is
    /// spent and the chain should be given up on.
    pub(crate) fn note_exhausted(&mut self, budget: u32) -> bool {
        self.exhausted_streak += 1;
        self.exhausted_streak <= budget
    }

    pub(crate) fn reset_exhausted(&mut self) {
        self.exhausted_streak = 0;
    }

    /// Tear the chain down: release every buffer it still holds (newest
    /// first) and drop the stages in reverse creation order — encoder,
    /// filter, decoder. Safe to call more than once.
    pub(crate) fn close(&mut self) {
        self.disabled = true;
        while let Some(out) = self.ready.pop_back() {
            out.release();
        }
        while let Some(frame) = self.encode_queue.pop_back() {
            frame.release();
        }
        while let Some(packet) = self.stalled.pop_back() {
            packet.release();
        }
        drop(self.encoder.take());
        drop(self.filter.take());
        drop(self.decoder.take());
    }
}
